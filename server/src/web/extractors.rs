// orderflow_server/src/web/extractors.rs

//! Caller identity. Authentication happens upstream; by the time a request reaches us
//! the gateway in front has put the user id (and role, for staff) in headers.

use actix_web::{FromRequest, HttpRequest};
use futures_util::future::{ready, Ready};
use orderflow::model::Actor;
use tracing::warn;
use uuid::Uuid;

use crate::errors::AppError;

pub const USER_ID_HEADER: &str = "X-User-ID";
pub const USER_ROLE_HEADER: &str = "X-User-Role";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
  Customer,
  Admin,
}

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
  pub user_id: Uuid,
  pub role: Role,
}

impl AuthenticatedUser {
  pub fn actor(&self) -> Actor {
    match self.role {
      Role::Customer => Actor::Customer(self.user_id),
      Role::Admin => Actor::Admin(self.user_id),
    }
  }

  pub fn is_admin(&self) -> bool {
    self.role == Role::Admin
  }

  fn from_headers(req: &HttpRequest) -> Result<Self, AppError> {
    let user_id = req
      .headers()
      .get(USER_ID_HEADER)
      .and_then(|v| v.to_str().ok())
      .and_then(|v| Uuid::parse_str(v.trim()).ok())
      .ok_or_else(|| {
        warn!("AuthenticatedUser extractor: Missing or invalid X-User-ID header.");
        AppError::Auth("Missing or invalid X-User-ID header.".to_string())
      })?;
    let role = match req.headers().get(USER_ROLE_HEADER).and_then(|v| v.to_str().ok()) {
      Some(role) if role.trim().eq_ignore_ascii_case("admin") => Role::Admin,
      _ => Role::Customer,
    };
    Ok(AuthenticatedUser { user_id, role })
  }
}

impl FromRequest for AuthenticatedUser {
  type Error = AppError;
  type Future = Ready<Result<Self, Self::Error>>;

  fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
    ready(AuthenticatedUser::from_headers(req))
  }
}

/// An [`AuthenticatedUser`] whose role is admin. Anyone else gets 403.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthenticatedUser);

impl AdminUser {
  pub fn actor(&self) -> Actor {
    self.0.actor()
  }
}

impl FromRequest for AdminUser {
  type Error = AppError;
  type Future = Ready<Result<Self, Self::Error>>;

  fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
    ready(AuthenticatedUser::from_headers(req).and_then(|user| {
      if user.is_admin() {
        Ok(AdminUser(user))
      } else {
        warn!(user_id = %user.user_id, "Non-admin caller on an admin route.");
        Err(AppError::Forbidden("Admin role required.".to_string()))
      }
    }))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use actix_web::test::TestRequest;

  #[test]
  fn role_header_selects_actor() {
    let id = Uuid::new_v4();
    let req = TestRequest::default()
      .insert_header((USER_ID_HEADER, id.to_string()))
      .to_http_request();
    assert_eq!(AuthenticatedUser::from_headers(&req).unwrap().actor(), Actor::Customer(id));

    let req = TestRequest::default()
      .insert_header((USER_ID_HEADER, id.to_string()))
      .insert_header((USER_ROLE_HEADER, "Admin"))
      .to_http_request();
    assert_eq!(AuthenticatedUser::from_headers(&req).unwrap().actor(), Actor::Admin(id));
  }

  #[test]
  fn missing_or_garbled_user_id_is_rejected() {
    let req = TestRequest::default().to_http_request();
    assert!(matches!(AuthenticatedUser::from_headers(&req), Err(AppError::Auth(_))));
    let req = TestRequest::default()
      .insert_header((USER_ID_HEADER, "not-a-uuid"))
      .to_http_request();
    assert!(AuthenticatedUser::from_headers(&req).is_err());
  }
}
