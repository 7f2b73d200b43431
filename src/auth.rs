use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;
use ulid::Ulid;

use crate::model::Caller;

/// Login name reserved for the salon administrator.
pub const ADMIN_USER: &str = "admin";

/// Resolves the login user to a caller: `admin`, or a customer's ULID.
pub fn caller_from_user(user: &str) -> Option<Caller> {
    if user == ADMIN_USER {
        return Some(Caller::Admin);
    }
    Ulid::from_string(user).ok().map(Caller::Customer)
}

/// Administrator and customers authenticate with separate shared secrets.
#[derive(Debug)]
pub struct ChairtimeAuthSource {
    password: String,
    admin_password: String,
}

impl ChairtimeAuthSource {
    pub fn new(password: String, admin_password: String) -> Self {
        Self {
            password,
            admin_password,
        }
    }
}

#[async_trait]
impl AuthSource for ChairtimeAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let secret = if login.user().as_deref() == Some(ADMIN_USER) {
            &self.admin_password
        } else {
            &self.password
        };
        Ok(Password::new(None, secret.as_bytes().to_vec()))
    }
}
