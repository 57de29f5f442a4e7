use std::sync::Arc;

use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// Who is on the other end of a connection. Passed explicitly into every
/// host-owned operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Admin,
    Guest,
    /// A host, identified by its public slug.
    Host(String),
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        matches!(self, Principal::Admin)
    }

    pub fn is_host(&self, slug: &str) -> bool {
        matches!(self, Principal::Host(s) if s == slug)
    }
}

/// Login names and passwords for the three kinds of principal.
///
/// Guests log in with `guest_user`/`guest_password`. Every other login (admin and
/// hosts) uses the service `password`, held by the gateway that authenticated the
/// host and connects on its behalf with the host slug as user name.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub admin_user: String,
    pub guest_user: String,
    pub password: String,
    pub guest_password: String,
}

impl Credentials {
    pub fn principal_for(&self, user: &str) -> Principal {
        if user == self.admin_user {
            Principal::Admin
        } else if user == self.guest_user || user.is_empty() {
            Principal::Guest
        } else {
            Principal::Host(user.to_string())
        }
    }

    fn password_for(&self, user: &str) -> &str {
        if user == self.guest_user {
            &self.guest_password
        } else {
            &self.password
        }
    }
}

#[derive(Debug)]
pub struct SlotKeeperAuthSource {
    credentials: Arc<Credentials>,
}

impl SlotKeeperAuthSource {
    pub fn new(credentials: Arc<Credentials>) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl AuthSource for SlotKeeperAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let user = login.user().unwrap_or_default();
        let password = self.credentials.password_for(user);
        Ok(Password::new(None, password.as_bytes().to_vec()))
    }
}
