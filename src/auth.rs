use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// Shared secret for the reservation front end. The user name is the caller's
/// identity as issued upstream; it is not checked here and the engine trusts the
/// renter and owner ids it is handed.
#[derive(Debug)]
pub struct CarshareAuthSource {
    secret: Vec<u8>,
}

impl CarshareAuthSource {
    pub fn new(password: String) -> Self {
        Self {
            secret: password.into_bytes(),
        }
    }
}

#[async_trait]
impl AuthSource for CarshareAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        tracing::debug!(?login, "cleartext login");
        Ok(Password::new(None, self.secret.clone()))
    }
}
