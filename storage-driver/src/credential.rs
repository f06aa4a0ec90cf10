use std::{borrow::Cow, env::VarError, fmt, ops::Deref};

use http::{header::InvalidHeaderValue, HeaderValue};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// An opaque credential forwarded to a storage backend.
///
/// The value never appears in debug output, and owned values are zeroed on drop.
/// Use [Credential::revealed] to get the underlying value.
#[derive(Clone, Deserialize, Serialize)]
#[serde(from = "String")]
pub struct Credential(Cow<'static, str>);

impl Credential {
    /// Read the credential from an environment variable.
    pub fn from_env(var: &str) -> Result<Self, VarError> {
        let value = std::env::var(var)?;
        Ok(Credential(value.into()))
    }

    /// Expose the underlying value of this credential.
    pub fn revealed(&self) -> &str {
        self.0.deref()
    }

    /// An `Authorization: Bearer` header value, marked as sensitive.
    pub fn bearer(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        self.authorization("Bearer")
    }

    /// An `Authorization: AppToken` header value, as the storage daemon expects.
    pub fn app_token(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        self.authorization("AppToken")
    }

    fn authorization(&self, scheme: &str) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut header = HeaderValue::try_from(format!("{scheme} {}", self.revealed()))?;
        header.set_sensitive(true);
        Ok(header)
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        if let Cow::Owned(ref mut s) = self.0 {
            s.zeroize()
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(****)")
    }
}

impl From<String> for Credential {
    fn from(value: String) -> Self {
        Credential(value.into())
    }
}

impl From<&'static str> for Credential {
    fn from(value: &'static str) -> Self {
        Credential(value.into())
    }
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn credential_hidden_debug() {
        let token = Credential::from("app-token");

        assert_eq!(&format!("{token:?}"), "Credential(****)");
        assert_eq!(token.revealed(), "app-token");
    }

    #[test]
    fn bearer_header_is_sensitive() {
        let header = Credential::from("app-token").bearer().unwrap();
        assert!(header.is_sensitive());
        assert_eq!(header.to_str().unwrap(), "Bearer app-token");
    }

    #[test]
    fn app_token_header() {
        let header = Credential::from("app-token").app_token().unwrap();
        assert!(header.is_sensitive());
        assert_eq!(header.to_str().unwrap(), "AppToken app-token");
    }
}
