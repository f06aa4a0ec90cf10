use http::Uri;
use serde::Deserialize;
use storage_driver::Credential;
use thiserror::Error;

use crate::BucketClient;

/// Environment variable holding the bucket service endpoint.
const ENV_ENDPOINT: &str = "HUB_HOST";

/// Environment variable holding the bearer credential.
const ENV_TOKEN: &str = "HUB_TOKEN";

/// Environment variable enabling server-side encryption of new buckets.
const ENV_ENCRYPTION: &str = "BUCKET_ENCRYPTION";

/// Error reading the bucket service configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is not set.
    #[error("missing environment variable {0}")]
    Missing(&'static str),

    /// The endpoint is not a valid URI.
    #[error("invalid bucket service endpoint {0:?}")]
    Endpoint(String, #[source] http::uri::InvalidUri),
}

/// Connection settings for a remote bucket service.
#[derive(Debug, Clone, Deserialize)]
pub struct BucketServiceConfig {
    /// Base URI of the service, e.g. `http://127.0.0.1:8087`.
    #[serde(with = "uri")]
    pub endpoint: Uri,

    /// Bearer credential sent with every request.
    pub token: Credential,

    /// Ask the service to encrypt buckets it creates.
    #[serde(default)]
    pub encrypted: bool,
}

impl BucketServiceConfig {
    /// Read the configuration from `HUB_HOST`, `HUB_TOKEN` and `BUCKET_ENCRYPTION`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = std::env::var(ENV_ENDPOINT).map_err(|_| ConfigError::Missing(ENV_ENDPOINT))?;
        let endpoint = host
            .parse()
            .map_err(|error| ConfigError::Endpoint(host.clone(), error))?;

        let token = Credential::from_env(ENV_TOKEN).map_err(|_| ConfigError::Missing(ENV_TOKEN))?;

        let encrypted = std::env::var(ENV_ENCRYPTION)
            .map(|value| flag(&value))
            .unwrap_or(false);

        Ok(BucketServiceConfig {
            endpoint,
            token,
            encrypted,
        })
    }

    /// Construct a client for this service.
    pub fn client(self) -> BucketClient {
        BucketClient::new(self)
    }
}

fn flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

mod uri {
    use http::Uri;
    use serde::{Deserialize as _, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Uri, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
