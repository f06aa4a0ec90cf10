use camino::Utf8PathBuf;
use http::Uri;
use serde::Deserialize;
use storage_driver::Credential;
use thiserror::Error;

use crate::DaemonClient;

/// Where the daemon listens unless told otherwise.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:9998";

/// Environment variable overriding the daemon endpoint.
const ENV_ENDPOINT: &str = "DAEMON_HOST";

/// Environment variable holding the app token.
const ENV_TOKEN: &str = "DAEMON_TOKEN";

/// Error reading the daemon configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is not set.
    #[error("missing environment variable {0}")]
    Missing(&'static str),

    /// The endpoint is not a valid URI.
    #[error("invalid daemon endpoint {0:?}")]
    Endpoint(String, #[source] http::uri::InvalidUri),
}

/// Connection settings for the local storage daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Base URI of the daemon's RPC listener.
    #[serde(with = "uri", default = "default_endpoint")]
    pub endpoint: Uri,

    /// App token, sent as `Authorization: AppToken <token>`.
    pub token: Credential,

    /// Directory for files handed to the daemon when an upload does not
    /// already live in a file with the right name.
    #[serde(default)]
    pub scratch: Option<Utf8PathBuf>,
}

impl DaemonConfig {
    /// Configuration for the default endpoint.
    pub fn new(token: impl Into<Credential>) -> Self {
        DaemonConfig {
            endpoint: default_endpoint(),
            token: token.into(),
            scratch: None,
        }
    }

    /// Read the configuration from `DAEMON_TOKEN`, and `DAEMON_HOST` if set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let token = Credential::from_env(ENV_TOKEN).map_err(|_| ConfigError::Missing(ENV_TOKEN))?;

        let endpoint = match std::env::var(ENV_ENDPOINT) {
            Ok(host) => host
                .parse()
                .map_err(|error| ConfigError::Endpoint(host.clone(), error))?,
            Err(_) => default_endpoint(),
        };

        Ok(DaemonConfig {
            endpoint,
            token,
            scratch: None,
        })
    }

    /// The scratch directory, below the OS temp dir unless configured.
    pub fn scratch_dir(&self) -> Utf8PathBuf {
        self.scratch.clone().unwrap_or_else(|| {
            Utf8PathBuf::from_path_buf(std::env::temp_dir())
                .unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
                .join("daemon-client")
        })
    }

    /// Construct a client for this daemon.
    pub fn client(self) -> DaemonClient {
        DaemonClient::new(self)
    }
}

fn default_endpoint() -> Uri {
    Uri::from_static(DEFAULT_ENDPOINT)
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
