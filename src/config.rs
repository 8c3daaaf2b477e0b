// Configuration read from the environment, in the same spirit as the API
// client's `from_env`: every value has a default except the application
// keys, which are only required once a token is requested.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "https://developer.api.autodesk.com";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 300;

#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub data_dir: PathBuf,
    pub http_timeout: Duration,
}

impl Config {
    /// Reads `FORGE_HOST`, `FORGE_CLIENT_ID`, `FORGE_CLIENT_SECRET`,
    /// `FORGE_DATA_DIR` and `FORGE_HTTP_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let host = non_empty("FORGE_HOST")
            .unwrap_or_else(|| DEFAULT_HOST.into())
            .trim_end_matches('/')
            .to_string();
        let data_dir = non_empty("FORGE_DATA_DIR").map(PathBuf::from).unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".forge-oss")
        });
        let http_timeout = non_empty("FORGE_HTTP_TIMEOUT_SECS")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);
        Config {
            host,
            client_id: non_empty("FORGE_CLIENT_ID"),
            client_secret: non_empty("FORGE_CLIENT_SECRET"),
            data_dir,
            http_timeout: Duration::from_secs(http_timeout),
        }
    }
}
