use std::time::Duration;

use tilldb_core::{StoreError, StoreResult};

use super::HttpRemoteStore;

/// Environment variable holding the remote base URL
pub const URL_ENV: &str = "TILLDB_URL";
/// Environment variable holding the bearer token
pub const TOKEN_ENV: &str = "TILLDB_TOKEN";

pub struct RemoteBuilder {
    url: String,
    token: Option<String>,
    timeout_ms: Option<u64>,
}

impl RemoteBuilder {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            token: None,
            timeout_ms: None,
        }
    }

    /// Builder configured from `TILLDB_URL` and, when set, `TILLDB_TOKEN`
    pub fn from_env() -> StoreResult<Self> {
        let url = std::env::var(URL_ENV)
            .map_err(|_| StoreError::Unavailable(format!("{} is not set", URL_ENV)))?;
        let mut builder = Self::new(&url);
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            if !token.is_empty() {
                builder = builder.bearer_token(&token);
            }
        }
        Ok(builder)
    }

    pub fn bearer_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    pub fn build(self) -> StoreResult<HttpRemoteStore> {
        let timeout = Duration::from_millis(self.timeout_ms.unwrap_or(30_000));
        HttpRemoteStore::with_options(&self.url, self.token, timeout)
    }
}
