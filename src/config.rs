//! Connection settings.

use reqwest::Url;

use crate::error::{Error, Result};

/// Environment variable that seeds [`Config::url`].
pub const URL_ENV: &str = "CLICKHOUSE_URL";

/// Environment variable that seeds [`Config::database`].
pub const DATABASE_ENV: &str = "CLICKHOUSE_DATABASE";

/// Default HTTP endpoint of a local server.
pub const DEFAULT_URL: &str = "http://localhost:8123";

/// Default database name.
pub const DEFAULT_DATABASE: &str = "default";

/// Where to send queries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Base URL of the HTTP interface.
    pub url: String,
    /// Database sent in `X-ClickHouse-Database`.
    pub database: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            database: DEFAULT_DATABASE.to_string(),
        }
    }
}

impl Config {
    /// Defaults, overridden by `CLICKHOUSE_URL` and `CLICKHOUSE_DATABASE` when set
    /// to a non-empty value.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(url) = non_empty_var(URL_ENV) {
            config.url = url;
        }
        if let Some(database) = non_empty_var(DATABASE_ENV) {
            config.database = database;
        }
        config
    }

    /// Replace the base URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Replace the database.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Parse the base URL.
    pub(crate) fn parse_url(&self) -> Result<Url> {
        Url::parse(&self.url).map_err(|_| Error::InvalidUrl(self.url.clone()))
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
