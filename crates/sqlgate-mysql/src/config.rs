//! Connection configuration.
//!
//! Builder over the recognized option surface. Option values are validated
//! at connect time, before any I/O: an unknown character encoding or a
//! nonsensical numeric bound is a configuration error, not a server error.

use std::time::Duration;

use sqlgate_core::{ConfigError, Error, Result};

/// Character encodings this driver can request from the server.
///
/// The wire protocol names them with MySQL charset labels; anything outside
/// this set fails validation at connect time.
const SUPPORTED_ENCODINGS: &[&str] = &["utf8", "utf8mb4", "latin1", "ascii", "binary"];

/// MySQL connection configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Hostname or IP address
    pub host: String,
    /// Port number (default: 3306)
    pub port: u16,
    /// Username for authentication
    pub user: String,
    /// Password for authentication
    pub password: Option<String>,
    /// Database name to select at connect time
    pub database: Option<String>,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Reconnect automatically after a failed liveness probe
    pub auto_reconnect: bool,
    /// Maximum reconnection attempts (default: 3)
    pub max_reconnects: u32,
    /// Initial backoff before the second reconnect attempt, in seconds
    /// (default: 2); subsequent sleeps square the previous one
    pub initial_timeout: u64,
    /// Allow `set_auto_commit(false)` even on servers without transactions
    pub relax_auto_commit: bool,
    /// Report declared SQL type names in uppercase
    pub capitalize_type_names: bool,
    /// Decode text cells through the configured encoding; false means raw
    /// bytes pass through untouched
    pub use_unicode: bool,
    /// Character encoding name; validated against [`SUPPORTED_ENCODINGS`]
    pub character_encoding: Option<String>,
    /// Reject lossy server-side float conversions
    pub strict_floating_point: bool,
    /// Log every command with its wall-clock duration
    pub profile_sql: bool,
    /// Connection-wide row cap; 0 means unlimited
    pub max_rows: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: String::new(),
            password: None,
            database: None,
            connect_timeout: Duration::from_secs(30),
            auto_reconnect: false,
            max_reconnects: 3,
            initial_timeout: 2,
            relax_auto_commit: false,
            capitalize_type_names: false,
            use_unicode: false,
            character_encoding: None,
            strict_floating_point: false,
            profile_sql: false,
            max_rows: 0,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the hostname.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the username.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the database selected at connect time.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enable automatic reconnection.
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Set the reconnection attempt bound.
    pub fn max_reconnects(mut self, attempts: u32) -> Self {
        self.max_reconnects = attempts;
        self
    }

    /// Set the initial reconnect backoff in seconds.
    pub fn initial_timeout(mut self, seconds: u64) -> Self {
        self.initial_timeout = seconds;
        self
    }

    /// Allow disabling autocommit on servers without transaction support.
    pub fn relax_auto_commit(mut self, relax: bool) -> Self {
        self.relax_auto_commit = relax;
        self
    }

    /// Report declared SQL type names in uppercase.
    pub fn capitalize_type_names(mut self, capitalize: bool) -> Self {
        self.capitalize_type_names = capitalize;
        self
    }

    /// Decode text through a character encoding instead of raw bytes.
    pub fn use_unicode(mut self, unicode: bool) -> Self {
        self.use_unicode = unicode;
        self
    }

    /// Set the character encoding name.
    pub fn character_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.character_encoding = Some(encoding.into());
        self
    }

    /// Reject lossy server-side float conversions.
    pub fn strict_floating_point(mut self, strict: bool) -> Self {
        self.strict_floating_point = strict;
        self
    }

    /// Log every command with timing.
    pub fn profile_sql(mut self, profile: bool) -> Self {
        self.profile_sql = profile;
        self
    }

    /// Cap rows per result set; 0 means unlimited.
    pub fn max_rows(mut self, rows: u32) -> Self {
        self.max_rows = rows;
        self
    }

    /// Row cap as the session's signed sticky limit; -1 means unlimited.
    pub fn row_limit(&self) -> i64 {
        if self.max_rows == 0 {
            -1
        } else {
            i64::from(self.max_rows)
        }
    }

    /// Validate the configuration before any I/O.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(config_error("host must not be empty"));
        }
        if self.port == 0 {
            return Err(config_error("port must be nonzero"));
        }
        if self.initial_timeout == 0 {
            return Err(config_error("initialTimeout must be at least 1 second"));
        }
        if self.use_unicode {
            match &self.character_encoding {
                None => {
                    return Err(config_error(
                        "useUnicode requires a characterEncoding",
                    ));
                }
                Some(name) => {
                    let lower = name.to_lowercase();
                    if !SUPPORTED_ENCODINGS.contains(&lower.as_str()) {
                        return Err(config_error(format!(
                            "unsupported character encoding {name:?}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

fn config_error(message: impl Into<String>) -> Error {
    Error::Config(ConfigError {
        message: message.into(),
        source: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.port, 3306);
        assert_eq!(config.max_reconnects, 3);
        assert_eq!(config.initial_timeout, 2);
        assert!(!config.auto_reconnect);
        assert_eq!(config.max_rows, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_chaining() {
        let config = Config::new()
            .host("db.internal")
            .port(3307)
            .user("app")
            .password("secret")
            .database("orders")
            .auto_reconnect(true)
            .max_reconnects(5)
            .max_rows(100);
        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 3307);
        assert_eq!(config.database.as_deref(), Some("orders"));
        assert_eq!(config.max_reconnects, 5);
        assert_eq!(config.row_limit(), 100);
    }

    #[test]
    fn zero_max_rows_means_unlimited() {
        assert_eq!(Config::new().max_rows(0).row_limit(), -1);
    }

    #[test]
    fn invalid_encoding_is_a_config_error() {
        let config = Config::new()
            .use_unicode(true)
            .character_encoding("klingon");
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn known_encoding_passes_validation() {
        let config = Config::new().use_unicode(true).character_encoding("UTF8MB4");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_host_rejected() {
        assert!(Config::new().host("").validate().is_err());
    }
}
