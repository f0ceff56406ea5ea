//! Per-connection session state.
//!
//! Everything the connection remembers between commands lives here: the
//! current catalog, transaction settings, the negotiated encoding, the
//! server-version capability gates, and the sticky row limit. The state
//! enforces which operations are legal; the connection layer performs them.

use std::fmt;

use sqlgate_core::{Error, Result, UsageErrorKind};

/// A parsed server version, ordered for capability gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ServerVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a version out of the server greeting string.
    ///
    /// Trailing build suffixes (`5.7.44-log`, `8.0.36-ubuntu`) are ignored;
    /// a missing component parses as 0.
    pub fn parse(text: &str) -> Self {
        let numeric: String = text
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        let mut parts = numeric.split('.');
        let mut next = || {
            parts
                .next()
                .and_then(|p| p.parse::<u32>().ok())
                .unwrap_or(0)
        };
        Self::new(next(), next(), next())
    }

    /// Servers from 3.23.15 support transactions.
    pub fn supports_transactions(self) -> bool {
        self >= Self::new(3, 23, 15)
    }

    /// Servers from 3.23.36 support isolation levels.
    pub fn supports_isolation_levels(self) -> bool {
        self >= Self::new(3, 23, 36)
    }

    /// Servers from 3.23.6 support quoted identifiers.
    pub fn supports_quoted_identifiers(self) -> bool {
        self >= Self::new(3, 23, 6)
    }

    /// Servers from 3.22.1 answer COM_PING.
    pub fn supports_ping(self) -> bool {
        self >= Self::new(3, 22, 1)
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Transaction isolation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    #[default]
    RepeatableRead,
    Serializable,
    /// Transactions disabled or unknown to the server
    None,
}

impl IsolationLevel {
    /// SQL spelling for `SET SESSION TRANSACTION ISOLATION LEVEL ...`;
    /// `None` has no SQL form.
    pub const fn as_sql(self) -> Option<&'static str> {
        match self {
            IsolationLevel::ReadUncommitted => Some("READ UNCOMMITTED"),
            IsolationLevel::ReadCommitted => Some("READ COMMITTED"),
            IsolationLevel::RepeatableRead => Some("REPEATABLE READ"),
            IsolationLevel::Serializable => Some("SERIALIZABLE"),
            IsolationLevel::None => None,
        }
    }

    /// Parse the server's `transaction_isolation` variable value.
    pub fn from_variable(value: &str) -> Self {
        match value.to_uppercase().replace('-', " ").as_str() {
            "READ UNCOMMITTED" => IsolationLevel::ReadUncommitted,
            "READ COMMITTED" => IsolationLevel::ReadCommitted,
            "REPEATABLE READ" => IsolationLevel::RepeatableRead,
            "SERIALIZABLE" => IsolationLevel::Serializable,
            _ => IsolationLevel::None,
        }
    }
}

/// Mutable per-connection session state.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Current default database
    pub catalog: Option<String>,
    /// Autocommit flag (server default: on)
    pub autocommit: bool,
    /// Current isolation level
    pub isolation: IsolationLevel,
    /// Negotiated character encoding; `None` means raw bytes
    pub encoding: Option<String>,
    /// Parsed server version
    pub version: ServerVersion,
    /// Whether `"` quotes identifiers (from sql_mode ANSI_QUOTES)
    pub ansi_quotes: bool,
    /// Server's max_allowed_packet
    pub max_allowed_packet: u64,
    /// Server's net_buffer_length
    pub net_buffer_length: u64,
    /// Sticky row limit; -1 means unlimited
    pub row_limit: i64,
    /// `set_auto_commit(false)` allowed even without transaction support
    pub relax_auto_commit: bool,
}

impl SessionState {
    /// Fresh state for a newly handshaken connection.
    pub fn new(version: ServerVersion, catalog: Option<String>) -> Self {
        Self {
            catalog,
            autocommit: true,
            isolation: IsolationLevel::None,
            encoding: None,
            version,
            ansi_quotes: false,
            max_allowed_packet: 0,
            net_buffer_length: 0,
            row_limit: -1,
            relax_auto_commit: false,
        }
    }

    /// The identifier quote character, per server capabilities.
    ///
    /// `None` when the server predates quoted identifiers entirely.
    pub fn identifier_quote(&self) -> Option<char> {
        if !self.version.supports_quoted_identifiers() {
            return None;
        }
        Some(if self.ansi_quotes { '"' } else { '`' })
    }

    /// Check that autocommit may be set to `enabled`.
    pub fn check_autocommit(&self, enabled: bool) -> Result<()> {
        if !enabled && !self.version.supports_transactions() && !self.relax_auto_commit {
            return Err(Error::usage(
                UsageErrorKind::NotSupported,
                "this server does not support transactions; \
                 autocommit cannot be disabled",
            ));
        }
        Ok(())
    }

    /// Check that the isolation level may be changed.
    pub fn check_isolation(&self, level: IsolationLevel) -> Result<()> {
        if !self.version.supports_isolation_levels() {
            return Err(Error::usage(
                UsageErrorKind::NotSupported,
                "this server does not support transaction isolation levels",
            ));
        }
        if level.as_sql().is_none() {
            return Err(Error::usage(
                UsageErrorKind::InvalidState,
                "isolation level NONE cannot be set on a connection",
            ));
        }
        Ok(())
    }

    /// Apply a bootstrap server variable.
    pub fn absorb_variable(&mut self, name: &str, value: &str) {
        match name {
            "max_allowed_packet" => {
                self.max_allowed_packet = value.parse().unwrap_or(0);
            }
            "net_buffer_length" => {
                self.net_buffer_length = value.parse().unwrap_or(0);
            }
            "transaction_isolation" | "tx_isolation" => {
                self.isolation = IsolationLevel::from_variable(value);
            }
            "sql_mode" => {
                self.ansi_quotes = value
                    .split(',')
                    .any(|mode| mode.trim().eq_ignore_ascii_case("ANSI_QUOTES"));
            }
            _ => {}
        }
    }
}
