//! Connection Configuration
//!
//! `Config` describes one endpoint; `ClusterConfig` describes a primary plus its
//! replicas and the pool settings applied to all of them. Cluster configs are
//! usually loaded from TOML.

use std::fmt;
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::DbError;

/// Wire protocol / backend of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    #[serde(alias = "mariadb")]
    MySql,
    #[serde(alias = "postgresql")]
    Postgres,
    Sqlite,
}

impl Driver {
    /// Detects the driver from a connection URL scheme.
    pub fn from_url(url: &str) -> Option<Driver> {
        let (scheme, _) = url.split_once(':')?;
        match scheme.to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Some(Driver::MySql),
            "postgres" | "postgresql" => Some(Driver::Postgres),
            "sqlite" => Some(Driver::Sqlite),
            _ => None,
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Driver::MySql => "mysql",
            Driver::Postgres => "postgres",
            Driver::Sqlite => "sqlite",
        })
    }
}

// ============== Config ==============

/// Holds the connection information for one endpoint.
///
/// For SQLite only `database` is used, as the file path.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(alias = "dbname")]
    pub database: String,
}

impl Config {
    pub fn new(
        user: impl Into<String>,
        password: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
            host: host.into(),
            port,
            database: database.into(),
        }
    }

    /// SQLite file endpoint.
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            database: path.into(),
            ..Default::default()
        }
    }

    /// `user:password@tcp(host:port)/dbname`
    pub fn mysql_dsn(&self) -> String {
        format!(
            "{}:{}@tcp({}:{})/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }

    /// `host=.. port=.. user=.. password=.. dbname=.. sslmode=disable`
    pub fn postgres_dsn(&self) -> String {
        format!(
            "host={} port={} user={} password={} dbname={} sslmode=disable",
            self.host, self.port, self.user, self.password, self.database
        )
    }

    /// Connection URL for `driver`, with credentials percent-encoded.
    pub fn url(&self, driver: Driver) -> String {
        match driver {
            Driver::MySql => format!(
                "mysql://{}@{}:{}/{}",
                self.userinfo(),
                self.host,
                self.port,
                self.database
            ),
            Driver::Postgres => format!(
                "postgres://{}@{}:{}/{}?sslmode=disable",
                self.userinfo(),
                self.host,
                self.port,
                self.database
            ),
            Driver::Sqlite => format!("sqlite://{}?mode=rwc", self.database),
        }
    }

    fn userinfo(&self) -> String {
        let mut out = percent_encode(&self.user);
        if !self.password.is_empty() {
            out.push(':');
            out.push_str(&percent_encode(&self.password));
        }
        out
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .finish()
    }
}

fn percent_encode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}

// ============== ClusterConfig ==============

/// Pool settings applied identically to every endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub max_open_conns: Option<u32>,
    pub max_idle_conns: Option<u32>,
    pub conn_max_lifetime_secs: Option<u64>,
}

impl PoolSettings {
    pub fn conn_max_lifetime(&self) -> Option<Duration> {
        self.conn_max_lifetime_secs.map(Duration::from_secs)
    }
}

/// A primary, its replicas and the settings shared by all of them.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    pub driver: Driver,
    pub primary: Config,
    #[serde(default)]
    pub replicas: Vec<Config>,
    #[serde(default)]
    pub pool: PoolSettings,
    /// Bounds the startup ping of each replica; every replica gets the full timeout.
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
}

impl ClusterConfig {
    pub fn new(driver: Driver, primary: Config) -> Self {
        Self {
            driver,
            primary,
            replicas: Vec::new(),
            pool: PoolSettings::default(),
            connect_timeout_secs: None,
        }
    }

    pub fn replica(mut self, replica: Config) -> Self {
        self.replicas.push(replica);
        self
    }

    pub fn from_toml_str(source: &str) -> Result<Self, DbError> {
        toml::from_str(source).map_err(|e| DbError::Configuration(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| DbError::Configuration(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    pub fn primary_url(&self) -> String {
        self.primary.url(self.driver)
    }

    pub fn replica_urls(&self) -> Vec<String> {
        self.replicas
            .iter()
            .map(|replica| replica.url(self.driver))
            .collect()
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }
}
