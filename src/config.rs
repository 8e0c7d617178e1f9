//! Configuration handling for the platform datasource.
//!
//! Pool parameters arrive as flat properties under a namespace prefix
//! (`platform.domain.datasource.*`, or `PLATFORM_DOMAIN_DATASOURCE_*` in the
//! environment). They are validated once at startup; anything malformed is a
//! `ConfigurationError` rather than a failure on the first query.

use crate::error::{DataError, DataResult};
use crate::models::DatabaseType;
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Namespace prefix of the platform datasource properties.
pub const DATASOURCE_PREFIX: &str = "platform.domain.datasource";

pub const DEFAULT_POOL_NAME: &str = "platform";
pub const DEFAULT_MAXIMUM_POOL_SIZE: u32 = 10;
pub const DEFAULT_MAXIMUM_POOL_SIZE_SQLITE: u32 = 1;
pub const DEFAULT_MINIMUM_IDLE: u32 = 1;
pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 600_000;
pub const DEFAULT_MAX_LIFETIME_MS: u64 = 1_800_000;

pub const DEFAULT_CONFIG_LOCATION: &str = "classpath:mybatis-config.xml";
pub const DEFAULT_MAPPER_LOCATIONS: &str = "classpath:mybatis-mapper/**/*.xml";
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Properties of the one logical datasource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSourceProperties {
    pub pool_name: String,
    pub db_type: DatabaseType,
    /// Full connection URL with credentials applied (sensitive - not logged).
    pub url: String,
    pub maximum_pool_size: u32,
    pub minimum_idle: u32,
    /// How long `acquire`/`begin` wait for a free connection.
    pub connection_timeout: Duration,
    /// `None` keeps idle connections forever.
    pub idle_timeout: Option<Duration>,
    pub max_lifetime: Option<Duration>,
    /// Ping a connection before handing it out.
    pub validate_on_acquire: bool,
}

/// Property keys, compared after normalization (lowercase, no `-`/`_`).
const KNOWN_KEYS: &[&str] = &[
    "url",
    "jdbcurl",
    "username",
    "password",
    "poolname",
    "maximumpoolsize",
    "minimumidle",
    "connectiontimeout",
    "idletimeout",
    "maxlifetime",
    "validateonacquire",
];

impl DataSourceProperties {
    /// Build properties for a connection URL with every other value defaulted.
    pub fn new(url: impl Into<String>) -> DataResult<Self> {
        let mut raw = BTreeMap::new();
        raw.insert("url".to_string(), url.into());
        Self::from_raw(raw)
    }

    /// Read the properties under `prefix` from a flat key/value source.
    ///
    /// Keys outside the prefix are ignored. Keys inside the prefix must be
    /// known; both `prefix.maximum-pool-size` and
    /// `PREFIX_MAXIMUM_POOL_SIZE` spellings are accepted.
    pub fn from_source<I, K, V>(prefix: &str, entries: I) -> DataResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let dotted_prefix = format!("{}.", prefix.to_ascii_lowercase());
        let env_prefix = format!("{}_", prefix.to_ascii_uppercase().replace(['.', '-'], "_"));

        let mut raw = BTreeMap::new();
        for (key, value) in entries {
            let key = key.as_ref();
            let rest = if key.to_ascii_lowercase().starts_with(&dotted_prefix) {
                &key[dotted_prefix.len()..]
            } else if key.starts_with(&env_prefix) {
                &key[env_prefix.len()..]
            } else {
                continue;
            };

            let normalized = normalize_key(rest);
            if !KNOWN_KEYS.contains(&normalized.as_str()) {
                return Err(DataError::configuration(
                    "Unknown datasource property",
                    key.to_string(),
                ));
            }
            raw.insert(normalized, value.into());
        }

        Self::from_raw(raw)
    }

    fn from_raw(mut raw: BTreeMap<String, String>) -> DataResult<Self> {
        let url = raw
            .remove("url")
            .or_else(|| raw.remove("jdbcurl"))
            .ok_or_else(|| DataError::configuration("Missing datasource url", "url"))?;
        let url = url.trim().trim_start_matches("jdbc:").to_string();

        let db_type = DatabaseType::from_connection_string(&url).ok_or_else(|| {
            DataError::configuration("Unknown database type in connection string", "url")
        })?;

        let url = apply_credentials(
            &url,
            db_type,
            raw.remove("username").as_deref(),
            raw.remove("password").as_deref(),
        )?;

        let default_max = match db_type {
            DatabaseType::SQLite => DEFAULT_MAXIMUM_POOL_SIZE_SQLITE,
            _ => DEFAULT_MAXIMUM_POOL_SIZE,
        };

        let props = Self {
            pool_name: raw
                .remove("poolname")
                .unwrap_or_else(|| DEFAULT_POOL_NAME.to_string()),
            db_type,
            url,
            maximum_pool_size: parse_number(&mut raw, "maximumpoolsize")?.unwrap_or(default_max),
            minimum_idle: parse_number(&mut raw, "minimumidle")?.unwrap_or(DEFAULT_MINIMUM_IDLE),
            connection_timeout: Duration::from_millis(
                parse_number(&mut raw, "connectiontimeout")?
                    .unwrap_or(DEFAULT_CONNECTION_TIMEOUT_MS),
            ),
            idle_timeout: parse_millis_or_never(&mut raw, "idletimeout", DEFAULT_IDLE_TIMEOUT_MS)?,
            max_lifetime: parse_millis_or_never(&mut raw, "maxlifetime", DEFAULT_MAX_LIFETIME_MS)?,
            validate_on_acquire: parse_bool(&mut raw, "validateonacquire")?.unwrap_or(true),
        };

        props.validate()?;
        Ok(props)
    }

    /// Builder-style override of the pool bounds.
    pub fn with_pool_size(mut self, minimum_idle: u32, maximum_pool_size: u32) -> DataResult<Self> {
        self.minimum_idle = minimum_idle;
        self.maximum_pool_size = maximum_pool_size;
        self.validate()?;
        Ok(self)
    }

    /// Builder-style override of the acquire timeout.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> DataResult<Self> {
        self.connection_timeout = timeout;
        self.validate()?;
        Ok(self)
    }

    /// Validate pool bounds and timeouts.
    pub fn validate(&self) -> DataResult<()> {
        if self.maximum_pool_size == 0 {
            return Err(DataError::configuration(
                "maximum-pool-size must be greater than 0",
                "maximum-pool-size",
            ));
        }
        if self.minimum_idle > self.maximum_pool_size {
            return Err(DataError::configuration(
                format!(
                    "minimum-idle ({}) cannot exceed maximum-pool-size ({})",
                    self.minimum_idle, self.maximum_pool_size
                ),
                "minimum-idle",
            ));
        }
        if self.connection_timeout.is_zero() {
            return Err(DataError::configuration(
                "connection-timeout must be greater than 0",
                "connection-timeout",
            ));
        }
        Ok(())
    }

    /// Get a display-safe version of the url (password masked).
    pub fn masked_url(&self) -> String {
        if let Some(at_pos) = self.url.find('@') {
            if let Some(colon_pos) = self.url[..at_pos].rfind(':') {
                let prefix = &self.url[..colon_pos + 1];
                let suffix = &self.url[at_pos..];
                if !prefix.ends_with("//") && !prefix.ends_with(":/") {
                    return format!("{}****{}", prefix, suffix);
                }
            }
        }
        self.url.clone()
    }
}

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '-' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

fn parse_number<T: std::str::FromStr>(
    raw: &mut BTreeMap<String, String>,
    key: &str,
) -> DataResult<Option<T>> {
    raw.remove(key)
        .map(|v| {
            v.trim().parse::<T>().map_err(|_| {
                DataError::configuration(format!("Invalid number '{}'", v), key.to_string())
            })
        })
        .transpose()
}

fn parse_millis_or_never(
    raw: &mut BTreeMap<String, String>,
    key: &str,
    default_ms: u64,
) -> DataResult<Option<Duration>> {
    let ms = parse_number::<u64>(raw, key)?.unwrap_or(default_ms);
    Ok((ms > 0).then(|| Duration::from_millis(ms)))
}

fn parse_bool(raw: &mut BTreeMap<String, String>, key: &str) -> DataResult<Option<bool>> {
    raw.remove(key)
        .map(|v| {
            if v.eq_ignore_ascii_case("true") {
                Ok(true)
            } else if v.eq_ignore_ascii_case("false") {
                Ok(false)
            } else {
                Err(DataError::configuration(
                    format!("Invalid boolean '{}'", v),
                    key.to_string(),
                ))
            }
        })
        .transpose()
}

/// Put username/password into a server url; SQLite has no credentials.
fn apply_credentials(
    url: &str,
    db_type: DatabaseType,
    username: Option<&str>,
    password: Option<&str>,
) -> DataResult<String> {
    if db_type == DatabaseType::SQLite || (username.is_none() && password.is_none()) {
        return Ok(url.to_string());
    }

    let mut parsed = Url::parse(url)
        .map_err(|e| DataError::configuration(format!("Invalid URL: {e}"), "url"))?;
    if let Some(user) = username {
        parsed
            .set_username(user)
            .map_err(|_| DataError::configuration("URL cannot carry a username", "username"))?;
    }
    if let Some(pass) = password {
        parsed
            .set_password(Some(pass))
            .map_err(|_| DataError::configuration("URL cannot carry a password", "password"))?;
    }
    Ok(parsed.to_string())
}

/// Command line configuration for the `platform-datasource` binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "platform-datasource",
    about = "Builds the platform datasource with its query builder and mapper backends",
    version,
    author
)]
pub struct Config {
    /// Datasource property override, e.g. platform.domain.datasource.url=sqlite:app.db
    /// Applied on top of PLATFORM_DOMAIN_DATASOURCE_* environment variables.
    #[arg(short = 'p', long = "property", value_name = "KEY=VALUE")]
    pub properties: Vec<String>,

    /// Directories searched for classpath: resources, in order
    #[arg(
        long = "resource-root",
        value_name = "DIR",
        env = "PLATFORM_RESOURCE_ROOTS",
        value_delimiter = ',',
        default_value = "resources"
    )]
    pub resource_roots: Vec<PathBuf>,

    /// Location of the master mapper configuration descriptor
    #[arg(long, default_value = DEFAULT_CONFIG_LOCATION, env = "PLATFORM_MAPPER_CONFIG")]
    pub config_location: String,

    /// Glob patterns of the mapping descriptors
    #[arg(
        long,
        default_value = DEFAULT_MAPPER_LOCATIONS,
        env = "PLATFORM_MAPPER_LOCATIONS",
        value_delimiter = ','
    )]
    pub mapper_locations: Vec<String>,

    /// Query builder statement timeout in seconds
    #[arg(long, default_value_t = DEFAULT_QUERY_TIMEOUT_SECS, env = "PLATFORM_QUERY_TIMEOUT")]
    pub query_timeout: u64,

    /// Query builder batch chunk size
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE, env = "PLATFORM_BATCH_SIZE")]
    pub batch_size: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "PLATFORM_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "PLATFORM_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Build every component and report the pool status (default)
    Check,
    /// Look up a user through the mapper backend and print it as JSON
    FindUser {
        /// Business user id
        user_id: String,
    },
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Resolve datasource properties from the environment plus `--property`
    /// overrides.
    pub fn datasource_properties(&self) -> DataResult<DataSourceProperties> {
        let mut entries: Vec<(String, String)> = std::env::vars().collect();
        for property in &self.properties {
            let (key, value) = property.split_once('=').ok_or_else(|| {
                DataError::configuration("Expected KEY=VALUE", property.clone())
            })?;
            entries.push((key.trim().to_string(), value.to_string()));
        }
        DataSourceProperties::from_source(DATASOURCE_PREFIX, entries)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout)
    }
}
