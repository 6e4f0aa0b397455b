//! Configuration management for the client.

use std::env;
use std::str::FromStr;

/// Default primary-key column when the metadata does not flag one.
pub const DEFAULT_PRIMARY_KEY: &str = "id";

/// How UI writes flow back into the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BindingMode {
    /// Reads and writes
    #[default]
    TwoWay,
    /// Reads only; `Session::set` is rejected
    OneWay,
}

impl FromStr for BindingMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "twoway" | "two-way" | "two_way" => Ok(BindingMode::TwoWay),
            "oneway" | "one-way" | "one_way" => Ok(BindingMode::OneWay),
            _ => Err(ConfigError::InvalidBindingMode(s.to_string())),
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Service root, always ending in `/`
    pub service_url: String,
    /// Query parameters sent with every request, in order
    pub service_url_params: Vec<(String, String)>,
    /// Queue writes for `submit_changes` instead of sending them directly
    pub use_batch: bool,
    pub binding_mode: BindingMode,
    /// Primary-key column used when the metadata flags none
    pub primary_key: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Config {
    /// Build a configuration for a service URL.
    ///
    /// A query string on the URL is split off into `service_url_params`.
    pub fn new(service_url: &str) -> Result<Self, ConfigError> {
        let service_url = service_url.trim();
        if service_url.is_empty() {
            return Err(ConfigError::MissingServiceUrl);
        }

        let (base, query) = match service_url.split_once('?') {
            Some((base, query)) => (base, query),
            None => (service_url, ""),
        };
        if base.is_empty() {
            return Err(ConfigError::InvalidServiceUrl(service_url.to_string()));
        }

        let mut service_url_params = Vec::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = urlencoding::decode(key)
                .map_err(|_| ConfigError::InvalidServiceUrl(service_url.to_string()))?;
            let value = urlencoding::decode(value)
                .map_err(|_| ConfigError::InvalidServiceUrl(service_url.to_string()))?;
            service_url_params.push((key.into_owned(), value.into_owned()));
        }

        let mut base = base.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }

        Ok(Self {
            service_url: base,
            service_url_params,
            use_batch: false,
            binding_mode: BindingMode::default(),
            primary_key: DEFAULT_PRIMARY_KEY.to_string(),
            user: None,
            password: None,
        })
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let service_url =
            lookup("CRUDSYNC_SERVICE_URL").ok_or(ConfigError::MissingServiceUrl)?;
        let mut config = Self::new(&service_url)?;

        if let Some(raw) = lookup("CRUDSYNC_USE_BATCH") {
            config.use_batch = match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => return Err(ConfigError::InvalidUseBatch(raw)),
            };
        }

        if let Some(raw) = lookup("CRUDSYNC_BINDING_MODE") {
            config.binding_mode = raw.parse()?;
        }

        if let Some(primary_key) = lookup("CRUDSYNC_PRIMARY_KEY") {
            config = config.with_primary_key(primary_key)?;
        }

        config.user = lookup("CRUDSYNC_USER");
        config.password = lookup("CRUDSYNC_PASSWORD");

        Ok(config)
    }

    pub fn with_batch(mut self, use_batch: bool) -> Self {
        self.use_batch = use_batch;
        self
    }

    pub fn with_binding_mode(mut self, mode: BindingMode) -> Self {
        self.binding_mode = mode;
        self
    }

    pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Result<Self, ConfigError> {
        let primary_key = primary_key.into();
        if primary_key.trim().is_empty() {
            return Err(ConfigError::EmptyPrimaryKey);
        }
        self.primary_key = primary_key;
        Ok(self)
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// Add a query parameter sent with every request.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.service_url_params.push((key.into(), value.into()));
        self
    }

    /// Whether both user and password are set.
    pub fn has_credentials(&self) -> bool {
        self.user.is_some() && self.password.is_some()
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("CRUDSYNC_SERVICE_URL environment variable is required")]
    MissingServiceUrl,

    #[error("Invalid service URL: {0}")]
    InvalidServiceUrl(String),

    #[error("Invalid CRUDSYNC_USE_BATCH value: {0}")]
    InvalidUseBatch(String),

    #[error("Invalid binding mode: {0}")]
    InvalidBindingMode(String),

    #[error("Primary key must not be empty")]
    EmptyPrimaryKey,
}
