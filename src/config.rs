//! Layered configuration: defaults, optional config files, then
//! `FHIR__`-prefixed environment variables.

use std::collections::HashMap;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub store: StoreConfig,
    pub workers: WorkerConfig,
    pub tenants: TenantsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            store: StoreConfig::default(),
            workers: WorkerConfig::default(),
            tenants: TenantsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Externally visible base URL used in bundle links and fullUrls.
    pub base_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            base_url: None,
        }
    }
}

impl ServerConfig {
    pub fn public_base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.host, self.port))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/fhir".to_string(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset.
    pub level: String,
    pub json: bool,
    /// Log to daily-rolled files in this directory instead of stdout.
    pub directory: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Retries for bundle transactions that fail on storage conflicts.
    pub transaction_retries: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            transaction_retries: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub max_concurrent_jobs: usize,
    pub poll_interval_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            poll_interval_seconds: 5,
        }
    }
}

/// How strictly a bucket validates incoming resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    Disabled,
    #[default]
    Lenient,
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationProfile {
    #[default]
    Basic,
    UsCore,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct BucketConfig {
    pub validation_mode: ValidationMode,
    pub validation_profile: ValidationProfile,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TenantsConfig {
    pub default_tenant: String,
    /// Per-tenant bucket settings. An empty map admits only the
    /// default tenant with default settings.
    pub buckets: HashMap<String, BucketConfig>,
}

impl Default for TenantsConfig {
    fn default() -> Self {
        Self {
            default_tenant: "default".to_string(),
            buckets: HashMap::new(),
        }
    }
}

impl TenantsConfig {
    /// Bucket settings for a tenant, or None if the tenant is unknown.
    pub fn resolve_bucket(&self, tenant: &str) -> Option<BucketConfig> {
        if let Some(bucket) = self.buckets.get(tenant) {
            return Some(bucket.clone());
        }
        if self.buckets.is_empty() && tenant == self.default_tenant {
            return Some(BucketConfig::default());
        }
        None
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("FHIR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buckets_admit_only_default_tenant() {
        let tenants = TenantsConfig::default();
        assert!(tenants.resolve_bucket("default").is_some());
        assert!(tenants.resolve_bucket("acme").is_none());
    }

    #[test]
    fn configured_bucket_wins() {
        let mut tenants = TenantsConfig::default();
        tenants.buckets.insert(
            "acme".to_string(),
            BucketConfig {
                validation_mode: ValidationMode::Strict,
                validation_profile: ValidationProfile::UsCore,
            },
        );
        let bucket = tenants.resolve_bucket("acme").unwrap();
        assert_eq!(bucket.validation_mode, ValidationMode::Strict);
        // default tenant no longer implicit once buckets are configured
        assert!(tenants.resolve_bucket("default").is_none());
    }
}
