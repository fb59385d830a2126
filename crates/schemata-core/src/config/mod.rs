mod database;
mod logging;
mod migrations;

pub use database::{DatabaseConfig, DbType};
pub use logging::LoggingConfig;
pub use migrations::{MalformedPolicy, MigrationsConfig, VersionScheme};

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, SchemataError};

/// Prefix for environment overrides, e.g. `SCHEMATA_DB_TYPE`.
pub const ENV_PREFIX: &str = "SCHEMATA_";

/// Root configuration for schemata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemataConfig {
    /// Target database.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Migration file store.
    #[serde(default)]
    pub migrations: MigrationsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SchemataConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SchemataError::Config(format!("Failed to read config file: {}", e)))?;

        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self> {
        // Substitute environment variables
        let content = substitute_env_vars(content);

        toml::from_str(&content)
            .map_err(|e| SchemataError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Resolve the effective configuration.
    ///
    /// Reads `path` when it exists (defaults otherwise), applies the
    /// `SCHEMATA_*` environment overrides and validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(path)?,
            Some(path) => {
                tracing::debug!("Config file {} not found, using defaults", path.display());
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_env_with(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SCHEMATA_*` overrides using the given variable lookup.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, name)).filter(|v| !v.trim().is_empty())
        };

        if let Some(db_type) = var("DB_TYPE") {
            self.database.db_type = db_type.parse()?;
        }
        if let Some(url) = var("DB_URL") {
            self.database.url = Some(url);
        }
        if let Some(path) = var("DB_PATH") {
            self.database.path = path.into();
        }
        if let Some(host) = var("DB_HOST") {
            self.database.host = host;
        }
        if let Some(port) = var("DB_PORT") {
            let port = port.trim().parse::<u16>().map_err(|_| {
                SchemataError::Config(format!("{}DB_PORT is not a valid port: {}", ENV_PREFIX, port))
            })?;
            self.database.port = Some(port);
        }
        if let Some(database) = var("DB_DATABASE") {
            self.database.database = Some(database);
        }
        if let Some(user) = var("DB_USER") {
            self.database.user = Some(user);
        }
        if let Some(password) = var("DB_PASSWORD") {
            self.database.password = Some(password);
        }
        if let Some(dir) = var("MIGRATIONS_DIR") {
            self.migrations.dir = dir.into();
        }
        if let Some(level) = var("LOG_LEVEL") {
            self.logging.level = level.parse()?;
        }

        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        self.database.validate()?;

        if !(1..=18).contains(&self.migrations.version_width) {
            return Err(SchemataError::Config(format!(
                "migrations.version_width must be between 1 and 18, got {}",
                self.migrations.version_width
            )));
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}.
fn substitute_env_vars(content: &str) -> String {
    let mut result = content.to_string();
    let re = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("env var pattern is valid");

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = SchemataConfig::default();
        assert_eq!(config.database.db_type, DbType::Sqlite);
        assert_eq!(config.migrations.dir, PathBuf::from("./migrations"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [database]
            db_type = "mysql"
            host = "127.0.0.1"
            port = 3307
            database = "shop"
            user = "root"

            [migrations]
            dir = "sql"
            versioning = "timestamp"

            [logging]
            level = "debug"
            json_format = true
        "#;

        let config = SchemataConfig::parse_toml(toml).unwrap();
        assert_eq!(config.database.db_type, DbType::Mysql);
        assert_eq!(config.database.effective_port(), Some(3307));
        assert_eq!(config.migrations.versioning, VersionScheme::Timestamp);
        assert!(config.logging.json_format);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("SCHEMATA_TEST_DB_PASSWORD", "s3cret");

        let toml = r#"
            [database]
            password = "${SCHEMATA_TEST_DB_PASSWORD}"
        "#;

        let config = SchemataConfig::parse_toml(toml).unwrap();
        assert_eq!(config.database.password.as_deref(), Some("s3cret"));

        std::env::remove_var("SCHEMATA_TEST_DB_PASSWORD");
    }

    #[test]
    fn test_env_overlay() {
        let mut config = SchemataConfig::default();
        config
            .apply_env_with(env(&[
                ("SCHEMATA_DB_TYPE", "postgres"),
                ("SCHEMATA_DB_PORT", "6543"),
                ("SCHEMATA_DB_DATABASE", "shop"),
                ("SCHEMATA_DB_USER", "app"),
                ("SCHEMATA_MIGRATIONS_DIR", "db/migrations"),
                ("SCHEMATA_DB_HOST", ""),
            ]))
            .unwrap();

        assert_eq!(config.database.db_type, DbType::Postgres);
        assert_eq!(config.database.port, Some(6543));
        assert_eq!(config.database.host, "localhost");
        assert_eq!(config.migrations.dir, PathBuf::from("db/migrations"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overlay_rejects_bad_port() {
        let mut config = SchemataConfig::default();
        let err = config
            .apply_env_with(env(&[("SCHEMATA_DB_PORT", "not-a-port")]))
            .unwrap_err();
        assert!(matches!(err, SchemataError::Config(_)));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = SchemataConfig::load(Some(Path::new("/nonexistent/schemata.toml")));
        assert!(config.is_ok());
    }

    #[test]
    fn test_invalid_version_width() {
        let mut config = SchemataConfig::default();
        config.migrations.version_width = 0;
        assert!(matches!(
            config.validate(),
            Err(SchemataError::Config(_))
        ));
    }
}
