use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How new migration versions are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionScheme {
    /// Zero-padded integers: `001`, `002`, ...
    #[default]
    Sequential,
    /// UTC timestamps: `20261018093000`.
    Timestamp,
}

/// What to do with `.sql` files that don't follow the naming convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedPolicy {
    /// Fail the listing.
    #[default]
    Strict,
    /// Log a warning and skip the file.
    Lenient,
}

/// Migration file store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationsConfig {
    /// Directory holding `<version>_<name>.up.sql` / `.down.sql` files.
    #[serde(default = "default_dir")]
    pub dir: PathBuf,

    #[serde(default)]
    pub versioning: VersionScheme,

    /// Minimum digits for sequential versions.
    #[serde(default = "default_version_width")]
    pub version_width: usize,

    #[serde(default)]
    pub malformed: MalformedPolicy,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            versioning: VersionScheme::default(),
            version_width: default_version_width(),
            malformed: MalformedPolicy::default(),
        }
    }
}

fn default_dir() -> PathBuf {
    PathBuf::from("./migrations")
}

fn default_version_width() -> usize {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_migrations_config() {
        let config = MigrationsConfig::default();
        assert_eq!(config.dir, PathBuf::from("./migrations"));
        assert_eq!(config.versioning, VersionScheme::Sequential);
        assert_eq!(config.version_width, 3);
        assert_eq!(config.malformed, MalformedPolicy::Strict);
    }

    #[test]
    fn test_parse_migrations_config() {
        let toml = r#"
            dir = "db/migrations"
            versioning = "timestamp"
            malformed = "lenient"
        "#;

        let config: MigrationsConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.dir, PathBuf::from("db/migrations"));
        assert_eq!(config.versioning, VersionScheme::Timestamp);
        assert_eq!(config.malformed, MalformedPolicy::Lenient);
    }
}
