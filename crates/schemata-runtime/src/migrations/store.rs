//! Migration files on disk.
//!
//! Migrations are pairs of files named `<version>_<name>.up.sql` and
//! `<version>_<name>.down.sql`. The down script is optional.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex_lite::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use schemata_core::config::{MalformedPolicy, MigrationsConfig, VersionScheme};
use schemata_core::error::{Result, SchemataError};
use schemata_core::{compare_versions, Direction, MigrationFile};

/// Reads and writes migration files in one directory.
#[derive(Debug, Clone)]
pub struct MigrationStore {
    dir: PathBuf,
    versioning: VersionScheme,
    version_width: usize,
    malformed: MalformedPolicy,
}

/// Files written by [`MigrationStore::write`].
#[derive(Debug, Clone)]
pub struct WrittenFiles {
    pub name: String,
    pub up_path: PathBuf,
    pub down_path: Option<PathBuf>,
}

struct UpFile {
    name: String,
    path: PathBuf,
    down_path: Option<PathBuf>,
}

impl MigrationStore {
    /// A store over `dir` with default versioning and strict filename checks.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::from_config(&MigrationsConfig {
            dir: dir.into(),
            ..Default::default()
        })
    }

    pub fn from_config(config: &MigrationsConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            versioning: config.versioning,
            version_width: config.version_width,
            malformed: config.malformed,
        }
    }

    pub fn with_versioning(mut self, versioning: VersionScheme) -> Self {
        self.versioning = versioning;
        self
    }

    pub fn with_malformed_policy(mut self, policy: MalformedPolicy) -> Self {
        self.malformed = policy;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Every migration in the directory, ascending by version.
    pub fn list_all(&self) -> Result<Vec<MigrationFile>> {
        if !self.dir.is_dir() {
            return Err(SchemataError::DirectoryNotFound(self.dir.clone()));
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        let mut ups: HashMap<String, UpFile> = HashMap::new();
        let mut downs = Vec::new();

        for path in paths {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                debug!("Ignoring non UTF-8 file name {:?}", path);
                continue;
            };
            if !file_name.ends_with(".sql") {
                debug!("Ignoring non-SQL file {}", file_name);
                continue;
            }

            let Some((version, name, direction)) = parse_file_name(file_name) else {
                self.reject_malformed(
                    file_name,
                    "expected <version>_<name>.up.sql or <version>_<name>.down.sql",
                )?;
                continue;
            };

            match direction {
                Direction::Up => {
                    if ups.contains_key(&version) {
                        return Err(SchemataError::DuplicateVersion(version));
                    }
                    ups.insert(
                        version,
                        UpFile {
                            name,
                            path: path.clone(),
                            down_path: None,
                        },
                    );
                }
                Direction::Down => downs.push((version, name, file_name.to_string(), path.clone())),
            }
        }

        for (version, name, file_name, path) in downs {
            match ups.get_mut(&version) {
                Some(up) if up.name == name => up.down_path = Some(path),
                _ => self.reject_malformed(&file_name, "down script has no matching up script")?,
            }
        }

        let mut migrations = ups
            .into_iter()
            .map(|(version, up)| load_pair(version, up))
            .collect::<Result<Vec<_>>>()?;
        migrations.sort_by(|a, b| compare_versions(&a.version, &b.version));

        debug!("Loaded {} migrations from {}", migrations.len(), self.dir.display());
        Ok(migrations)
    }

    /// A single migration, by version or by its full `<version>_<name>` stem.
    pub fn read(&self, version: &str) -> Result<MigrationFile> {
        self.list_all()?
            .into_iter()
            .find(|m| m.version == version || m.full_name() == version)
            .ok_or_else(|| SchemataError::VersionNotFound(version.to_string()))
    }

    /// Raw text of the up or down script.
    pub fn read_sql(&self, version: &str, direction: Direction) -> Result<String> {
        let migration = self.read(version)?;
        migration
            .sql(direction)
            .map(str::to_string)
            .ok_or(SchemataError::NoDownScript(migration.version))
    }

    /// The version a new migration should get, given the existing ones.
    ///
    /// The result always sorts after every existing version.
    pub fn next_version(&self, existing: &[String], now: DateTime<Utc>) -> String {
        let latest = existing
            .iter()
            .filter(|v| v.parse::<u128>().is_ok())
            .max_by(|a, b| compare_versions(a, b));

        match self.versioning {
            VersionScheme::Sequential => {
                let width = existing
                    .iter()
                    .map(String::len)
                    .max()
                    .unwrap_or_default()
                    .max(self.version_width);
                match latest {
                    Some(latest) => increment(latest, width),
                    None => format!("{:0width$}", 1, width = width),
                }
            }
            VersionScheme::Timestamp => {
                let stamp = now.format("%Y%m%d%H%M%S").to_string();
                match latest {
                    Some(latest) if compare_versions(&stamp, latest) != Ordering::Greater => {
                        increment(latest, latest.len())
                    }
                    _ => stamp,
                }
            }
        }
    }

    /// Write a new migration pair.
    ///
    /// Fails with `AlreadyExists` if any file for `version` is present. The
    /// down file is only written when `down_sql` has content.
    pub fn write(
        &self,
        version: &str,
        name: &str,
        up_sql: &str,
        down_sql: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<WrittenFiles> {
        if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SchemataError::InvalidArgument(format!(
                "version must be digits, got '{}'",
                version
            )));
        }
        let safe_name = sanitize_name(name)?;

        fs::create_dir_all(&self.dir)?;
        if self.version_exists(version)? {
            return Err(SchemataError::AlreadyExists(version.to_string()));
        }

        let stem = format!("{}_{}", version, safe_name);
        let created = now.to_rfc3339();

        let up_path = self.dir.join(format!("{}{}", stem, Direction::Up.suffix()));
        let up_content = format!(
            "-- Migration: {}\n-- Created: {}\n-- Description: {}\n\n{}\n",
            stem,
            created,
            name.trim(),
            up_sql.trim_end()
        );
        create_new(&up_path, &up_content, version)?;

        let down_path = match down_sql.filter(|sql| !sql.trim().is_empty()) {
            Some(down_sql) => {
                let path = self.dir.join(format!("{}{}", stem, Direction::Down.suffix()));
                let content = format!(
                    "-- Rollback: {}\n-- Created: {}\n\n{}\n",
                    stem,
                    created,
                    down_sql.trim_end()
                );
                if let Err(e) = create_new(&path, &content, version) {
                    let _ = fs::remove_file(&up_path);
                    return Err(e);
                }
                Some(path)
            }
            None => None,
        };

        debug!(version, path = %up_path.display(), "Wrote migration");
        Ok(WrittenFiles {
            name: safe_name,
            up_path,
            down_path,
        })
    }

    fn version_exists(&self, version: &str) -> Result<bool> {
        let prefix = format!("{}_", version);
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn reject_malformed(&self, file: &str, reason: &str) -> Result<()> {
        match self.malformed {
            MalformedPolicy::Strict => Err(SchemataError::MalformedFilename {
                file: file.to_string(),
                reason: reason.to_string(),
            }),
            MalformedPolicy::Lenient => {
                warn!(file, "Skipping migration file: {}", reason);
                Ok(())
            }
        }
    }
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Normalize a migration name for use in a file name.
///
/// Lowercases, turns spaces and hyphens into underscores and drops anything
/// else outside `[a-z0-9_]`.
pub fn sanitize_name(name: &str) -> Result<String> {
    let safe: String = name
        .trim()
        .to_lowercase()
        .chars()
        .filter_map(|c| match c {
            ' ' | '-' => Some('_'),
            c if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' => Some(c),
            _ => None,
        })
        .collect();

    if safe.trim_matches('_').is_empty() {
        return Err(SchemataError::InvalidArgument(format!(
            "migration name '{}' has no usable characters",
            name
        )));
    }
    Ok(safe)
}

fn file_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d+)_([A-Za-z0-9_\-]+)\.(up|down)\.sql$")
            .expect("migration file pattern is valid")
    })
}

fn parse_file_name(file_name: &str) -> Option<(String, String, Direction)> {
    let caps = file_name_pattern().captures(file_name)?;
    let direction = match &caps[3] {
        "up" => Direction::Up,
        _ => Direction::Down,
    };
    Some((caps[1].to_string(), caps[2].to_string(), direction))
}

fn load_pair(version: String, up: UpFile) -> Result<MigrationFile> {
    let bytes = fs::read(&up.path)?;
    let checksum = checksum(&bytes);
    let up_sql = String::from_utf8(bytes).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("{} is not valid UTF-8: {}", up.path.display(), e),
        )
    })?;
    let down_sql = up.down_path.as_ref().map(fs::read_to_string).transpose()?;

    Ok(MigrationFile {
        version,
        name: up.name,
        up_sql,
        down_sql,
        checksum,
        up_path: up.path,
        down_path: up.down_path,
    })
}

/// `latest + 1`, zero-padded to `width`.
fn increment(latest: &str, width: usize) -> String {
    let next = latest.parse::<u128>().map(|n| n + 1).unwrap_or(1);
    format!("{:0width$}", next, width = width)
}

fn create_new(path: &Path, content: &str, version: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => SchemataError::AlreadyExists(version.to_string()),
            _ => SchemataError::Io(e),
        })?;
    file.write_all(content.as_bytes())?;
    Ok(())
}
