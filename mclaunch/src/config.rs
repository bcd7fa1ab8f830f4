//! Optional `mclaunch.toml` configuration, supplying first-run defaults for the CLI
//! before a [`PersistentState`](crate::state::PersistentState) exists on disk.
//!
//! This layer never overrides an existing `launcherCache.json`; it only seeds the
//! values used the very first time the launcher runs on a machine.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;


/// First-run defaults read from an optional `mclaunch.toml` file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub default_account: Option<String>,
    #[serde(default)]
    pub default_game_dir: Option<PathBuf>,
    #[serde(default)]
    pub default_allocated_ram: Option<u32>,
}

impl Config {

    /// Read and parse the configuration file at `path`. A missing file yields the
    /// all-`None` default rather than an error, since this layer is entirely optional.
    pub fn load(path: impl AsRef<Path>) -> Result<Config, Error> {

        let path = path.as_ref();

        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Config::default()),
            Err(e) => return Err(Error::Io { error: e, path: path.to_string_lossy().into() }),
        };

        toml::from_str(&text).map_err(|e| Error::Toml { error: e, path: path.to_string_lossy().into() })

    }

    /// Apply these defaults onto freshly-initialized [`LauncherSettings`](crate::state::LauncherSettings),
    /// only filling in fields that are still at their built-in defaults.
    pub fn apply_to(&self, settings: &mut crate::state::LauncherSettings) {
        if let Some(dir) = &self.default_game_dir {
            settings.game_dir = dir.clone();
        }
        if let Some(ram) = self.default_allocated_ram {
            settings.allocated_ram = ram;
        }
    }

}

/// Errors raised while reading or parsing `mclaunch.toml`.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("io error at {path}: {error}")]
    Io {
        #[source]
        error: io::Error,
        path: Box<str>,
    },
    #[error("malformed configuration at {path}: {error}")]
    Toml {
        #[source]
        error: toml::de::Error,
        path: Box<str>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join("mclaunch.toml")).unwrap();
        assert!(config.default_account.is_none());
        assert!(config.default_game_dir.is_none());
    }

    #[test]
    fn parses_present_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mclaunch.toml");
        fs::write(&path, "default_account = \"Steve\"\ndefault_allocated_ram = 4096\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.default_account.as_deref(), Some("Steve"));
        assert_eq!(config.default_allocated_ram, Some(4096));
    }

    #[test]
    fn apply_to_only_overrides_present_fields() {
        let config = Config { default_allocated_ram: Some(8192), ..Config::default() };
        let mut settings = crate::state::LauncherSettings::default();
        let original_dir = settings.game_dir.clone();

        config.apply_to(&mut settings);

        assert_eq!(settings.allocated_ram, 8192);
        assert_eq!(settings.game_dir, original_dir);
    }
}
