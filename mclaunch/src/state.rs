//! Persistent launcher state: settings, the selected account and the list of known
//! accounts, stored in a single `launcherCache.json` file.

use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::msa::Account;
use crate::path::PathBufExt;


/// The default allocated RAM, in MB, for a freshly initialized state.
const DEFAULT_ALLOCATED_RAM: u32 = 2048;

/// A file-backed store for the launcher's persistent state. Mirrors the accounts
/// database pattern used elsewhere in this crate, but stores settings and the
/// last-played/selected-account pointers alongside the accounts themselves.
#[derive(Debug)]
pub struct PersistentState {
    file: PathBuf,
}

impl PersistentState {

    /// Create a state backed by the given file. The file and its parent directory are
    /// not required to exist yet.
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self { file: file.into() }
    }

    /// Path to `launcherCache.json` under the OS-standard Minecraft directory, if one
    /// could be determined for this platform.
    pub fn default_file() -> Option<PathBuf> {
        crate::base::default_main_dir().map(|dir| dir.to_path_buf().joined("launcherCache.json"))
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Load the state from disk, initializing defaults if the file does not exist yet.
    pub fn load(&self) -> Result<StateData, Error> {

        let reader = match File::open(&self.file) {
            Ok(reader) => reader,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(StateData::default()),
            Err(e) => return Err(Error::new_io(e, &self.file)),
        };

        let mut deserializer = serde_json::Deserializer::from_reader(BufReader::new(reader));
        serde_path_to_error::deserialize(&mut deserializer)
            .map_err(|e| Error::new_json(e, &self.file))

    }

    /// Persist the given state as a whole, pretty-printed JSON file. The write goes to
    /// a temporary file in the same directory first, then is renamed over the target,
    /// so a crash mid-write cannot leave a truncated `launcherCache.json` behind.
    pub fn save(&self, data: &StateData) -> Result<(), Error> {

        if let Some(parent) = self.file.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::new_io(e, parent))?;
        }

        let tmp_file = self.file.with_extension("json.tmp");

        let writer = File::create(&tmp_file).map_err(|e| Error::new_io(e, &tmp_file))?;
        let mut serializer = serde_json::Serializer::pretty(BufWriter::new(writer));
        serde_path_to_error::serialize(data, &mut serializer)
            .map_err(|e| Error::new_json(e, &tmp_file))?;

        std::fs::rename(&tmp_file, &self.file).map_err(|e| Error::new_io(e, &self.file))?;

        Ok(())

    }

    /// Load, apply `func` to the data, and save it back.
    pub fn load_and_store<F, T>(&self, func: F) -> Result<T, Error>
    where
        F: FnOnce(&mut StateData) -> T,
    {
        let mut data = self.load()?;
        let ret = func(&mut data);
        self.save(&data)?;
        Ok(ret)
    }

}

/// The whole content of `launcherCache.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateData {
    #[serde(default)]
    pub settings: LauncherSettings,
    #[serde(default)]
    pub last_played_version: Option<String>,
    #[serde(default)]
    pub selected_account: Option<Uuid>,
    #[serde(default)]
    pub accounts: Vec<StoredAccount>,
}

impl StateData {

    /// The currently selected account, if any and if it's still present.
    pub fn selected_account(&self) -> Option<&StoredAccount> {
        let id = self.selected_account?;
        self.accounts.iter().find(|acc| acc.uuid == id)
    }

    /// Insert or replace an account, keyed by its UUID.
    pub fn put_account(&mut self, account: &Account) {
        let stored = StoredAccount::from(account);
        if let Some(existing) = self.accounts.iter_mut().find(|acc| acc.uuid == stored.uuid) {
            *existing = stored;
        } else {
            self.accounts.push(stored);
        }
    }

    /// Remove the account with the given UUID, clearing the selected account if it was
    /// the one removed. Returns the removed account, if any.
    pub fn remove_account(&mut self, uuid: Uuid) -> Option<StoredAccount> {
        let index = self.accounts.iter().position(|acc| acc.uuid == uuid)?;
        let removed = self.accounts.remove(index);
        if self.selected_account == Some(uuid) {
            self.selected_account = None;
        }
        Some(removed)
    }

}

/// Launcher-level settings, persisted alongside accounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LauncherSettings {
    pub game_dir: PathBuf,
    pub allocated_ram: u32,
    #[serde(default)]
    pub jvm_arguments: String,
    #[serde(default = "default_true")]
    pub show_snapshots: bool,
    #[serde(default)]
    pub show_others: bool,
    #[serde(default)]
    pub resolution: Option<Resolution>,
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            game_dir: crate::base::default_main_dir()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".minecraft")),
            allocated_ram: DEFAULT_ALLOCATED_RAM,
            jvm_arguments: String::new(),
            show_snapshots: true,
            show_others: false,
            resolution: None,
        }
    }
}

impl LauncherSettings {

    /// Build the extra JVM arguments implied by this settings object: the `-Xmx<N>M`
    /// memory cap prepended, followed by the user's freeform `jvmArguments` split on
    /// whitespace.
    pub fn jvm_args(&self) -> Vec<String> {
        let mut args = vec![format!("-Xmx{}M", self.allocated_ram)];
        args.extend(self.jvm_arguments.split_whitespace().map(str::to_string));
        args
    }

    /// True if a custom resolution should be applied, i.e. both width and height are
    /// set and strictly positive.
    pub fn custom_resolution(&self) -> bool {
        matches!(self.resolution, Some(Resolution { width, height }) if width > 0 && height > 0)
    }

}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// The on-disk representation of an [`Account`](crate::msa::Account).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAccount {
    pub app_id: String,
    pub refresh_token: String,
    pub access_token: String,
    pub uuid: Uuid,
    pub username: String,
    pub xuid: String,
}

impl StoredAccount {

    /// Rebuild the live [`Account`] this entry was stored from, so it can be refreshed
    /// or used directly to launch.
    pub fn to_account(&self) -> Account {
        Account::from_parts(
            self.app_id.clone(),
            self.refresh_token.clone(),
            self.access_token.clone(),
            self.uuid,
            self.username.clone(),
            self.xuid.clone(),
        )
    }

}

impl From<&Account> for StoredAccount {
    fn from(account: &Account) -> Self {
        Self {
            app_id: account.app_id().to_string(),
            refresh_token: account.refresh_token().to_string(),
            access_token: account.access_token().to_string(),
            uuid: account.uuid(),
            username: account.username().to_string(),
            xuid: account.xuid().to_string(),
        }
    }
}

/// Errors raised while loading or saving the persistent state.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("io error at {path}: {error}")]
    Io {
        #[source]
        error: io::Error,
        path: Box<str>,
    },
    #[error("malformed state file at {origin}: {error}")]
    Json {
        #[source]
        error: serde_path_to_error::Error<serde_json::Error>,
        origin: Box<str>,
    },
}

impl Error {

    fn new_io(error: io::Error, path: impl AsRef<Path>) -> Self {
        Self::Io { error, path: path.as_ref().to_string_lossy().into() }
    }

    fn new_json(error: serde_path_to_error::Error<serde_json::Error>, origin: impl AsRef<Path>) -> Self {
        Self::Json { error, origin: origin.as_ref().to_string_lossy().into() }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_initializes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let state = PersistentState::new(dir.path().join("launcherCache.json"));
        let data = state.load().unwrap();
        assert_eq!(data.settings.allocated_ram, DEFAULT_ALLOCATED_RAM);
        assert!(data.settings.show_snapshots);
        assert!(!data.settings.show_others);
        assert!(data.accounts.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let state = PersistentState::new(dir.path().join("launcherCache.json"));

        let mut data = StateData::default();
        data.last_played_version = Some("1.20.4".to_string());
        data.settings.allocated_ram = 4096;
        state.save(&data).unwrap();

        let loaded = state.load().unwrap();
        assert_eq!(loaded.last_played_version.as_deref(), Some("1.20.4"));
        assert_eq!(loaded.settings.allocated_ram, 4096);
    }

    #[test]
    fn save_leaves_no_temp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let state = PersistentState::new(dir.path().join("launcherCache.json"));
        state.save(&StateData::default()).unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].to_str().unwrap(), "launcherCache.json");
    }

    #[test]
    fn remove_account_clears_selection() {
        let mut data = StateData::default();
        let uuid = Uuid::from_u128(1);
        data.accounts.push(StoredAccount {
            app_id: String::new(),
            refresh_token: String::new(),
            access_token: String::new(),
            uuid,
            username: "Steve".to_string(),
            xuid: String::new(),
        });
        data.selected_account = Some(uuid);

        let removed = data.remove_account(uuid);
        assert!(removed.is_some());
        assert!(data.selected_account.is_none());
        assert!(data.accounts.is_empty());
    }

    #[test]
    fn jvm_args_prepends_memory_cap() {
        let mut settings = LauncherSettings::default();
        settings.allocated_ram = 1024;
        settings.jvm_arguments = "-Dfoo=bar -Dbaz=qux".to_string();
        assert_eq!(settings.jvm_args(), vec!["-Xmx1024M", "-Dfoo=bar", "-Dbaz=qux"]);
    }

    #[test]
    fn custom_resolution_requires_both_dims_positive() {
        let mut settings = LauncherSettings::default();
        assert!(!settings.custom_resolution());
        settings.resolution = Some(Resolution { width: 1920, height: 0 });
        assert!(!settings.custom_resolution());
        settings.resolution = Some(Resolution { width: 1920, height: 1080 });
        assert!(settings.custom_resolution());
    }
}
