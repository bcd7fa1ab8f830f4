//! Extension to the base installer that resolves Mojang-provided versions against the
//! official version manifest: alias resolution (`release`/`snapshot`), auto-fetch of
//! missing version descriptors, and listing of installed/available versions.

use std::io;
use std::path::Path;

use sha1::{Digest, Sha1};

use crate::base;
use crate::serde::Sha1HashString;


/// Static URL to the version manifest provided by Mojang.
const VERSION_MANIFEST_URL: &str = "https://launchermeta.mojang.com/mc/game/version_manifest_v2.json";


/// An installer for Mojang-provided versions, wrapping a [`base::Installer`] with
/// manifest-backed alias resolution and auto-fetch of missing version metadata.
#[derive(Debug)]
pub struct Installer {
    /// The underlying base installer logic.
    pub inner: base::Installer,
    /// Set to true if this installer should use the online version manifest to resolve
    /// aliases and fetch missing version descriptors. Enabled by default.
    pub fetch: bool,
}

impl Installer {

    pub fn with_inner(inner: base::Installer) -> Self {
        Self { inner, fetch: true }
    }

    pub fn into_inner(self) -> base::Installer {
        self.inner
    }

    /// Request the Mojang version manifest, through the time-windowed request cache.
    pub fn request_manifest(&self) -> Result<Manifest> {

        let client = crate::http::client().map_err(Error::new_reqwest)?;
        let body = crate::cache::get_or_fetch(&client, VERSION_MANIFEST_URL)
            .map_err(Error::new_reqwest)?;

        let mut deserializer = serde_json::Deserializer::from_slice(&body);
        serde_path_to_error::deserialize(&mut deserializer)
            .map_err(|e| Error::new_json(e, VERSION_MANIFEST_URL))

    }

    /// Install the given Mojang version from its identifier, resolving `release` and
    /// `snapshot` aliases through the manifest's `latest` mapping when fetch is enabled.
    ///
    /// If the given id is not found in the manifest, it is passed through unchanged and
    /// the version metadata must already be present locally, otherwise installation
    /// fails with [`base::Error::VersionNotFound`].
    pub fn install(&mut self, handler: impl Handler, id: &str) -> Result<base::Game> {

        let manifest = if self.fetch {
            Some(self.request_manifest()?)
        } else {
            None
        };

        let resolved_id = manifest.as_ref()
            .and_then(|manifest| match id {
                "release" => Some(manifest.latest.release.as_str()),
                "snapshot" => Some(manifest.latest.snapshot.as_str()),
                _ => None,
            })
            .unwrap_or(id)
            .to_string();

        let version_entry = manifest.as_ref()
            .and_then(|manifest| manifest.versions.iter().find(|v| v.id == resolved_id))
            .cloned();

        self.inner.set_version(resolved_id.clone());

        let mut wrapper = InternalHandler {
            inner: handler,
            version_id: resolved_id,
            version_entry,
            error: Ok(()),
        };

        let game = self.inner.install(&mut wrapper);
        wrapper.error?;

        Ok(game?)

    }

    /// List locally-installed versions by scanning the configured versions directory.
    pub fn list_installed(&self) -> io::Result<Vec<VersionInfo>> {
        list_installed_in(self.inner.versions_dir())
    }

    /// List all versions known either locally or from the manifest, combining both
    /// sources. Manifest versions come first (in manifest order), followed by any
    /// locally-installed version absent from the manifest (custom or unlisted builds).
    pub fn list_available(&self) -> Result<Vec<VersionInfo>> {

        let manifest = self.request_manifest()?;
        let mut combined: Vec<VersionInfo> = manifest.versions.iter().map(VersionInfo::from).collect();

        let installed = list_installed_in(self.inner.versions_dir())
            .map_err(|e| Error::new_io(e, self.inner.versions_dir().display().to_string()))?;

        let known: std::collections::HashSet<String> = combined.iter().map(|v| v.id.clone()).collect();
        combined.extend(installed.into_iter().filter(|v| !known.contains(&v.id)));

        Ok(combined)

    }

}

impl From<base::Installer> for Installer {
    fn from(value: base::Installer) -> Self {
        Self::with_inner(value)
    }
}

/// Scan `versions_dir` for locally-present version descriptors.
fn list_installed_in(versions_dir: &Path) -> io::Result<Vec<VersionInfo>> {

    let entries = match std::fs::read_dir(versions_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut versions = Vec::new();

    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }

        let id = entry.file_name().to_string_lossy().into_owned();
        let file = entry.path().join(format!("{id}.json"));

        let Ok(reader) = std::fs::File::open(&file) else { continue };
        let reader = io::BufReader::new(reader);

        let mut deserializer = serde_json::Deserializer::from_reader(reader);
        match serde_path_to_error::deserialize::<_, Box<base::serde::VersionMetadata>>(&mut deserializer) {
            Ok(metadata) => versions.push(VersionInfo::from(&*metadata)),
            Err(e) => {
                tracing::warn!(version = %id, error = %e, "skipping unreadable version descriptor");
                continue;
            }
        }
    }

    Ok(versions)

}

/// A lightweight summary of a Mojang version, either installed locally or known from
/// the online manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub id: String,
    pub r#type: String,
    pub release_time: String,
    pub compliance_level: Option<u32>,
}

impl From<&ManifestVersion> for VersionInfo {
    fn from(v: &ManifestVersion) -> Self {
        Self {
            id: v.id.clone(),
            r#type: v.r#type.clone(),
            release_time: v.release_time.clone(),
            compliance_level: v.compliance_level,
        }
    }
}

impl From<&base::serde::VersionMetadata> for VersionInfo {
    fn from(v: &base::serde::VersionMetadata) -> Self {
        Self {
            id: v.id.clone(),
            r#type: v.r#type.map(|t| t.as_str().to_string()).unwrap_or_default(),
            release_time: v.release_time.to_rfc3339(),
            compliance_level: v.compliance_level,
        }
    }
}

/// The Mojang version manifest (`version_manifest_v2.json`).
#[derive(serde::Deserialize, Debug, Clone)]
pub struct Manifest {
    pub latest: Latest,
    pub versions: Vec<ManifestVersion>,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct Latest {
    pub release: String,
    pub snapshot: String,
}

#[derive(serde::Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ManifestVersion {
    pub id: String,
    pub r#type: String,
    pub url: String,
    pub time: String,
    pub release_time: String,
    pub sha1: Option<Sha1HashString>,
    pub compliance_level: Option<u32>,
}

/// Handler for events happening during Mojang-backed installation, in addition to the
/// base installer's own events.
pub trait Handler: base::Handler {

    /// Handle an event specific to this installer.
    fn on_moj_event(&mut self, event: Event) {
        let _ = event;
    }

}

impl Handler for () {}

impl<H: Handler + ?Sized> Handler for &mut H {
    fn on_moj_event(&mut self, event: Event) {
        (**self).on_moj_event(event)
    }
}

/// An event produced while resolving or fetching a Mojang version.
#[derive(Debug)]
#[non_exhaustive]
pub enum Event<'a> {
    /// A missing version descriptor is being fetched from the manifest.
    VersionFetching { id: &'a str },
    /// The missing version descriptor has been fetched and written locally.
    VersionFetched { id: &'a str },
}

/// The Mojang installer could not proceed to the installation of a version.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Error from the base installer.
    #[error("base: {0}")]
    Base(#[from] base::Error),
    /// Error performing an HTTP request against the version manifest or a version
    /// descriptor endpoint.
    #[error("http: {0}")]
    Http(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// Error parsing a JSON document, with the path of the offending field.
    #[error("json: {error} @ {origin}")]
    Json {
        #[source]
        error: serde_path_to_error::Error<serde_json::Error>,
        origin: Box<str>,
    },
    /// I/O error while reading or writing a version descriptor.
    #[error("io: {error} @ {origin}")]
    Io {
        #[source]
        error: io::Error,
        origin: Box<str>,
    },
    /// The fetched version descriptor did not match its expected SHA-1 checksum.
    #[error("checksum mismatch fetching version: {id}")]
    ChecksumMismatch {
        id: String,
    },
}

/// Type alias for a result with the Mojang installer error type.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {

    fn new_reqwest(error: reqwest::Error) -> Self {
        Self::Http(Box::new(error))
    }

    fn new_json(error: serde_path_to_error::Error<serde_json::Error>, origin: impl Into<Box<str>>) -> Self {
        Self::Json { error, origin: origin.into() }
    }

    fn new_io(error: io::Error, origin: impl Into<Box<str>>) -> Self {
        Self::Io { error, origin: origin.into() }
    }

}

// ========================== //
// Following code is internal //
// ========================== //

/// Internal handler wrapping the caller's handler, given to the base installer.
struct InternalHandler<H: Handler> {
    inner: H,
    /// Identifier of the Mojang version being launched, after alias resolution.
    version_id: String,
    /// Manifest entry for that version, only present when fetch is enabled and the
    /// version is a known Mojang one.
    version_entry: Option<ManifestVersion>,
    /// First error encountered while handling events, if any.
    error: Result<()>,
}

impl<H: Handler> base::Handler for InternalHandler<H> {
    fn on_event(&mut self, event: base::Event) {

        match event {
            base::Event::NeedVersion { version, file, retry }
                if version == self.version_id.as_str() && self.version_entry.is_some() =>
            {
                match self.fetch_version(version, file) {
                    Ok(()) => *retry = true,
                    Err(e) => self.error = Err(e),
                }
            }
            other => self.inner.on_event(other),
        }

    }
}

impl<H: Handler> InternalHandler<H> {

    fn fetch_version(&mut self, id: &str, file: &Path) -> Result<()> {

        let entry = self.version_entry.as_ref().expect("checked by caller");

        self.inner.on_moj_event(Event::VersionFetching { id });

        let client = crate::http::client().map_err(Error::new_reqwest)?;
        let body = crate::cache::get_or_fetch(&client, &entry.url)
            .map_err(Error::new_reqwest)?;

        if let Some(expected) = &entry.sha1 {
            let digest = Sha1::digest(&body);
            if expected.0 != digest.as_slice() {
                return Err(Error::ChecksumMismatch { id: id.to_string() });
            }
        }

        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::new_io(e, parent.display().to_string()))?;
        }

        std::fs::write(file, &body)
            .map_err(|e| Error::new_io(e, file.display().to_string()))?;

        self.inner.on_moj_event(Event::VersionFetched { id });

        Ok(())

    }

}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST_JSON: &str = r#"{
        "latest": { "release": "1.21.1", "snapshot": "24w45a" },
        "versions": [
            {
                "id": "1.21.1",
                "type": "release",
                "url": "https://example.invalid/1.21.1.json",
                "time": "2024-08-08T00:00:00+00:00",
                "releaseTime": "2024-08-08T00:00:00+00:00",
                "sha1": "0000000000000000000000000000000000000a",
                "complianceLevel": 1
            },
            {
                "id": "24w45a",
                "type": "snapshot",
                "url": "https://example.invalid/24w45a.json",
                "time": "2024-11-06T00:00:00+00:00",
                "releaseTime": "2024-11-06T00:00:00+00:00",
                "sha1": null,
                "complianceLevel": 1
            }
        ]
    }"#;

    #[test]
    fn manifest_deserializes_and_resolves_aliases() {
        let mut deserializer = serde_json::Deserializer::from_str(MANIFEST_JSON);
        let manifest: Manifest = serde_path_to_error::deserialize(&mut deserializer).unwrap();

        assert_eq!(manifest.latest.release, "1.21.1");
        assert_eq!(manifest.latest.snapshot, "24w45a");
        assert_eq!(manifest.versions.len(), 2);
        assert_eq!(manifest.versions[0].id, "1.21.1");
    }

    #[test]
    fn list_installed_in_empty_dir_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let versions = list_installed_in(&dir.path().join("versions")).unwrap();
        assert!(versions.is_empty());
    }

    #[test]
    fn list_installed_in_skips_unreadable_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let version_dir = dir.path().join("versions").join("bogus");
        std::fs::create_dir_all(&version_dir).unwrap();
        std::fs::write(version_dir.join("bogus.json"), b"not json").unwrap();

        let versions = list_installed_in(&dir.path().join("versions")).unwrap();
        assert!(versions.is_empty());
    }

    #[test]
    fn list_installed_in_reads_valid_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let version_dir = dir.path().join("versions").join("1.21.1");
        std::fs::create_dir_all(&version_dir).unwrap();
        std::fs::write(version_dir.join("1.21.1.json"), r#"{
            "id": "1.21.1",
            "type": "release",
            "time": "2024-08-08T00:00:00+00:00",
            "releaseTime": "2024-08-08T00:00:00+00:00",
            "mainClass": "net.minecraft.client.main.Main",
            "libraries": []
        }"#).unwrap();

        let versions = list_installed_in(&dir.path().join("versions")).unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].id, "1.21.1");
        assert_eq!(versions[0].r#type, "release");
    }
}
