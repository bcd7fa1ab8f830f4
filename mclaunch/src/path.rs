//! Various uncategorized utilities.

use std::path::{Path, PathBuf};
use std::ffi::OsStr;


/// A macro to generate OS-aware path from multiple components, const-compatible. Because
/// `std::path::Path` don't support being built are const time, this macro returns a str.
macro_rules! const_path {
    ( $first:literal $( , $part:literal )* ) => {
        {
            #[cfg(windows)] {
                concat!( $first $( , '\\', $part )* )
            }
            #[cfg(not(windows))] {
                concat!( $first $( , '/', $part )* )
            }
        }
    };
}

pub(crate) use const_path;


/// Extension to the standard [`Path`].
pub trait PathExt {

    /// A shortcut method to join a file name with its extension to the current path.
    /// This shortcut avoids a temporary allocation of a formatted string when joining.
    fn join_with_extension<P: AsRef<Path>, S: AsRef<OsStr>>(&self, name: P, extension: S) -> PathBuf;

}

impl PathExt for Path {

    #[inline]
    fn join_with_extension<P: AsRef<Path>, S: AsRef<OsStr>>(&self, name: P, extension: S) -> PathBuf {
        self.join(name).appended(".").appended(extension)
    }

}


/// Extension to the standard [`PathBuf`], mainly to ease joining and raw appending. In
/// this launcher we do a lot of path joining so we don't want to allocate each time.
pub trait PathBufExt {

    /// Return this path joined with another one, this is different from [`Path::join`]
    /// in that is doesn't reallocate a new path on each join.
    fn joined<P: AsRef<Path>>(self, path: P) -> Self;

    /// Return this path appended with another string, this doesn't add any path separator.
    fn appended<S: AsRef<OsStr>>(self, s: S) -> Self;

}

impl PathBufExt for PathBuf {

    #[inline]
    fn joined<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.push(path);
        self
    }

    #[inline]
    fn appended<S: AsRef<OsStr>>(mut self, s: S) -> Self {
        self.as_mut_os_string().push(s);
        self
    }

}


/// Raised when a relative path taken from untrusted metadata (a library's custom path,
/// a JVM manifest entry, a ZIP archive member) resolves outside of the directory it is
/// supposed to be confined to.
#[derive(thiserror::Error, Debug)]
#[error("path escapes sandbox: {0}")]
pub struct PathEscape(pub Box<Path>);

/// Join `root` with the relative path components of `rel`, rejecting the result if it
/// does not canonicalize to a path still contained in `root`. Unlike a plain
/// `starts_with` check on non-canonicalized paths, this also catches escapes hidden
/// behind a symlink.
pub fn checked_join(root: &Path, rel: &Path) -> Result<PathBuf, PathEscape> {

    let joined = root.join(rel);

    // Neither root nor the file itself necessarily exist yet, so we create both (best
    // effort) and canonicalize the parent, that's enough to resolve any '..' component
    // or symlink hidden in directories that do already exist.
    fs_create_dir_all_best_effort(root);
    let parent = joined.parent().unwrap_or(&joined);
    fs_create_dir_all_best_effort(parent);

    let canon_root = dunce::canonicalize(root).map_err(|_| PathEscape(joined.clone().into_boxed_path()))?;
    let canon_parent = dunce::canonicalize(parent).map_err(|_| PathEscape(joined.clone().into_boxed_path()))?;

    if !canon_parent.starts_with(&canon_root) {
        return Err(PathEscape(joined.into_boxed_path()));
    }

    let file_name = joined.file_name();
    Ok(match file_name {
        Some(name) => canon_parent.joined(name),
        None => canon_parent,
    })

}

/// Best-effort directory creation used only so that [`checked_join`] can canonicalize a
/// parent that does not exist yet; failures are deferred to the actual write.
fn fs_create_dir_all_best_effort(dir: &Path) {
    let _ = std::fs::create_dir_all(dir);
}
