//! Implementation of the `list` command.

use std::path::Path;

use chrono::{DateTime, Utc};
use mclaunch::{base, moj};

use super::CliError;
use crate::format::TimeDeltaFmt;


pub fn list(main_dir: &Path, installed_only: bool, available_only: bool) -> Result<(), CliError> {

    let inner = base::Installer::new(String::new());
    let mut installer = moj::Installer::from(inner);
    installer.inner.set_main_dir(main_dir);

    let versions = if installed_only {
        installer.list_installed()?
    } else if available_only {
        installer.request_manifest()?
            .versions
            .iter()
            .map(moj::VersionInfo::from)
            .collect()
    } else {
        installer.list_available()?
    };

    let now = Utc::now();

    for version in versions {
        let released = match DateTime::parse_from_rfc3339(&version.release_time) {
            Ok(time) => TimeDeltaFmt(now - time).to_string(),
            Err(_) => version.release_time,
        };
        println!("{:<24} {:<10} {}", version.id, version.r#type, released);
    }

    Ok(())

}
