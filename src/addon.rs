//! Add-on product activation.
//!
//! Fetches the control file an add-on ships, caches it in the store's cache
//! directory and registers it for the next merge session.
//!
//! # Failure Policy
//!
//! A package without a control file is not an error: activation returns
//! `Ok(None)` and nothing is registered. Download and extraction failures are
//! returned to the caller so they can be shown to the user; the add-on is then
//! treated as contributing nothing.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::collaborators::PackageFetcher;
use crate::control_file::ControlFileRecord;
use crate::error::{Result, WizflowError};
use crate::session::MergeEngine;

/// Control file name inside an add-on package or repository root.
pub const CONTROL_FILE_NAME: &str = "installation.xml";

/// Activates and deactivates add-on control files.
pub struct AddonActivator<F: PackageFetcher> {
    fetcher: F,
    work_dir: PathBuf,
}

impl<F: PackageFetcher> AddonActivator<F> {
    /// `work_dir` receives downloaded archives and extracted trees.
    pub fn new(fetcher: F, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            fetcher,
            work_dir: work_dir.into(),
        }
    }

    /// Fetch, cache and register the control file of an add-on.
    ///
    /// With a package name the package is downloaded and extracted and its
    /// bundled control file is used. Without one the control file is fetched
    /// from the repository root.
    pub fn activate(
        &self,
        engine: &mut MergeEngine,
        source_id: u32,
        package: Option<&str>,
    ) -> Result<Option<PathBuf>> {
        fs::create_dir_all(&self.work_dir)?;

        let Some(found) = self.fetch_control_file(source_id, package)? else {
            info!(
                "Source {} ({}) ships no control file",
                source_id,
                package.unwrap_or("repository")
            );
            return Ok(None);
        };

        let content = fs::read(&found)?;
        let cached = engine.store().store_cached(source_id, package, &content)?;
        engine.register(ControlFileRecord::new(&cached, source_id, content));
        Ok(Some(cached))
    }

    /// Deregister the cached control file of an add-on.
    pub fn deactivate(&self, engine: &mut MergeEngine, source_id: u32, package: Option<&str>) -> bool {
        let cached = engine.store().cached_path(source_id, package);
        engine.deregister(&cached).is_some()
    }

    fn fetch_control_file(&self, source_id: u32, package: Option<&str>) -> Result<Option<PathBuf>> {
        match package.filter(|p| !p.is_empty()) {
            Some(package) => {
                let archive = self.work_dir.join(format!("{}-{}.rpm", source_id, package));
                self.fetcher.download(source_id, package, &archive)?;

                let extract_dir = self.work_dir.join(format!("{}-{}", source_id, package));
                fs::create_dir_all(&extract_dir)?;
                self.fetcher.extract(&archive, &extract_dir)?;

                Ok(existing(extract_dir.join(CONTROL_FILE_NAME)))
            }
            None => {
                let dest = self.work_dir.join(format!("{}-{}", source_id, CONTROL_FILE_NAME));
                match self.fetcher.download(source_id, CONTROL_FILE_NAME, &dest) {
                    Ok(()) => Ok(existing(dest)),
                    Err(WizflowError::NotFound(_)) => Ok(None),
                    Err(e) => {
                        warn!("Control file download from source {} failed: {}", source_id, e);
                        Err(e)
                    }
                }
            }
        }
    }
}

fn existing(path: PathBuf) -> Option<PathBuf> {
    path.exists().then_some(path)
}
