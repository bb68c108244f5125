//! Firmware staging.
//!
//! The kernel loads remoteproc firmware by file name from a single install
//! directory. Loading a PRU image for a client therefore means copying it
//! into that directory and writing its file name into the unit's `firmware`
//! attribute.
//!
//! # Security
//!
//! Only images under an operator-trusted directory can be staged. Paths are
//! canonicalised before the containment check, so `..` segments, symlinks
//! pointing elsewhere, and sibling directories that merely share a string
//! prefix (`/lib/firmware-evil`) are all rejected.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use prussd_protocol::{ErrorCode, Result, UnitIndex};

use crate::config::FirmwareConfig;
use crate::sysfs::{Attribute, RemoteprocPaths};

/// Validates, stages and activates firmware images.
#[derive(Debug, Clone)]
pub struct FirmwareLoader {
    install_dir: PathBuf,
    trusted_dirs: BTreeSet<PathBuf>,
    remoteproc: RemoteprocPaths,
}

impl FirmwareLoader {
    /// Create a loader from the firmware configuration.
    pub fn new(config: &FirmwareConfig, remoteproc: RemoteprocPaths) -> Self {
        Self {
            install_dir: config.install_dir.clone(),
            trusted_dirs: config.trusted_dirs.clone(),
            remoteproc,
        }
    }

    /// Whether `source` (already canonical) lies inside a trusted directory.
    fn is_trusted(&self, source: &Path) -> bool {
        self.trusted_dirs
            .iter()
            .filter_map(|dir| fs::canonicalize(dir).ok())
            .any(|dir| source.starts_with(dir))
    }

    /// Stage `source` and point `unit` at it.
    ///
    /// Fails with NotFound if `source` does not exist and with Permission if it
    /// is outside every trusted directory; nothing is copied in either case.
    /// An image that already sits in the install directory is not copied
    /// again, but the attribute is still written.
    pub fn load(&self, unit: UnitIndex, source: &str) -> Result<()> {
        let source_path = Path::new(source);
        if !source_path.exists() {
            return Err(ErrorCode::NotFound);
        }

        let canonical_source = fs::canonicalize(source_path)?;
        if !self.is_trusted(&canonical_source) {
            tracing::warn!("Rejected firmware outside trusted directories: {}", source);
            return Err(ErrorCode::Permission);
        }

        if !canonical_source.is_file() {
            return Err(ErrorCode::from(Errno::EISDIR));
        }

        // The image is named after the requested path, not a symlink target.
        let file_name = source_path
            .file_name()
            .ok_or(ErrorCode::InvalidArgument)?;
        let name = file_name.to_str().ok_or(ErrorCode::InvalidArgument)?;
        let installed = self.install_dir.join(file_name);

        if self.is_installed(&canonical_source, &installed) {
            tracing::debug!("Firmware {} already installed", name);
        } else {
            fs::copy(&canonical_source, &installed)?;
            tracing::info!(
                "Staged firmware {} to {}",
                canonical_source.display(),
                installed.display()
            );
        }

        self.remoteproc.write(unit, Attribute::Firmware, name)
    }

    fn is_installed(&self, source: &Path, installed: &Path) -> bool {
        fs::canonicalize(installed).is_ok_and(|installed| installed == source)
    }
}
