//! Privileged access to remoteproc control attributes.
//!
//! Each PRU is exposed by the kernel as a `remoteproc<N>` directory in sysfs
//! (lifecycle state, firmware name) and in debugfs (single-step flag, register
//! dump). The accessors here perform exactly one open/operate/close per call:
//! the kernel file is the source of truth and is never cached.

use std::fmt::Display;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use prussd_protocol::{ErrorCode, Result, UnitIndex};

use crate::config::RemoteprocConfig;

/// A remoteproc control attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    /// Lifecycle state (`offline`, `running`, ...); written `start`/`stop`.
    State,
    /// Firmware file name looked up in the firmware directory.
    Firmware,
    /// Single-step debug flag (debugfs).
    SingleStep,
    /// Register dump (debugfs).
    Regs,
}

impl Attribute {
    /// File name of the attribute inside the instance directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            Attribute::State => "state",
            Attribute::Firmware => "firmware",
            Attribute::SingleStep => "single_step",
            Attribute::Regs => "regs",
        }
    }

    /// Whether the attribute lives in debugfs rather than sysfs.
    pub fn is_debugfs(&self) -> bool {
        matches!(self, Attribute::SingleStep | Attribute::Regs)
    }
}

/// Resolves unit indices to remoteproc attribute paths.
#[derive(Debug, Clone)]
pub struct RemoteprocPaths {
    sysfs_root: PathBuf,
    debugfs_root: PathBuf,
    first_instance: u32,
}

impl RemoteprocPaths {
    /// Create a resolver from the remoteproc configuration.
    pub fn new(config: &RemoteprocConfig) -> Self {
        Self {
            sysfs_root: config.sysfs_root.clone(),
            debugfs_root: config.debugfs_root.clone(),
            first_instance: config.first_instance,
        }
    }

    /// Path of `attribute` for `unit`.
    ///
    /// Returns `None` only when the instance number overflows; an index with
    /// no matching instance still resolves and fails later with NotFound.
    pub fn attribute(&self, unit: UnitIndex, attribute: Attribute) -> Option<PathBuf> {
        let instance = unit.0.checked_add(self.first_instance)?;
        let root = if attribute.is_debugfs() {
            &self.debugfs_root
        } else {
            &self.sysfs_root
        };

        Some(
            root.join(format!("remoteproc{instance}"))
                .join(attribute.file_name()),
        )
    }

    /// Read `attribute` of `unit`.
    pub fn read(&self, unit: UnitIndex, attribute: Attribute) -> Result<String> {
        read_attr(&self.attribute(unit, attribute).ok_or(ErrorCode::NotFound)?)
    }

    /// Write `value` to `attribute` of `unit`.
    pub fn write(&self, unit: UnitIndex, attribute: Attribute, value: impl Display) -> Result<()> {
        write_attr(&self.attribute(unit, attribute).ok_or(ErrorCode::NotFound)?, value)
    }
}

/// Read the full contents of a control file.
pub fn read_attr(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(ErrorCode::NotFound);
    }

    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Write the textual form of `value` to an existing control file.
pub fn write_attr(path: &Path, value: impl Display) -> Result<()> {
    if !path.exists() {
        return Err(ErrorCode::NotFound);
    }

    let mut file = OpenOptions::new().write(true).truncate(true).open(path)?;
    file.write_all(value.to_string().as_bytes())?;
    Ok(())
}
