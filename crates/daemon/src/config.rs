//! Configuration for the prussd daemon.
//!
//! The operator-facing configuration file (`/etc/default/prussd.conf` by
//! default) is a list of `KEY=value value ...` lines. Two keys are recognised:
//!
//! - `FIRMWARE`: directories unprivileged clients may load firmware from
//! - `RPMSG_CHANNELS`: rpmsg channel names clients may talk to
//!
//! Both extend the built-in defaults rather than replacing them. Everything
//! else (kernel paths, socket location, log level) has fixed defaults that can
//! be adjusted through the command line or environment.
//!
//! The configuration is built once, before the server starts accepting
//! connections, and is read-only from then on.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use thiserror::Error;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/default/prussd.conf";

/// Configuration file key listing trusted firmware directories.
const FIRMWARE_KEY: &str = "FIRMWARE";

/// Configuration file key listing allowed rpmsg channel names.
const RPMSG_CHANNELS_KEY: &str = "RPMSG_CHANNELS";

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("socket_path must be absolute, got {0}")]
    RelativeSocketPath(PathBuf),

    #[error("firmware directory must be absolute, got {0}")]
    RelativeFirmwareDir(PathBuf),

    #[error("rpmsg channel name must be a plain file name, got {0:?}")]
    InvalidChannelName(String),

    #[error("driver_module must not be empty")]
    EmptyDriverModule,
}

/// Main configuration structure for the prussd daemon.
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct Config {
    /// Socket and logging settings.
    pub daemon: DaemonConfig,

    /// Kernel remoteproc interface locations.
    pub remoteproc: RemoteprocConfig,

    /// Firmware staging settings.
    pub firmware: FirmwareConfig,

    /// rpmsg channel settings.
    pub rpmsg: RpmsgConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DaemonConfig {
    /// Path of the Unix socket clients connect to.
    pub socket_path: PathBuf,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Locations of the remoteproc control files and the module loader.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RemoteprocConfig {
    /// Directory holding the `remoteproc<N>` sysfs entries.
    pub sysfs_root: PathBuf,

    /// Directory holding the `remoteproc<N>` debugfs entries.
    pub debugfs_root: PathBuf,

    /// Remoteproc instance number of PRU 0. On the BeagleBone `remoteproc0`
    /// is the wakeup M3, so the PRUs start at 1.
    pub first_instance: u32,

    /// Path of the module loader tool.
    pub modprobe_path: PathBuf,

    /// Kernel module driving the PRU remoteproc instances.
    pub driver_module: String,
}

/// Firmware staging configuration.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FirmwareConfig {
    /// Directory the kernel loads firmware from by file name.
    pub install_dir: PathBuf,

    /// Directories clients may load firmware from. Always contains
    /// `install_dir`.
    pub trusted_dirs: BTreeSet<PathBuf>,
}

/// rpmsg channel configuration.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RpmsgConfig {
    /// Directory holding the rpmsg character devices.
    pub dev_dir: PathBuf,

    /// Channel names clients may read from, write to and wait on.
    pub channels: BTreeSet<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(prussd_protocol::DEFAULT_SOCKET_PATH),
            log_level: "info".to_string(),
        }
    }
}

impl Default for RemoteprocConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys/class/remoteproc"),
            debugfs_root: PathBuf::from("/sys/kernel/debug/remoteproc"),
            first_instance: 1,
            modprobe_path: PathBuf::from("/sbin/modprobe"),
            driver_module: "pru_rproc".to_string(),
        }
    }
}

impl Default for FirmwareConfig {
    fn default() -> Self {
        let install_dir = PathBuf::from("/lib/firmware");
        Self {
            trusted_dirs: BTreeSet::from([install_dir.clone()]),
            install_dir,
        }
    }
}

impl Default for RpmsgConfig {
    fn default() -> Self {
        Self {
            dev_dir: PathBuf::from("/dev"),
            channels: BTreeSet::from(["rpmsg_pru".to_string()]),
        }
    }
}

impl Config {
    /// Build a configuration whose kernel-facing paths all live under `root`.
    ///
    /// The layout mirrors a real system (`<root>/sys/class/remoteproc`,
    /// `<root>/lib/firmware`, `<root>/dev`, ...), which makes it possible to
    /// run the daemon against a staged kernel tree.
    pub fn with_root(root: &Path) -> Self {
        let mut config = Self::default();
        let rebase = |path: &Path| root.join(path.strip_prefix("/").unwrap_or(path));

        config.daemon.socket_path = root.join("prussd.sock");
        config.remoteproc.sysfs_root = rebase(&config.remoteproc.sysfs_root);
        config.remoteproc.debugfs_root = rebase(&config.remoteproc.debugfs_root);
        config.firmware.install_dir = rebase(&config.firmware.install_dir);
        config.firmware.trusted_dirs = BTreeSet::from([config.firmware.install_dir.clone()]);
        config.rpmsg.dev_dir = rebase(&config.rpmsg.dev_dir);
        config
    }

    /// Load configuration from a file on top of the defaults.
    ///
    /// A missing or unreadable file leaves the defaults in effect.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let mut config = Self::default();
        config.merge_file(path);
        config
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Self {
        Self::load(DEFAULT_CONFIG_PATH)
    }

    /// Merge the settings of a configuration file into this configuration.
    pub fn merge_file<P: AsRef<Path>>(&mut self, path: P) {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(contents) => {
                tracing::debug!("Reading config file {:?}", path);
                self.merge_settings(&contents);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("Config file not found at {:?}, using defaults", path);
            }
            Err(e) => {
                tracing::warn!("Cannot read config file {:?}: {}; using defaults", path, e);
            }
        }
    }

    /// Merge `KEY=value value ...` settings into this configuration.
    ///
    /// Unknown keys are ignored. Blank lines and `#` comments are skipped, as
    /// are lines without an `=`.
    pub fn merge_settings(&mut self, contents: &str) {
        for (number, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, values)) = line.split_once('=') else {
                tracing::warn!("Ignoring malformed config line {}: {:?}", number + 1, line);
                continue;
            };

            let values = values.split_whitespace();
            match key.trim() {
                FIRMWARE_KEY => self.firmware.trusted_dirs.extend(values.map(PathBuf::from)),
                RPMSG_CHANNELS_KEY => self.rpmsg.channels.extend(values.map(str::to_string)),
                other => tracing::debug!("Ignoring unknown config key {:?}", other),
            }
        }
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported variables:
    /// - PRUSSD_SOCKET: Override the socket path
    /// - PRUSSD_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(socket) = std::env::var("PRUSSD_SOCKET") {
            if !socket.is_empty() {
                tracing::info!("Overriding socket_path from environment: {}", socket);
                self.daemon.socket_path = PathBuf::from(socket);
            }
        }

        if let Ok(level) = std::env::var("PRUSSD_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        if !self.daemon.socket_path.is_absolute() {
            return Err(ConfigError::RelativeSocketPath(
                self.daemon.socket_path.clone(),
            ));
        }

        // Containment checks compare against these, so they must be anchored.
        if let Some(dir) = std::iter::once(&self.firmware.install_dir)
            .chain(&self.firmware.trusted_dirs)
            .find(|dir| !dir.is_absolute())
        {
            return Err(ConfigError::RelativeFirmwareDir(dir.clone()));
        }

        // Channel names become device node file names.
        if let Some(name) = self
            .rpmsg
            .channels
            .iter()
            .find(|name| !is_plain_file_name(name))
        {
            return Err(ConfigError::InvalidChannelName(name.clone()));
        }

        if self.remoteproc.driver_module.trim().is_empty() {
            return Err(ConfigError::EmptyDriverModule);
        }

        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/') && !name.contains('\0')
}
