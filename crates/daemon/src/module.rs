//! Kernel module control for the remoteproc driver.

use std::path::PathBuf;

use prussd_protocol::Result;
use tokio::process::Command;

use crate::config::RemoteprocConfig;

/// Attaches and detaches the PRU remoteproc driver through the module loader.
#[derive(Debug, Clone)]
pub struct ModuleManager {
    modprobe_path: PathBuf,
    driver_module: String,
}

impl ModuleManager {
    /// Create a module manager from the remoteproc configuration.
    pub fn new(config: &RemoteprocConfig) -> Self {
        Self {
            modprobe_path: config.modprobe_path.clone(),
            driver_module: config.driver_module.clone(),
        }
    }

    /// Load (`attach`) or unload the driver module and wait for the loader.
    ///
    /// Succeeds as long as the loader could be launched. Its exit status is
    /// only logged, since the kernel state is observable through `STATE_<n>`.
    pub async fn probe(&self, attach: bool) -> Result<()> {
        let mut command = Command::new(&self.modprobe_path);
        if !attach {
            command.arg("-r");
        }
        command.arg(&self.driver_module);

        let status = command.status().await.map_err(|e| {
            tracing::error!(
                "Failed to launch {}: {}",
                self.modprobe_path.display(),
                e
            );
            e
        })?;

        if status.success() {
            tracing::info!(
                "Driver module {} {}",
                self.driver_module,
                if attach { "loaded" } else { "unloaded" }
            );
        } else {
            tracing::warn!(
                "{} {} exited with {}",
                self.modprobe_path.display(),
                self.driver_module,
                status
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prussd_protocol::ErrorCode;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    fn manager(modprobe_path: &Path) -> ModuleManager {
        ModuleManager {
            modprobe_path: modprobe_path.to_path_buf(),
            driver_module: "pru_rproc".to_string(),
        }
    }

    /// A fake loader that records its arguments next to itself.
    fn recording_loader(dir: &Path) -> PathBuf {
        let script = dir.join("modprobe");
        let log = dir.join("args");
        fs::write(
            &script,
            format!("#!/bin/sh\necho \"$@\" > {}\n", log.display()),
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[tokio::test]
    async fn test_probe_attach_and_detach_arguments() {
        let temp_dir = TempDir::new().unwrap();
        let loader = recording_loader(temp_dir.path());
        let manager = manager(&loader);

        assert_eq!(manager.probe(true).await, Ok(()));
        assert_eq!(
            fs::read_to_string(temp_dir.path().join("args")).unwrap(),
            "pru_rproc\n"
        );

        assert_eq!(manager.probe(false).await, Ok(()));
        assert_eq!(
            fs::read_to_string(temp_dir.path().join("args")).unwrap(),
            "-r pru_rproc\n"
        );
    }

    #[tokio::test]
    async fn test_probe_nonzero_exit_still_succeeds() {
        assert_eq!(manager(Path::new("/bin/false")).probe(true).await, Ok(()));
    }

    #[tokio::test]
    async fn test_probe_missing_loader() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir.path().join("no-such-modprobe"));

        assert_eq!(manager.probe(true).await, Err(ErrorCode::NotFound));
    }
}
