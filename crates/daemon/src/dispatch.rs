//! Request dispatch.
//!
//! Turns one request line into exactly one component operation and renders
//! the outcome as a [`Response`]. Bounded file work runs on tokio's blocking
//! pool; event waits and the module loader are awaited directly.

use std::time::Duration;

use prussd_protocol::{Command, ErrorCode, Response, Result, UnitIndex};

use crate::channel::Channels;
use crate::config::Config;
use crate::firmware::FirmwareLoader;
use crate::module::ModuleManager;
use crate::sysfs::{Attribute, RemoteprocPaths};

/// Routes parsed commands to the daemon's components.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    remoteproc: RemoteprocPaths,
    firmware: FirmwareLoader,
    channels: Channels,
    modules: ModuleManager,
}

impl Dispatcher {
    /// Build the components from a validated configuration.
    pub fn new(config: &Config) -> Self {
        let remoteproc = RemoteprocPaths::new(&config.remoteproc);
        Self {
            firmware: FirmwareLoader::new(&config.firmware, remoteproc.clone()),
            channels: Channels::new(&config.rpmsg),
            modules: ModuleManager::new(&config.remoteproc),
            remoteproc,
        }
    }

    /// Parse and execute one raw request line.
    pub async fn dispatch_line(&self, line: &str) -> Response {
        match Command::parse(line) {
            Ok(command) => self.dispatch(command).await,
            Err(e) => {
                tracing::debug!("Rejected request {:?}: {}", line, e);
                Response::Error(e)
            }
        }
    }

    /// Execute one command.
    pub async fn dispatch(&self, command: Command) -> Response {
        tracing::debug!("Dispatching {}", command.name());

        let response: Response = match command {
            Command::ProbeRproc => self.modules.probe(true).await.map(|()| Response::Done),
            Command::UnprobeRproc => self.modules.probe(false).await.map(|()| Response::Done),
            Command::Enable(unit) => self.write_attr(unit, Attribute::State, "start").await,
            Command::Disable(unit) => self.write_attr(unit, Attribute::State, "stop").await,
            Command::Pause(unit) => self.write_attr(unit, Attribute::SingleStep, "1").await,
            Command::Resume(unit) => self.write_attr(unit, Attribute::SingleStep, "0").await,
            Command::State(unit) => self.read_attr(unit, Attribute::State).await,
            Command::GetRegs(unit) => self.read_attr(unit, Attribute::Regs).await,
            Command::Load { unit, path } => {
                let firmware = self.firmware.clone();
                blocking(move || firmware.load(unit, &path))
                    .await
                    .map(|()| Response::Done)
            }
            Command::GetMsg(channel) => {
                let channels = self.channels.clone();
                blocking(move || channels.drain(&channel))
                    .await
                    .map(Response::Text)
            }
            Command::SendMsg { channel, message } => {
                let channels = self.channels.clone();
                blocking(move || channels.write(&channel, &message))
                    .await
                    .map(|()| Response::Done)
            }
            Command::EventWait { channel, timeout } => self
                .channels
                .wait_for_event(&channel, timeout.map(Duration::from_secs))
                .await
                .map(|()| Response::Done),
        }
        .into();

        if let Response::Error(e) = &response {
            tracing::debug!("Request failed with {}: {}", e.code(), e);
        }
        response
    }

    async fn read_attr(&self, unit: UnitIndex, attribute: Attribute) -> Result<Response> {
        let remoteproc = self.remoteproc.clone();
        blocking(move || remoteproc.read(unit, attribute))
            .await
            .map(Response::Text)
    }

    async fn write_attr(
        &self,
        unit: UnitIndex,
        attribute: Attribute,
        value: &'static str,
    ) -> Result<Response> {
        let remoteproc = self.remoteproc.clone();
        blocking(move || remoteproc.write(unit, attribute, value))
            .await
            .map(|()| Response::Done)
    }
}

/// Run bounded blocking file work off the async workers.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.unwrap_or_else(|e| {
        tracing::error!("Blocking operation failed: {}", e);
        Err(ErrorCode::Os(nix::errno::Errno::EIO as i32))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    struct Fixture {
        _temp_dir: TempDir,
        root: PathBuf,
        dispatcher: Dispatcher,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_config(|_, _| {})
        }

        fn with_config(adjust: impl FnOnce(&Path, &mut Config)) -> Self {
            let temp_dir = TempDir::new().unwrap();
            let root = temp_dir.path().canonicalize().unwrap();
            let mut config = Config::with_root(&root);
            adjust(&root, &mut config);

            for dir in [
                root.join("sys/class/remoteproc/remoteproc1"),
                root.join("sys/kernel/debug/remoteproc/remoteproc1"),
                root.join("lib/firmware"),
                root.join("dev"),
            ] {
                fs::create_dir_all(dir).unwrap();
            }
            fs::write(root.join("sys/class/remoteproc/remoteproc1/state"), "offline\n").unwrap();
            fs::write(root.join("sys/class/remoteproc/remoteproc1/firmware"), "").unwrap();
            fs::write(
                root.join("sys/kernel/debug/remoteproc/remoteproc1/single_step"),
                "0",
            )
            .unwrap();
            fs::write(
                root.join("sys/kernel/debug/remoteproc/remoteproc1/regs"),
                "R0: 0x00000000\n",
            )
            .unwrap();

            Self {
                dispatcher: Dispatcher::new(&config),
                root,
                _temp_dir: temp_dir,
            }
        }

        fn path(&self, relative: &str) -> PathBuf {
            self.root.join(relative)
        }

        fn read(&self, relative: &str) -> String {
            fs::read_to_string(self.path(relative)).unwrap()
        }

        async fn send(&self, line: &str) -> String {
            self.dispatcher.dispatch_line(line).await.to_string()
        }
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_requests() {
        let fx = Fixture::new();

        assert_eq!(fx.send("FOO").await, "-22");
        assert_eq!(fx.send("").await, "-22");
        assert_eq!(fx.send("ENABLE_x").await, "-22");
        assert_eq!(fx.send("ENABLE_0 extra").await, "-22");
        assert_eq!(fx.send("GETMSG rpmsg_pru").await, "-22");
        assert_eq!(fx.send("GETMSG rpmsg_pru -1").await, "-22");
        assert_eq!(fx.send("EVENTWAIT rpmsg_pru 30 soon").await, "-22");
        assert_eq!(fx.send("LOAD_0").await, "-22");
    }

    #[tokio::test]
    async fn test_enable_disable_write_state() {
        let fx = Fixture::new();
        let state = "sys/class/remoteproc/remoteproc1/state";

        assert_eq!(fx.send("ENABLE_0").await, "0");
        assert_eq!(fx.read(state), "start");

        assert_eq!(fx.send("DISABLE_0").await, "0");
        assert_eq!(fx.read(state), "stop");
    }

    #[tokio::test]
    async fn test_pause_resume_write_single_step() {
        let fx = Fixture::new();
        let single_step = "sys/kernel/debug/remoteproc/remoteproc1/single_step";

        assert_eq!(fx.send("PAUSE_0").await, "0");
        assert_eq!(fx.read(single_step), "1");

        assert_eq!(fx.send("RESUME_0").await, "0");
        assert_eq!(fx.read(single_step), "0");
    }

    #[tokio::test]
    async fn test_state_and_regs_return_contents() {
        let fx = Fixture::new();

        assert_eq!(fx.send("STATE_0").await, "offline\n");
        assert_eq!(fx.send("GETREGS_0").await, "R0: 0x00000000\n");
    }

    #[tokio::test]
    async fn test_missing_unit_is_not_found() {
        let fx = Fixture::new();

        assert_eq!(fx.send("STATE_1").await, "-2");
        assert_eq!(fx.send("ENABLE_1").await, "-2");
        assert!(!fx.path("sys/class/remoteproc/remoteproc2").exists());
    }

    #[tokio::test]
    async fn test_load_canonical_firmware() {
        let fx = Fixture::new();
        let source = fx.path("lib/firmware/app.bin");
        fs::write(&source, "ELF").unwrap();

        let line = format!("LOAD_0 {}", source.display());
        assert_eq!(fx.send(&line).await, "0");
        assert_eq!(fx.read("sys/class/remoteproc/remoteproc1/firmware"), "app.bin");
        assert_eq!(fx.read("lib/firmware/app.bin"), "ELF");
    }

    #[tokio::test]
    async fn test_load_from_configured_firmware_dir() {
        let fx = Fixture::with_config(|root, config| {
            config.firmware.trusted_dirs.insert(root.join("home/fw"));
        });
        fs::create_dir_all(fx.path("home/fw")).unwrap();
        fs::write(fx.path("home/fw/blink.out"), "ELF blink").unwrap();

        let line = format!("LOAD_0 {}", fx.path("home/fw/blink.out").display());
        assert_eq!(fx.send(&line).await, "0");
        assert_eq!(fx.read("lib/firmware/blink.out"), "ELF blink");
        assert_eq!(fx.read("sys/class/remoteproc/remoteproc1/firmware"), "blink.out");
    }

    #[tokio::test]
    async fn test_load_untrusted_and_missing() {
        let fx = Fixture::new();
        fs::write(fx.path("evil.bin"), "x").unwrap();

        let line = format!("LOAD_0 {}", fx.path("evil.bin").display());
        assert_eq!(fx.send(&line).await, "-1");
        assert!(!fx.path("lib/firmware/evil.bin").exists());

        let line = format!("LOAD_0 {}", fx.path("missing.bin").display());
        assert_eq!(fx.send(&line).await, "-2");
    }

    #[tokio::test]
    async fn test_sendmsg_and_getmsg() {
        let fx = Fixture::new();
        let node = fx.path("dev/rpmsg_pru30");
        fs::write(&node, "").unwrap();

        assert_eq!(fx.send("SENDMSG rpmsg_pru 30 hello world").await, "0");
        assert_eq!(fx.read("dev/rpmsg_pru30"), "hello world\n");

        assert_eq!(fx.send("GETMSG rpmsg_pru 30").await, "hello world\n");

        fs::write(&node, "").unwrap();
        assert_eq!(fx.send("GETMSG rpmsg_pru 30").await, "\n");
    }

    #[tokio::test]
    async fn test_channel_allow_list_checked_before_node() {
        let fx = Fixture::new();
        fs::write(fx.path("dev/ttyS0"), "secret").unwrap();

        assert_eq!(fx.send("GETMSG ttyS 0").await, "-1");
        assert_eq!(fx.send("SENDMSG ttyS 0 hi").await, "-1");
        assert_eq!(fx.send("EVENTWAIT ttyS 0 1").await, "-1");
        assert_eq!(fx.read("dev/ttyS0"), "secret");
    }

    #[tokio::test]
    async fn test_allowed_channel_without_node() {
        let fx = Fixture::new();

        assert_eq!(fx.send("GETMSG rpmsg_pru 0").await, "-19");
        assert_eq!(fx.send("SENDMSG rpmsg_pru 0 hi").await, "-19");
        assert_eq!(fx.send("EVENTWAIT rpmsg_pru 0").await, "-19");
    }

    #[tokio::test]
    async fn test_eventwait_ready_node() {
        let fx = Fixture::new();
        fs::write(fx.path("dev/rpmsg_pru31"), "").unwrap();

        assert_eq!(fx.send("EVENTWAIT rpmsg_pru 31 1").await, "0");
    }

    #[tokio::test]
    async fn test_probe_with_missing_loader() {
        let fx = Fixture::with_config(|_, config| {
            config.remoteproc.modprobe_path = PathBuf::from("/nonexistent/modprobe");
        });

        assert_eq!(fx.send("PROBE_RPROC").await, "-2");
        assert_eq!(fx.send("UNPROBE_RPROC").await, "-2");
    }

    #[tokio::test]
    async fn test_probe_with_loader() {
        let fx = Fixture::with_config(|_, config| {
            config.remoteproc.modprobe_path = PathBuf::from("/bin/true");
        });

        assert_eq!(fx.send("PROBE_RPROC").await, "0");
        assert_eq!(fx.send("UNPROBE_RPROC").await, "0");
    }
}
