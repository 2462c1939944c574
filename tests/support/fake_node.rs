//! Shell scripts that mimic the node binary's CLI and log output.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chain_harness::config::HarnessConfig;
use tempfile::TempDir;

/// Prints its arguments, records launch order next to the data directories,
/// announces readiness after `delay`, then idles until terminated.
pub fn ready_after(delay: Duration) -> String {
    format!(
        r#"#!/bin/sh
base=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "--base-path" ]; then base="$arg"; fi
  prev="$arg"
done
name=$(basename "$base")
order="$(dirname "$base")/order.log"
echo "launch $name" >> "$order"
echo "args: $*"
trap 'echo "terminated"; exit 0' TERM
sleep {delay}
echo "ready $name" >> "$order"
echo "2024-01-01 12:00:00 Running JSON-RPC WS server: addr=127.0.0.1:9945"
while true; do sleep 0.1; done
"#,
        delay = delay.as_secs_f64()
    )
}

/// Never becomes ready.
pub const SILENT: &str = "#!/bin/sh\nwhile true; do sleep 0.1; done\n";

/// Exits before becoming ready.
pub const CRASHING: &str = "#!/bin/sh\necho \"Error: invalid chain spec\"\nexit 3\n";

/// Ready immediately but ignores the terminate signal.
pub const STUBBORN: &str = "#!/bin/sh\ntrap '' TERM\necho \"Running JSON-RPC WS server\"\nwhile true; do sleep 0.1; done\n";

pub fn write_script(dir: &Path, body: &str) -> Result<PathBuf> {
    let path = dir.join("fake-node");
    fs::write(&path, body).context("failed to write fake node script")?;
    let mut permissions = fs::metadata(&path)?.permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(&path, permissions).context("failed to mark fake node executable")?;
    Ok(path)
}

/// Scratch layout plus a config pointing the harness at `script`.
pub struct FakeNetwork {
    pub root: TempDir,
    pub config: HarnessConfig,
}

impl FakeNetwork {
    pub fn new(script: &str) -> Result<Self> {
        let root = TempDir::new().context("failed to create scratch dir")?;
        let binary = write_script(root.path(), script)?;
        let config = HarnessConfig {
            node_binary: binary,
            log_dir: root.path().join("logs"),
            data_root: root.path().join("data"),
            poll_interval_ms: 50,
            startup_timeout_ms: 10_000,
            terminate_grace_ms: 1_000,
            ..HarnessConfig::default()
        };
        fs::create_dir_all(&config.data_root).context("failed to create data root")?;
        Ok(Self { root, config })
    }

    pub fn launch_order(&self) -> Result<Vec<String>> {
        let path = self.config.data_root.join("order.log");
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(content.lines().map(str::to_string).collect())
    }

    pub fn log(&self, name: &str) -> Result<String> {
        let path = self.config.log_file(name);
        fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))
    }
}

pub fn process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}
