#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use datamount::config::Config;
use datamount::domain::{MountOptions, MountRequest};
use datamount::mount::MountService;
use nix::unistd::{getgid, getuid};
use tempfile::TempDir;

// Behaviour comes from the materialized config (`behavior = ...`, `log = ...`),
// so one script serves every test. It is written once, before any test spawns
// processes, which keeps exec from racing a still-open write handle.
const FAKE_RCLONE: &str = r#"#!/bin/sh
cmd="$1"
cfg="$3"
setting() { sed -n "s/^$1 = //p" "$cfg"; }
case "$cmd" in
  obscure)
    echo "obscured-$2"
    ;;
  lsd)
    if [ "$(setting behavior)" = unreachable ]; then
      echo "Failed to lsd: couldn't connect" >&2
      exit 1
    fi
    ;;
  mount)
    log="$(setting log)"
    [ -n "$log" ] && echo "$$ $*" >> "$log"
    case "$(setting behavior)" in
      crash) echo "mount failed: bad credentials" >&2; exit 2 ;;
      short) sleep 1 ;;
      # $5 is the mount point; a plain file in its place cannot be listed
      unusable) rmdir "$5" && : > "$5"; exec sleep 30 ;;
      *) exec sleep 30 ;;
    esac
    ;;
esac
"#;

pub fn fake_rclone() -> &'static Path {
    static BIN: OnceLock<PathBuf> = OnceLock::new();
    BIN.get_or_init(|| {
        let dir = tempfile::Builder::new()
            .prefix("fake-rclone-")
            .tempdir()
            .unwrap()
            .keep();
        let bin = dir.join("rclone");
        std::fs::write(&bin, FAKE_RCLONE).unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
        bin
    })
}

pub struct Fixture {
    pub dir: TempDir,
    pub service: Arc<MountService>,
}

impl Fixture {
    pub fn new(umount_succeeds: bool) -> Self {
        let rclone = fake_rclone().to_path_buf();
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("mounts")).unwrap();
        let config = Config {
            mount_root: dir.path().join("mounts"),
            uid: getuid().as_raw(),
            gid: getgid().as_raw(),
            grace_window: Duration::from_millis(300),
            terminate_timeout: Duration::from_secs(5),
            rclone_bin: rclone,
            umount_bin: PathBuf::from(if umount_succeeds { "true" } else { "false" }),
            init_mounts: dir.path().join("mounts.json"),
            ..Config::default()
        };
        let service = Arc::new(MountService::new(Arc::new(config)).unwrap());
        Fixture { dir, service }
    }

    pub fn log(&self) -> PathBuf {
        self.dir.path().join("launches.log")
    }

    pub fn mount_point(&self, path: &str) -> PathBuf {
        self.service.config().mount_point(path)
    }

    /// One line per launched mount process: `<pid> <args...>`.
    pub fn launches(&self) -> Vec<String> {
        std::fs::read_to_string(self.log())
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn request(&self, path: &str, behavior: &str) -> MountRequest {
        let mut req = webdav_request(path);
        req.options
            .config
            .insert("behavior".into(), behavior.into());
        req.options
            .config
            .insert("log".into(), self.log().display().to_string());
        req
    }

    pub async fn wait_until_gone(&self, path: &str) -> bool {
        for _ in 0..100 {
            if !self.service.registry().contains(path).await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    /// Stops whatever a test left running.
    pub async fn cleanup(&self) {
        for path in self.service.registry().paths().await {
            let _ = self.service.remove_mount(&path, true).await;
        }
    }
}

pub fn webdav_request(path: &str) -> MountRequest {
    let mut options = MountOptions::default();
    for (k, v) in [
        ("type", "webdav"),
        ("vendor", "nextcloud"),
        ("url", "https://x/webdav"),
        ("remotepath", "/"),
    ] {
        options.config.insert(k.into(), v.into());
    }
    MountRequest {
        path: path.into(),
        kind: "generic-remote".into(),
        options,
    }
}

pub fn process_alive(pid: i32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}
