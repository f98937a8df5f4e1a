use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::anyhow;
use ipnetwork::IpNetwork;

use crate::utils::cli::{Args, LogFormat};

#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub mount_root: PathBuf,
    pub uid: u32,
    pub gid: u32,
    pub nfs_enabled: bool,
    pub nfs_blocked_networks: Vec<IpNetwork>,
    pub uftp_enabled: bool,
    pub rclone_enabled: bool,
    pub init_mounts: PathBuf,
    pub grace_window: Duration,
    pub terminate_timeout: Duration,
    pub rclone_bin: PathBuf,
    pub uftp_bin: PathBuf,
    pub umount_bin: PathBuf,
    pub uftp_insecure: bool,
    pub unmount_on_shutdown: bool,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "0.0.0.0".to_string(),
            port: 8090,
            mount_root: PathBuf::from("/mnt/data_mounts"),
            uid: 1000,
            gid: 100,
            nfs_enabled: false,
            nfs_blocked_networks: Vec::new(),
            uftp_enabled: true,
            rclone_enabled: true,
            init_mounts: PathBuf::from("/mnt/init_mounts/mounts.json"),
            grace_window: Duration::from_secs(3),
            terminate_timeout: Duration::from_secs(10),
            rclone_bin: PathBuf::from("rclone"),
            uftp_bin: PathBuf::from("/opt/datamount_venv/bin/unicore-fusedriver"),
            umount_bin: PathBuf::from("umount"),
            uftp_insecure: true,
            unmount_on_shutdown: true,
            log_format: LogFormat::Text,
        }
    }
}

impl Config {
    /// Absolute mount point of a (validated, relative) request path.
    pub fn mount_point(&self, path: &str) -> PathBuf {
        self.mount_root.join(path)
    }

    /// Builds the runtime config from parsed arguments, reporting every problem at once.
    pub async fn from_args(args: &Args) -> Result<Config, anyhow::Error> {
        let mut validation_errors = Vec::new();

        match tokio::fs::metadata(&args.mount_root).await {
            Ok(meta) if !meta.is_dir() => validation_errors.push(format!(
                "DATAMOUNT_BASE_DIR `{}` exists but is not a directory",
                args.mount_root.display()
            )),
            Ok(_) => {}
            Err(_) => {
                if let Err(e) = tokio::fs::create_dir_all(&args.mount_root).await {
                    validation_errors.push(format!(
                        "DATAMOUNT_BASE_DIR `{}` does not exist and cannot be created: {e}",
                        args.mount_root.display()
                    ));
                }
            }
        }

        let nfs_blocked_networks = match parse_cidr_list(&args.nfs_blocked_mounts) {
            Ok(networks) => networks,
            Err(e) => {
                validation_errors.push(e.to_string());
                Vec::new()
            }
        };

        if args.grace_ms == 0 {
            validation_errors.push("DATAMOUNT_GRACE_MS must be greater than zero".to_string());
        }

        if !validation_errors.is_empty() {
            return Err(anyhow!(validation_errors.join("\n")));
        }

        Ok(Config {
            host: args.host.clone(),
            port: args.port,
            mount_root: args.mount_root.clone(),
            uid: args.uid,
            gid: args.gid,
            nfs_enabled: args.nfs_enabled,
            nfs_blocked_networks,
            uftp_enabled: args.uftp_enabled,
            rclone_enabled: args.rclone_enabled,
            init_mounts: args.init_mounts.clone(),
            grace_window: Duration::from_millis(args.grace_ms),
            terminate_timeout: Duration::from_secs(args.terminate_timeout_secs),
            rclone_bin: args.rclone_bin.clone(),
            uftp_bin: args.uftp_bin.clone(),
            umount_bin: args.umount_bin.clone(),
            uftp_insecure: args.uftp_insecure,
            unmount_on_shutdown: args.unmount_on_shutdown,
            log_format: args.log_format,
        })
    }
}

/// Parses `10.0.0.0/8,192.168.0.0/16`; blank items are ignored.
pub fn parse_cidr_list(raw: &str) -> Result<Vec<IpNetwork>, anyhow::Error> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| IpNetwork::from_str(s).map_err(|e| anyhow!("invalid CIDR `{s}` in NFS_BLOCKED_MOUNTS: {e}")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cidr_list() {
        let networks = parse_cidr_list("10.0.0.0/8, ,192.168.1.0/24,fd00::/8").unwrap();
        assert_eq!(networks.len(), 3);
        assert!(parse_cidr_list("").unwrap().is_empty());
        assert!(parse_cidr_list("10.0.0.0/33").is_err());
    }

    #[test]
    fn test_mount_point_is_joined_to_root() {
        let config = Config {
            mount_root: PathBuf::from("/srv/mounts"),
            ..Config::default()
        };
        let mp = config.mount_point("team/data1");
        assert_eq!(mp, PathBuf::from("/srv/mounts/team/data1"));
    }
}
