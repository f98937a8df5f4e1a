use std::path::PathBuf;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser, ValueEnum};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Listening host
    #[arg(long, env = "DATAMOUNT_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Listening port
    #[arg(short, long, env = "DATAMOUNT_PORT", default_value_t = 8090)]
    pub port: u16,

    /// Directory under which every mount point is created
    #[arg(long, env = "DATAMOUNT_BASE_DIR", default_value = "/mnt/data_mounts")]
    pub mount_root: PathBuf,

    /// Owner uid of created mount points and of the mounted files
    #[arg(long, env = "DATAMOUNT_UID", default_value_t = 1000)]
    pub uid: u32,

    /// Owner gid of created mount points and of the mounted files
    #[arg(long, env = "DATAMOUNT_GID", default_value_t = 100)]
    pub gid: u32,

    /// Allow NFS mounts
    #[arg(
        long,
        env = "NFS_ENABLED",
        default_value = "false",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub nfs_enabled: bool,

    /// Comma separated CIDR ranges NFS servers must not be in
    #[arg(long, env = "NFS_BLOCKED_MOUNTS", default_value = "")]
    pub nfs_blocked_mounts: String,

    /// Allow UFTP mounts
    #[arg(
        long,
        env = "UFTP_ENABLED",
        default_value = "true",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub uftp_enabled: bool,

    /// Allow rclone mounts
    #[arg(
        long,
        env = "RCLONE_ENABLED",
        default_value = "true",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub rclone_enabled: bool,

    /// JSON manifest of mounts created at startup
    #[arg(long, env = "INIT_MOUNTS", default_value = "/mnt/init_mounts/mounts.json")]
    pub init_mounts: PathBuf,

    /// How long a freshly launched mount process must survive to count as mounted
    #[arg(long, env = "DATAMOUNT_GRACE_MS", default_value_t = 3000)]
    pub grace_ms: u64,

    /// How long to wait after SIGTERM before a mount process is killed
    #[arg(long, env = "DATAMOUNT_TERMINATE_TIMEOUT", default_value_t = 10)]
    pub terminate_timeout_secs: u64,

    #[arg(long, env = "RCLONE_BIN", default_value = "rclone")]
    pub rclone_bin: PathBuf,

    #[arg(
        long,
        env = "UFTP_FUSEDRIVER_BIN",
        default_value = "/opt/datamount_venv/bin/unicore-fusedriver"
    )]
    pub uftp_bin: PathBuf,

    #[arg(long, env = "UMOUNT_BIN", default_value = "umount")]
    pub umount_bin: PathBuf,

    /// Skip TLS certificate verification when talking to UFTP auth servers
    #[arg(
        long,
        env = "UFTP_INSECURE",
        default_value = "true",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub uftp_insecure: bool,

    /// Force-unmount everything when the service stops
    #[arg(
        long,
        env = "DATAMOUNT_UNMOUNT_ON_SHUTDOWN",
        default_value = "true",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub unmount_on_shutdown: bool,

    #[arg(long, env = "DATAMOUNT_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}
