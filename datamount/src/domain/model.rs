use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Body of a create-mount call and one element of the startup manifest.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MountRequest {
    pub path: String,
    pub kind: String,
    #[serde(default)]
    pub options: MountOptions,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MountOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Set only by the manifest loader; callers cannot claim it.
    #[serde(default, skip_deserializing)]
    pub external: bool,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

impl MountRequest {
    pub fn config(&self, key: &str) -> Option<&str> {
        self.options
            .config
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn is_external(&self) -> bool {
        self.options.external
    }

    /// Copy for listings: external mounts never echo their backend config.
    pub fn redacted(&self) -> MountRequest {
        let mut view = self.clone();
        if view.options.external {
            view.options.config.clear();
        }
        view
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BackendKind {
    NetworkShare,
    TokenRemote,
    GenericRemote,
}

impl FromStr for BackendKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nfs" | "network-share" => Ok(BackendKind::NetworkShare),
            "uftp" | "token-remote" => Ok(BackendKind::TokenRemote),
            "rclone" | "generic-remote" => Ok(BackendKind::GenericRemote),
            _ => Err(AppError::UnknownBackend(s.to_string())),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::NetworkShare => "nfs",
            BackendKind::TokenRemote => "uftp",
            BackendKind::GenericRemote => "rclone",
        };
        f.write_str(name)
    }
}
