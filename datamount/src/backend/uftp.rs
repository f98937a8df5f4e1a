use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::backend::{Backend, Launch, require};
use crate::config::Config;
use crate::domain::{BackendKind, MountRequest};
use crate::error::AppError;

const CUSTOM_PATH_MARKER: &str = "__custom__path__";
const PREFERENCES_HEADER: &str = "X-UNICORE-User-Preferences";

/// Short-lived credentials returned by the UFTP auth server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub host: String,
    pub port: u16,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthReply {
    #[serde(default)]
    success: Option<Value>,
    #[serde(default)]
    server_host: Option<String>,
    #[serde(default)]
    server_port: Option<Value>,
    #[serde(default)]
    secret: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

impl AuthReply {
    fn succeeded(&self) -> bool {
        match &self.success {
            None => true,
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            Some(_) => false,
        }
    }

    fn port(&self) -> Option<u16> {
        match self.server_port.as_ref()? {
            Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// UNICORE UFTP: token exchange, then `unicore-fusedriver`.
pub struct UftpBackend {
    config: Arc<Config>,
    client: Client,
}

impl UftpBackend {
    pub fn new(config: Arc<Config>) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(config.uftp_insecure)
            .build()?;
        Ok(UftpBackend { config, client })
    }

    pub fn base_dir(req: &MountRequest) -> &str {
        match req.config("remotepath") {
            Some(CUSTOM_PATH_MARKER) => req.config("custompath").unwrap_or("/"),
            Some(path) => path,
            None => "/",
        }
    }

    pub fn preferences(req: &MountRequest) -> Option<String> {
        let mut prefs = Vec::new();
        if let Some(uid) = req.config("uid") {
            prefs.push(format!("uid:{uid}"));
        }
        if let Some(group) = req.config("group") {
            prefs.push(format!("group:{group}"));
        }
        (!prefs.is_empty()).then(|| prefs.join(","))
    }

    /// Exchanges the access token for a one-time UFTP session.
    pub async fn authenticate(&self, req: &MountRequest) -> Result<Session, AppError> {
        let token = require(req, "access_token")?;
        let auth_url = require(req, "auth_url")?;
        let base_dir = Self::base_dir(req);

        info!("Authenticate at {auth_url} for {base_dir} ...");
        let mut request = self
            .client
            .post(auth_url)
            .bearer_auth(token)
            .json(&json!({ "persistent": "true", "serverPath": base_dir }));
        if let Some(prefs) = Self::preferences(req) {
            request = request.header(PREFERENCES_HEADER, prefs);
        }

        let unreachable = |message: String, output: String| AppError::BackendUnreachable {
            message,
            output,
            config: None,
        };

        let response = request.send().await.map_err(|e| {
            unreachable("Config not working. UFTP auth request failed".to_string(), e.to_string())
        })?;
        let status = response.status();
        let body = response.text().await.map_err(|e| {
            unreachable("Config not working. UFTP auth reply unreadable".to_string(), e.to_string())
        })?;
        if !status.is_success() {
            return Err(unreachable(
                format!("Config not working. UFTP auth returned {status}"),
                body,
            ));
        }

        let reply: AuthReply = serde_json::from_str(&body).map_err(|e| {
            unreachable("Config not working. UFTP auth reply malformed".to_string(), e.to_string())
        })?;
        if !reply.succeeded() {
            return Err(unreachable(
                "Config not working. UFTP authentication failed".to_string(),
                reply.reason.clone().unwrap_or_default(),
            ));
        }
        match (reply.server_host.clone(), reply.port(), reply.secret.clone()) {
            (Some(host), Some(port), Some(password)) => {
                info!("Authenticate at {auth_url} ... successful, server {host}:{port}");
                Ok(Session { host, port, password })
            }
            _ => Err(unreachable(
                "Config not working. UFTP auth reply incomplete".to_string(),
                body,
            )),
        }
    }

    pub fn build_command(&self, req: &MountRequest, session: &Session, mount_point: &Path) -> Vec<String> {
        let mut cmd = vec![self.config.uftp_bin.display().to_string(), "-d".to_string()];
        if req.options.readonly {
            cmd.push("-r".to_string());
        }
        cmd.extend([
            "-P".to_string(),
            session.password.clone(),
            format!("{}:{}", session.host, session.port),
            "--fuse-options".to_string(),
            format!("uid={},gid={},allow_other", self.config.uid, self.config.gid),
            mount_point.display().to_string(),
        ]);
        cmd
    }
}

#[async_trait]
impl Backend for UftpBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::TokenRemote
    }

    fn validate(&self, req: &MountRequest) -> Result<(), AppError> {
        if !self.config.uftp_enabled {
            return Err(AppError::ConfigRejected("uftp disabled".to_string()));
        }
        require(req, "access_token")?;
        require(req, "auth_url")?;
        Ok(())
    }

    async fn prepare(&self, req: &MountRequest, mount_point: &Path) -> Result<Launch, AppError> {
        let session = self.authenticate(req).await?;
        Ok(Launch::new(self.build_command(req, &session, mount_point)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MountOptions;
    use axum::Json;
    use axum::Router;
    use axum::http::HeaderMap;
    use axum::routing::post;

    fn request(pairs: &[(&str, &str)]) -> MountRequest {
        MountRequest {
            path: "hpc".into(),
            kind: "uftp".into(),
            options: MountOptions {
                config: pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                ..MountOptions::default()
            },
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/rest/auth/UFTP")
    }

    #[test]
    fn test_base_dir_and_preferences() {
        let req = request(&[("remotepath", "__custom__path__"), ("custompath", "/p/project")]);
        assert_eq!(UftpBackend::base_dir(&req), "/p/project");
        assert_eq!(UftpBackend::base_dir(&request(&[])), "/");
        assert_eq!(UftpBackend::preferences(&request(&[])), None);
        assert_eq!(
            UftpBackend::preferences(&request(&[("uid", "alice"), ("group", "hpc")])).as_deref(),
            Some("uid:alice,group:hpc")
        );
    }

    #[tokio::test]
    async fn test_handshake_builds_command() {
        let router = Router::new().route(
            "/rest/auth/UFTP",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["authorization"], "Bearer tok");
                assert_eq!(headers[PREFERENCES_HEADER], "group:hpc");
                assert_eq!(body["serverPath"], "/home");
                Json(json!({
                    "success": true,
                    "serverHost": "uftp.example.org",
                    "serverPort": 64434,
                    "secret": "one-time"
                }))
            }),
        );
        let url = serve(router).await;
        let backend = UftpBackend::new(Arc::new(Config::default())).unwrap();
        let mut req = request(&[
            ("access_token", "tok"),
            ("auth_url", url.as_str()),
            ("remotepath", "/home"),
            ("group", "hpc"),
        ]);
        req.options.readonly = true;

        let launch = backend.prepare(&req, Path::new("/mnt/data_mounts/hpc")).await.unwrap();
        assert_eq!(
            &launch.argv[1..],
            [
                "-d",
                "-r",
                "-P",
                "one-time",
                "uftp.example.org:64434",
                "--fuse-options",
                "uid=1000,gid=100,allow_other",
                "/mnt/data_mounts/hpc"
            ]
        );
        assert!(launch.secrets.is_none());
    }

    #[tokio::test]
    async fn test_handshake_failure_is_reported() {
        let router = Router::new().route(
            "/rest/auth/UFTP",
            post(|| async { Json(json!({ "success": false, "reason": "token expired" })) }),
        );
        let url = serve(router).await;
        let backend = UftpBackend::new(Arc::new(Config::default())).unwrap();
        let req = request(&[("access_token", "tok"), ("auth_url", url.as_str())]);

        match backend.authenticate(&req).await {
            Err(AppError::BackendUnreachable { output, config, .. }) => {
                assert_eq!(output, "token expired");
                assert!(config.is_none());
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_validate_requires_token_and_auth_url() {
        let backend = UftpBackend::new(Arc::new(Config::default())).unwrap();
        assert!(backend.validate(&request(&[("access_token", "t")])).is_err());
        assert!(
            backend
                .validate(&request(&[("access_token", "t"), ("auth_url", "https://a")]))
                .is_ok()
        );
    }
}
