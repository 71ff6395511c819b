use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use shared::{OrchestratorError, OrchestratorResult};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::auth::{Credentials, SessionTicket};
use super::{EnvironmentController, PowerState, SnapshotInfo, DEFAULT_POLL_INTERVAL};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for one Proxmox VE guest
#[derive(Debug, Clone)]
pub struct ProxmoxConfig {
    /// Scheme, host and port, e.g. `https://proxmox.local:8006`
    pub host: String,
    pub node: String,
    pub vmid: u32,
    pub credentials: Credentials,
    pub verify_ssl: bool,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
}

impl ProxmoxConfig {
    pub fn new(host: impl Into<String>, node: impl Into<String>, vmid: u32, credentials: Credentials) -> Self {
        Self {
            host: host.into(),
            node: node.into(),
            vmid,
            credentials,
            verify_ssl: false,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Every Proxmox API response wraps its payload in `data`
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct GuestStatus {
    status: String,
}

/// `EnvironmentController` backed by the Proxmox VE REST API
pub struct ProxmoxController {
    client: Client,
    api_base: String,
    node: String,
    vmid: u32,
    credentials: Credentials,
    session: OnceCell<SessionTicket>,
    poll_interval: Duration,
}

impl ProxmoxController {
    pub fn new(config: ProxmoxConfig) -> OrchestratorResult<Self> {
        if config.host.trim().is_empty() {
            return Err(OrchestratorError::Configuration("Proxmox host is empty".to_string()));
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .user_agent("Detonation-Orchestrator/1.0")
            .build()?;

        info!(
            node = %config.node,
            vmid = config.vmid,
            auth = config.credentials.scheme(),
            "Proxmox controller configured for {}",
            config.host
        );

        Ok(Self {
            client,
            api_base: format!("{}/api2/json", config.host.trim_end_matches('/')),
            node: config.node,
            vmid: config.vmid,
            credentials: config.credentials,
            session: OnceCell::new(),
            poll_interval: config.poll_interval,
        })
    }

    fn guest_url(&self, suffix: &str) -> String {
        format!("{}/nodes/{}/qemu/{}{}", self.api_base, self.node, self.vmid, suffix)
    }

    /// Ticket for session auth, exchanged on first use. A failed exchange is
    /// not stored, so the next request tries again.
    async fn session_ticket(&self, username: &str, password: &str) -> OrchestratorResult<&SessionTicket> {
        self.session
            .get_or_try_init(|| async {
                debug!(username = %username, "Requesting Proxmox session ticket");
                let response = self
                    .client
                    .post(format!("{}/access/ticket", self.api_base))
                    .form(&[("username", username), ("password", password)])
                    .send()
                    .await?;

                // A rejected login means the configured credentials are wrong
                if response.status() != StatusCode::OK {
                    return Err(OrchestratorError::Configuration(format!(
                        "Proxmox rejected credentials for {} (HTTP {})",
                        username,
                        response.status().as_u16()
                    )));
                }

                let envelope: Envelope<SessionTicket> = Self::parse(response, "session ticket").await?;
                info!(username = %username, "Proxmox session established");
                Ok::<_, OrchestratorError>(envelope.data)
            })
            .await
    }

    /// Attach credentials. The CSRF token is only sent on mutating calls.
    async fn authorize(&self, request: RequestBuilder, mutating: bool) -> OrchestratorResult<RequestBuilder> {
        match &self.credentials {
            Credentials::ApiToken { .. } => Ok(request.header("Authorization", self.credentials.token_header())),
            Credentials::Session { username, password } => {
                let ticket = self.session_ticket(username, password).await?;
                let request = request.header("Cookie", ticket.cookie());
                if mutating {
                    Ok(request.header("CSRFPreventionToken", ticket.csrf_token.as_str()))
                } else {
                    Ok(request)
                }
            }
        }
    }

    async fn ensure_ok(response: Response, what: &str) -> OrchestratorResult<Response> {
        let status = response.status();
        if status == StatusCode::OK {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(OrchestratorError::Application(format!(
            "Proxmox {} failed with HTTP {}: {}",
            what,
            status.as_u16(),
            body.trim()
        )))
    }

    async fn parse<T: DeserializeOwned>(response: Response, what: &str) -> OrchestratorResult<T> {
        let response = Self::ensure_ok(response, what).await?;
        Ok(response.json::<T>().await?)
    }

    async fn get_data<T: DeserializeOwned>(&self, suffix: &str, what: &str) -> OrchestratorResult<T> {
        let request = self.authorize(self.client.get(self.guest_url(suffix)), false).await?;
        let response = request.send().await?;
        let envelope: Envelope<T> = Self::parse(response, what).await?;
        Ok(envelope.data)
    }

    /// POST with no body. Response bodies of power and rollback calls carry a
    /// task id only and are ignored.
    async fn post_action(&self, suffix: &str, what: &str) -> OrchestratorResult<()> {
        let request = self.authorize(self.client.post(self.guest_url(suffix)), true).await?;
        let response = request.send().await?;
        Self::ensure_ok(response, what).await?;
        Ok(())
    }
}

#[async_trait]
impl EnvironmentController for ProxmoxController {
    fn environment_id(&self) -> String {
        format!("{}/{}", self.node, self.vmid)
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn list_snapshots(&self) -> OrchestratorResult<Vec<SnapshotInfo>> {
        let snapshots: Vec<SnapshotInfo> = self.get_data("/snapshot", "snapshot listing").await?;
        debug!(environment = %self.environment_id(), count = snapshots.len(), "Listed snapshots");
        Ok(snapshots)
    }

    async fn rollback(&self, snapshot: &str) -> OrchestratorResult<()> {
        info!(environment = %self.environment_id(), snapshot = %snapshot, "Rolling back to snapshot");
        self.post_action(&format!("/snapshot/{}/rollback", snapshot), "rollback")
            .await
    }

    async fn start(&self) -> OrchestratorResult<()> {
        info!(environment = %self.environment_id(), "Starting guest");
        self.post_action("/status/start", "start").await
    }

    async fn shutdown(&self) -> OrchestratorResult<()> {
        info!(environment = %self.environment_id(), "Shutting down guest");
        self.post_action("/status/shutdown", "shutdown").await
    }

    async fn stop(&self) -> OrchestratorResult<()> {
        info!(environment = %self.environment_id(), "Force stopping guest");
        self.post_action("/status/stop", "stop").await
    }

    async fn status(&self) -> OrchestratorResult<PowerState> {
        let status: GuestStatus = self.get_data("/status/current", "status query").await?;
        Ok(PowerState::from_status(&status.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use shared::ErrorKind;

    const SNAPSHOTS: &str = r#"{"data":[
        {"name":"clean","description":"baseline","snaptime":1700000000},
        {"name":"current","description":"You are here!","parent":"patched"},
        {"name":"patched","description":"","snaptime":1700100000,"parent":"clean"}
    ]}"#;

    fn token_controller(url: &str) -> ProxmoxController {
        let mut config = ProxmoxConfig::new(url, "pve", 100, Credentials::api_token("root@pam!ci", "s3cret"));
        config.poll_interval = Duration::from_millis(10);
        ProxmoxController::new(config).unwrap()
    }

    fn session_controller(url: &str) -> ProxmoxController {
        ProxmoxController::new(ProxmoxConfig::new(url, "pve", 100, Credentials::session("root@pam", "pw"))).unwrap()
    }

    #[tokio::test]
    async fn test_token_auth_and_latest_snapshot() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api2/json/nodes/pve/qemu/100/snapshot")
            .match_header("authorization", "PVEAPIToken=root@pam!ci=s3cret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(SNAPSHOTS)
            .create_async()
            .await;

        let controller = token_controller(&server.url());
        assert_eq!(controller.environment_id(), "pve/100");

        let latest = controller.latest_snapshot().await.unwrap();
        assert_eq!(latest.name, "patched");
        assert_eq!(latest.parent.as_deref(), Some("clean"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rollback_and_power_paths() {
        let mut server = Server::new_async().await;
        let rollback = server
            .mock("POST", "/api2/json/nodes/pve/qemu/100/snapshot/clean/rollback")
            .with_status(200)
            .with_body(r#"{"data":"UPID:pve:0001"}"#)
            .create_async()
            .await;
        let start = server
            .mock("POST", "/api2/json/nodes/pve/qemu/100/status/start")
            .with_status(200)
            .with_body(r#"{"data":"UPID:pve:0002"}"#)
            .create_async()
            .await;
        let shutdown = server
            .mock("POST", "/api2/json/nodes/pve/qemu/100/status/shutdown")
            .with_status(500)
            .with_body("guest agent not running")
            .create_async()
            .await;

        let controller = token_controller(&server.url());
        controller.rollback("clean").await.unwrap();
        controller.start().await.unwrap();

        let err = controller.shutdown().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Application(ref m) if m.contains("500")));

        rollback.assert_async().await;
        start.assert_async().await;
        shutdown.assert_async().await;
    }

    #[tokio::test]
    async fn test_status_and_wait_for_running() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/api2/json/nodes/pve/qemu/100/status/current")
            .with_status(200)
            .with_body(r#"{"data":{"status":"running","qmpstatus":"running","vmid":100}}"#)
            .create_async()
            .await;

        let controller = token_controller(&server.url());
        assert_eq!(controller.status().await.unwrap(), PowerState::Running);
        controller
            .wait_for_status(PowerState::Running, Duration::from_secs(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_stopped_times_out() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/api2/json/nodes/pve/qemu/100/status/current")
            .with_status(200)
            .with_body(r#"{"data":{"status":"running"}}"#)
            .expect_at_least(2)
            .create_async()
            .await;

        let controller = token_controller(&server.url());
        let err = controller
            .wait_for_status(PowerState::Stopped, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_session_ticket_is_exchanged_once() {
        let mut server = Server::new_async().await;
        let login = server
            .mock("POST", "/api2/json/access/ticket")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("username".into(), "root@pam".into()),
                Matcher::UrlEncoded("password".into(), "pw".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"data":{"ticket":"PVE:root@pam:TICKET","CSRFPreventionToken":"CSRF123","username":"root@pam"}}"#)
            .expect(1)
            .create_async()
            .await;
        let status = server
            .mock("GET", "/api2/json/nodes/pve/qemu/100/status/current")
            .match_header("cookie", "PVEAuthCookie=PVE:root@pam:TICKET")
            .match_header("csrfpreventiontoken", Matcher::Missing)
            .with_status(200)
            .with_body(r#"{"data":{"status":"stopped"}}"#)
            .create_async()
            .await;
        let start = server
            .mock("POST", "/api2/json/nodes/pve/qemu/100/status/start")
            .match_header("cookie", "PVEAuthCookie=PVE:root@pam:TICKET")
            .match_header("csrfpreventiontoken", "CSRF123")
            .with_status(200)
            .with_body(r#"{"data":null}"#)
            .create_async()
            .await;

        let controller = session_controller(&server.url());
        assert_eq!(controller.status().await.unwrap(), PowerState::Stopped);
        controller.start().await.unwrap();

        login.assert_async().await;
        status.assert_async().await;
        start.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_login_is_retried_on_next_call() {
        let mut server = Server::new_async().await;
        let rejected = server
            .mock("POST", "/api2/json/access/ticket")
            .with_status(401)
            .with_body("authentication failure")
            .create_async()
            .await;

        let controller = session_controller(&server.url());
        let err = controller.status().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("401"));
        rejected.assert_async().await;
        rejected.remove_async().await;

        let _mock = server
            .mock("POST", "/api2/json/access/ticket")
            .with_status(200)
            .with_body(r#"{"data":{"ticket":"T2","CSRFPreventionToken":"C2"}}"#)
            .create_async()
            .await;
        let _mock = server
            .mock("GET", "/api2/json/nodes/pve/qemu/100/status/current")
            .match_header("cookie", "PVEAuthCookie=T2")
            .with_status(200)
            .with_body(r#"{"data":{"status":"running"}}"#)
            .create_async()
            .await;

        assert_eq!(controller.status().await.unwrap(), PowerState::Running);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let controller = token_controller("http://127.0.0.1:1");
        let err = controller.list_snapshots().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Transport(_)));
    }
}
