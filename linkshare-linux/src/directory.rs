//! Session directory client: create, join, cancel and validate session codes.
//!
//! The directory is a plain HTTP service; the engine only consumes the four
//! fields it hands out (code, relay server, UDP port, TCP port).

use std::time::Duration;

use linkshare_core::SessionCode;
use serde::Deserialize;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Cancellation runs during teardown; keep its bound tight.
const CANCEL_TIMEOUT: Duration = Duration::from_secs(5);

/// Directory response to `create`: a fresh code plus relay coordinates.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionGrant {
    pub code: String,
    pub relay_server: String,
    pub udp_port: u16,
    pub tcp_port: u16,
}

/// Directory response to `join`: relay coordinates for an existing code.
#[derive(Debug, Clone, Deserialize)]
pub struct JoinGrant {
    pub relay_server: String,
    pub udp_port: u16,
    pub tcp_port: u16,
}

#[derive(Debug, Deserialize)]
struct ValidateReply {
    active: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("directory rejected the request: {status}")]
    Rejected { status: reqwest::StatusCode },
}

pub struct DirectoryClient {
    http: reqwest::Client,
    base: String,
    device_id: String,
}

impl DirectoryClient {
    pub fn new(base_url: String) -> Result<Self, DirectoryError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(DirectoryClient {
            http,
            base: base_url,
            device_id: uuid::Uuid::new_v4().to_string(),
        })
    }

    /// Ask for a new session as host.
    pub async fn create(&self) -> Result<SessionGrant, DirectoryError> {
        let resp = self
            .http
            .post(self.url("create/"))
            .json(&serde_json::json!({ "device_id": self.device_id }))
            .send()
            .await?;
        Ok(checked(resp)?.json().await?)
    }

    /// Join an existing session as client. The directory matches codes
    /// case-insensitively by uppercasing; `SessionCode` already did.
    pub async fn join(&self, code: &SessionCode) -> Result<JoinGrant, DirectoryError> {
        let resp = self
            .http
            .post(self.url("join/"))
            .json(&serde_json::json!({
                "code": code.as_str(),
                "device_id": self.device_id,
            }))
            .send()
            .await?;
        Ok(checked(resp)?.json().await?)
    }

    /// Invalidate a session code. Best-effort at teardown.
    pub async fn cancel(&self, code: &SessionCode) -> Result<(), DirectoryError> {
        let resp = self
            .http
            .post(self.url("cancel/"))
            .timeout(CANCEL_TIMEOUT)
            .json(&serde_json::json!({ "code": code.as_str() }))
            .send()
            .await?;
        checked(resp)?;
        Ok(())
    }

    /// Whether the directory still considers the code usable.
    pub async fn validate(&self, code: &SessionCode) -> Result<bool, DirectoryError> {
        let resp = self
            .http
            .get(self.url(&format!("validate/{}", code.as_str())))
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let reply: ValidateReply = checked(resp)?.json().await?;
        Ok(reply.active)
    }

    fn url(&self, path: &str) -> String {
        if self.base.ends_with('/') {
            format!("{}{path}", self.base)
        } else {
            format!("{}/{path}", self.base)
        }
    }
}

fn checked(resp: reqwest::Response) -> Result<reqwest::Response, DirectoryError> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        Err(DirectoryError::Rejected {
            status: resp.status(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal one-shot HTTP server: read a request, send a canned response.
    async fn one_shot_server(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = conn.read(&mut buf).await;
            let resp = format!(
                "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = conn.write_all(resp.as_bytes()).await;
        });
        format!("http://{addr}/api/")
    }

    #[tokio::test]
    async fn create_parses_grant() {
        let base = one_shot_server(
            "HTTP/1.1 201 Created",
            r#"{"code":"A1B2C3","relay_server":"relay.example","udp_port":52000,"tcp_port":52001}"#,
        )
        .await;
        let client = DirectoryClient::new(base).unwrap();
        let grant = client.create().await.unwrap();
        assert_eq!(grant.code, "A1B2C3");
        assert_eq!(grant.relay_server, "relay.example");
        assert_eq!(grant.udp_port, 52000);
        assert_eq!(grant.tcp_port, 52001);
    }

    #[tokio::test]
    async fn validate_reports_active_flag() {
        let base = one_shot_server("HTTP/1.1 200 OK", r#"{"active":false}"#).await;
        let client = DirectoryClient::new(base).unwrap();
        let code = SessionCode::new("A1B2C3").unwrap();
        assert!(!client.validate(&code).await.unwrap());
    }

    #[tokio::test]
    async fn validate_missing_code_is_inactive() {
        let base = one_shot_server("HTTP/1.1 404 Not Found", r#"{"error":"unknown"}"#).await;
        let client = DirectoryClient::new(base).unwrap();
        let code = SessionCode::new("A1B2C3").unwrap();
        assert!(!client.validate(&code).await.unwrap());
    }

    #[tokio::test]
    async fn join_rejection_is_surfaced() {
        let base = one_shot_server("HTTP/1.1 410 Gone", r#"{"error":"Session expired"}"#).await;
        let client = DirectoryClient::new(base).unwrap();
        let code = SessionCode::new("A1B2C3").unwrap();
        match client.join(&code).await.unwrap_err() {
            DirectoryError::Rejected { status } => assert_eq!(status, reqwest::StatusCode::GONE),
            other => panic!("expected Rejected, got {other:?}"),
        }
    }
}
