//! Minimal RPC client: one POST per call, mapped to the CLI's exit codes.

use crate::config::Connection;

/// Exit code convention for every subcommand: success, an operational
/// failure the caller can retry or inspect, or an auth failure.
#[derive(Debug, Clone, Copy)]
pub enum ExitCode {
    Success = 0,
    OperationalFailure = 1,
    AuthFailure = 2,
}

pub struct Client {
    http: reqwest::Client,
    conn: Connection,
}

impl Client {
    pub fn new(conn: Connection) -> Self {
        Self { http: reqwest::Client::new(), conn }
    }

    /// `POST {url}/rpc/{method}` with the identity headers set, returning
    /// the parsed JSON body on success or the exit code to use on failure.
    pub async fn call(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, (ExitCode, String)> {
        let mut req = self.http.post(format!("{}/rpc/{method}", self.conn.url)).json(&body);

        if let Some(machine) = &self.conn.machine {
            req = req.header("Machine-Name", machine);
        }
        if let Some(project) = &self.conn.project {
            req = req.header("Project-Name", project);
        }
        if let Some(token) = &self.conn.token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }

        let resp = req
            .send()
            .await
            .map_err(|e| (ExitCode::OperationalFailure, format!("request failed: {e}")))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| (ExitCode::OperationalFailure, format!("malformed response: {e}")))?;

        if status.is_success() {
            return Ok(body);
        }

        let message = body
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .unwrap_or("request failed")
            .to_owned();

        if status.as_u16() == 401 || status.as_u16() == 403 {
            Err((ExitCode::AuthFailure, message))
        } else {
            Err((ExitCode::OperationalFailure, message))
        }
    }
}
