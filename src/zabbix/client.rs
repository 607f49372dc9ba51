//! Zabbix JSON-RPC 2.0 client.
//!
//! On construction the client queries the unauthenticated version endpoint,
//! stores the server version as a `(major, minor)` pair for version-aware
//! behavior, then logs in and keeps the session token for the lifetime of
//! the client. All subsequent calls carry the token except the login and
//! version calls themselves.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use crate::config::Config;
use crate::error::{Result, ZtcError};
use crate::zabbix::types::ApiResponse;

/// A connected Zabbix API client.
pub struct Client {
    pub(crate) cfg: Arc<Config>,
    http: reqwest::Client,
    api_url: String,
    auth_token: String,
    version: (u32, u32),
    request_id: AtomicI64,
}

impl Client {
    /// Connect to the Zabbix API: sniff the server version, then log in.
    pub async fn connect(cfg: Arc<Config>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.scan.timeout))
            .danger_accept_invalid_certs(!cfg.zabbix.verify_ssl)
            .build()?;

        let mut client = Self {
            api_url: cfg.api_url(),
            cfg,
            http,
            auth_token: String::new(),
            version: (0, 0),
            request_id: AtomicI64::new(0),
        };

        let raw = client.api_version().await?;
        client.version = parse_version(&raw);
        debug!(version = %raw, "detected Zabbix API version");

        client.authenticate().await?;
        Ok(client)
    }

    async fn authenticate(&mut self) -> Result<()> {
        let result = self
            .call(
                "user.login",
                json!({
                    "user": self.cfg.zabbix.api_user,
                    "password": self.cfg.zabbix.api_password,
                }),
            )
            .await?;

        let token = result
            .as_str()
            .ok_or_else(|| ZtcError::config(format!("unexpected auth response: {result}")))?;
        self.auth_token = token.to_string();
        debug!("authenticated with Zabbix API");
        Ok(())
    }

    /// Make a JSON-RPC call. Surfaces server errors as
    /// [`ZtcError::ZabbixApi`]; never retries.
    pub(crate) async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed) + 1;

        let mut body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });

        // The login and version calls are the only unauthenticated ones.
        if !self.auth_token.is_empty() && method != "user.login" && method != "apiinfo.version" {
            body["auth"] = json!(self.auth_token);
        }

        debug!(method, id, "calling Zabbix API");

        let response = self
            .http
            .post(&self.api_url)
            .header("Content-Type", "application/json-rpc")
            .json(&body)
            .send()
            .await?;

        let api: ApiResponse = response.json().await?;

        if let Some(err) = api.error {
            return Err(ZtcError::ZabbixApi {
                code: err.code,
                message: err.message,
                data: err.data,
            });
        }

        Ok(api.result.unwrap_or(Value::Null))
    }

    /// Fetch the Zabbix API version string (no auth required).
    pub async fn api_version(&self) -> Result<String> {
        let result = self.call("apiinfo.version", json!([])).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ZtcError::config(format!("unexpected API version response: {result}")))
    }

    /// The server version as `(major, minor)`.
    pub fn version(&self) -> (u32, u32) {
        self.version
    }

    /// Whether the server is at least the given `(major, minor)` version.
    pub fn version_at_least(&self, major: u32, minor: u32) -> bool {
        self.version >= (major, minor)
    }

    /// Log out from the API. The token stays usable until this is called.
    pub async fn logout(&self) -> Result<()> {
        if self.auth_token.is_empty() {
            return Ok(());
        }
        self.call("user.logout", json!([])).await?;
        Ok(())
    }
}

/// Parse a Zabbix version string like `"6.4.1"` into `(6, 4)`. Unparseable
/// input yields `(0, 0)` so version-aware code falls back to legacy paths.
pub(crate) fn parse_version(raw: &str) -> (u32, u32) {
    let mut parts = raw.split('.');
    let major = parts.next().and_then(|p| p.trim().parse().ok()).unwrap_or(0);
    let minor = parts.next().and_then(|p| p.trim().parse().ok()).unwrap_or(0);
    (major, minor)
}
