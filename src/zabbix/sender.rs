//! Value submission through the zabbix_sender line protocol.
//!
//! Values are piped to the zabbix_sender binary on stdin as
//! `host key value` lines. Newlines inside values are escaped to a literal
//! `\n` so multi-line values survive the line protocol.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::config::Config;
use crate::error::{Result, ZtcError};
use crate::zabbix::types::LldData;

/// Maximum rows per zabbix_sender invocation.
const BATCH_SIZE: usize = 1000;

/// Wall-clock limit for one zabbix_sender run.
const SENDER_TIMEOUT: Duration = Duration::from_secs(60);

/// One `host key value` triple for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderData {
    /// Technical name of the destination host.
    pub host: String,
    /// Trapper item key.
    pub key: String,
    /// Value, unescaped.
    pub value: String,
}

/// Wraps the zabbix_sender binary.
pub struct Sender {
    cfg: Arc<Config>,
}

impl Sender {
    pub fn new(cfg: Arc<Config>) -> Self {
        Self { cfg }
    }

    /// Send a batch of triples in a single zabbix_sender invocation.
    pub async fn send(&self, data: &[SenderData]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let input = format_lines(data);
        debug!(items = data.len(), "sending data to Zabbix");

        let mut child = Command::new(&self.cfg.zabbix.sender_path)
            .arg("-z")
            .arg(&self.cfg.zabbix.server_fqdn)
            .arg("-p")
            .arg(self.cfg.zabbix.server_port.to_string())
            .arg("-i")
            .arg("-") // read from stdin
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes()).await?;
        }

        let output = match tokio::time::timeout(SENDER_TIMEOUT, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(ZtcError::sender(
                    format!("timed out after {}s", SENDER_TIMEOUT.as_secs()),
                    "",
                ))
            }
        };

        let combined = [output.stdout, output.stderr].concat();
        let combined = String::from_utf8_lossy(&combined).into_owned();

        if !output.status.success() {
            return Err(ZtcError::sender(
                format!("exited with {}", output.status),
                combined,
            ));
        }

        debug!(output = %combined, "zabbix_sender completed");
        Ok(())
    }

    /// Serialize a discovery payload as JSON and submit it as one value.
    pub async fn send_lld(&self, host: &str, key: &str, lld: &LldData) -> Result<()> {
        let value = serde_json::to_string(lld)?;
        self.send(&[SenderData {
            host: host.to_string(),
            key: key.to_string(),
            value,
        }])
        .await
    }

    /// Send a single value.
    pub async fn send_value(&self, host: &str, key: &str, value: &str) -> Result<()> {
        self.send(&[SenderData {
            host: host.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        }])
        .await
    }

    /// Send many triples, splitting into batches of at most 1000 rows.
    pub async fn send_batch(&self, items: &[SenderData]) -> Result<()> {
        for chunk in items.chunks(BATCH_SIZE) {
            self.send(chunk).await?;
        }
        Ok(())
    }
}

/// Build the stdin payload: one `host key value` line per triple, newlines
/// in values escaped.
pub(crate) fn format_lines(data: &[SenderData]) -> String {
    data.iter()
        .map(|d| {
            let value = d.value.replace('\n', "\\n");
            format!("{} {} {}", d.host, d.key, value)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
