//! Fix-command generation and remote execution.
//!
//! Commands run either through the Zabbix agent (`zabbix_get` with a
//! `system.run[<cmd>,nowait]` key) or over SSH. Both paths validate their
//! inputs first and retry twice with linear back-off.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Result, ZtcError};
use crate::fixer::sanitize::{sanitize_packages, validate_host_target, validate_ssh_user};

/// Executes fix commands on remote hosts.
pub struct Executor {
    cfg: Arc<Config>,
}

impl Executor {
    pub fn new(cfg: Arc<Config>) -> Self {
        Self { cfg }
    }

    /// Execute a command on a host via the Zabbix agent. Uses nowait mode
    /// so long-running updates don't block the agent; requires system.run
    /// to be enabled in the agent config.
    pub async fn execute_via_agent(
        &self,
        address: &str,
        port: &str,
        command: &str,
    ) -> Result<String> {
        validate_host_target(address)?;

        let port = if port.is_empty() { "10050" } else { port };

        debug!(host = address, port, command, "executing command via Zabbix agent");

        let key = format!("system.run[{command},nowait]");
        let output = Command::new(&self.cfg.zabbix.get_path)
            .arg("-s")
            .arg(address)
            .arg("-p")
            .arg(port)
            .arg("-k")
            .arg(&key)
            .output()
            .await?;

        if !output.status.success() {
            return Err(ZtcError::validation(format!(
                "zabbix_get failed: {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Execute a command on a host over SSH, non-interactively.
    pub async fn execute_via_ssh(
        &self,
        address: &str,
        user: &str,
        command: &str,
    ) -> Result<String> {
        validate_host_target(address)?;
        validate_ssh_user(user)?;

        debug!(host = address, user, command, "executing command via SSH");

        let output = Command::new("ssh")
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("ConnectTimeout=10")
            .arg(format!("{user}@{address}"))
            .arg(command)
            .output()
            .await?;

        if !output.status.success() {
            return Err(ZtcError::validation(format!(
                "SSH failed: {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Generate the package-manager command for a host. A package name
    /// failing validation drops the whole list, falling back to a full
    /// system update.
    pub fn generate_fix_command(&self, os_name: &str, packages: &[String]) -> String {
        let mut packages = packages;
        if let Err(e) = sanitize_packages(packages) {
            warn!(error = %e, "invalid package name detected, falling back to full system update");
            packages = &[];
        }

        let os_name = os_name.to_lowercase();

        if os_name.contains("centos")
            || os_name.contains("red hat")
            || os_name.contains("redhat")
            || os_name.contains("rhel")
            || os_name.contains("amazon")
        {
            rhel_fix_command(packages)
        } else {
            // Debian/Ubuntu, and the default for unknown distros.
            debian_fix_command(packages)
        }
    }

    /// Run `attempt` up to `1 + max_retries` times with linear back-off
    /// between attempts. Cancellation interrupts the back-off wait.
    pub async fn execute_with_retry<F, Fut>(
        &self,
        cancel: &CancellationToken,
        max_retries: u32,
        attempt: F,
    ) -> Result<String>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let mut last_err = ZtcError::validation("no attempts made");
        for try_number in 0..=max_retries {
            match attempt().await {
                Ok(output) => return Ok(output),
                Err(e) => last_err = e,
            }

            if try_number < max_retries {
                warn!(attempt = try_number + 1, error = %last_err, "command failed, retrying");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ZtcError::Cancelled),
                    _ = tokio::time::sleep(Duration::from_secs(u64::from(try_number) + 1)) => {}
                }
            }
        }
        Err(last_err)
    }
}

fn debian_fix_command(packages: &[String]) -> String {
    if packages.is_empty() {
        return "apt-get update && apt-get upgrade -y".to_string();
    }
    format!(
        "apt-get update && apt-get install -y --only-upgrade {}",
        quote_packages(packages)
    )
}

fn rhel_fix_command(packages: &[String]) -> String {
    if packages.is_empty() {
        return "yum update -y".to_string();
    }
    format!("yum update -y {}", quote_packages(packages))
}

/// Single-quote each name. Validation already rejects quotes, so this is
/// belt-and-braces for the shell on the far side.
fn quote_packages(packages: &[String]) -> String {
    packages
        .iter()
        .map(|p| format!("'{p}'"))
        .collect::<Vec<_>>()
        .join(" ")
}
