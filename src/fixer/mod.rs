//! Vulnerability remediation.
//!
//! Plans are derived from the scan data most recently published to Zabbix:
//! the packages and bulletins discovery payloads are read back through the
//! API and cross-filtered per host. That data reflects the fleet as of the
//! last completed `publish`, so run a scan (with push) before fixing.

pub mod executor;
pub mod sanitize;
pub mod types;

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Result, ZtcError};
use crate::scanner::osutil::parse_package_string;
use crate::zabbix::{Client, Host, LldData, BULLETINS_LLD_KEY, PACKAGES_LLD_KEY};

use executor::Executor;
use types::{FixOptions, FixPlan, FixResults, HostFixPlan, HostFixResult};

/// Orchestrates vulnerability remediation.
pub struct Fixer {
    cfg: Arc<Config>,
    zabbix: Arc<Client>,
    executor: Arc<Executor>,
}

impl Fixer {
    /// Connect to Zabbix and build a fixer.
    pub async fn new(cfg: Arc<Config>) -> Result<Self> {
        let zabbix = Arc::new(Client::connect(cfg.clone()).await?);
        Ok(Self {
            executor: Arc::new(Executor::new(cfg.clone())),
            cfg,
            zabbix,
        })
    }

    /// Create a fix plan for the given options.
    pub async fn plan(&self, opts: &FixOptions) -> Result<FixPlan> {
        // Virtual hosts have 127.0.0.1 loopback interfaces and are never
        // valid fix targets. A Zabbix action macro like {HOST.HOST} can
        // resolve to one, so refuse them by name up front.
        if !opts.host_name.is_empty() && self.is_virtual_host(&opts.host_name) {
            return Err(ZtcError::validation(format!(
                "host {:?} is a virtual host, not a real monitored host — refusing to fix",
                opts.host_name
            )));
        }

        let mut host_id = opts.host_id.clone();
        if !opts.host_name.is_empty() && host_id.is_empty() {
            let host = self.zabbix.host_by_name(&opts.host_name).await?;
            info!(host_name = %opts.host_name, host_id = %host.host_id, "resolved host name to ID");
            host_id = host.host_id;
        }

        if !host_id.is_empty() {
            let mut plan = FixPlan::default();
            if let Some(host_plan) = self.plan_for_host(&host_id).await? {
                plan.hosts.push(host_plan);
            }
            return Ok(plan);
        }

        if !opts.bulletin_id.is_empty() {
            return self.plan_for_bulletin(&opts.bulletin_id).await;
        }

        Err(ZtcError::validation(
            "either --host, --host-name, or --bulletin must be specified",
        ))
    }

    /// Plan for a single host from its published per-package data.
    async fn plan_for_host(&self, host_id: &str) -> Result<Option<HostFixPlan>> {
        let host = self.zabbix.host_by_id(host_id).await?;

        let packages = self.vulnerable_packages(host_id).await;
        if packages.is_empty() {
            warn!(host = %host.name, "no per-package vulnerability data found; fix will perform a full system update");
        }

        let (address, agent_port) = host_address(&host);
        if address.is_empty() {
            return Err(ZtcError::validation(format!(
                "no IP address found for host {}",
                host.name
            )));
        }

        let os_name = self.host_os(host_id).await;
        let command = self.executor.generate_fix_command(&os_name, &packages);

        Ok(Some(HostFixPlan {
            host_id: host_id.to_string(),
            name: host.name,
            address,
            agent_port,
            packages,
            command,
        }))
    }

    /// Plan for every host affected by a bulletin. The bulletins payload
    /// names the affected hosts and package lines; each host's package set
    /// is cross-filtered against the bulletin's so only its packages are
    /// upgraded.
    async fn plan_for_bulletin(&self, bulletin_id: &str) -> Result<FixPlan> {
        info!(bulletin = bulletin_id, "creating fix plan for bulletin");

        let mut plan = FixPlan::default();
        let (affected_host_ids, affected_packages) = self.bulletin_info(bulletin_id).await?;

        for host_id in &affected_host_ids {
            let host = match self.zabbix.host_by_id(host_id).await {
                Ok(host) => host,
                Err(e) => {
                    warn!(host = %host_id, error = %e, "failed to get host, skipping");
                    continue;
                }
            };

            let mut packages = Vec::new();
            for package in self.vulnerable_packages(host_id).await {
                if affected_packages.contains(&package) && !packages.contains(&package) {
                    packages.push(package);
                }
            }
            if packages.is_empty() {
                continue;
            }

            let (address, agent_port) = host_address(&host);
            if address.is_empty() {
                continue;
            }

            let os_name = self.host_os(host_id).await;
            let command = self.executor.generate_fix_command(&os_name, &packages);

            plan.hosts.push(HostFixPlan {
                host_id: host_id.clone(),
                name: host.name,
                address,
                agent_port,
                packages,
                command,
            });
        }

        if plan.hosts.is_empty() {
            warn!("no hosts with stored vulnerability data found for this bulletin");
        }

        Ok(plan)
    }

    /// Read the bulletins discovery payload back from the virtual host and
    /// extract the affected host IDs and package names for one bulletin.
    async fn bulletin_info(&self, bulletin_id: &str) -> Result<(Vec<String>, Vec<String>)> {
        let raw = self
            .zabbix
            .item_value(&self.cfg.naming.bulletins_host, BULLETINS_LLD_KEY)
            .await?;
        if raw.is_empty() {
            return Err(ZtcError::not_found(
                "bulletins discovery data; run 'ztc scan' first",
            ));
        }

        let lld: LldData = serde_json::from_str(&raw)?;
        for entry in &lld.data {
            if entry.get("{#B.ID}").and_then(Value::as_str) != Some(bulletin_id) {
                continue;
            }

            let host_ids = split_csv(entry.get("{#B.HOSTS}").and_then(Value::as_str));
            // {#B.PKGS} carries raw "name version arch" lines; the
            // per-host package data uses just the name portion.
            let mut packages = Vec::new();
            for raw_package in split_csv(entry.get("{#B.PKGS}").and_then(Value::as_str)) {
                let (name, _, _) = parse_package_string(&raw_package);
                if !name.is_empty() && !packages.contains(&name) {
                    packages.push(name);
                }
            }
            return Ok((host_ids, packages));
        }

        Err(ZtcError::not_found(format!(
            "bulletin {bulletin_id:?} in discovery data"
        )))
    }

    /// Read the packages discovery payload and collect the names of
    /// packages whose affected-host list contains this host.
    async fn vulnerable_packages(&self, host_id: &str) -> Vec<String> {
        let raw = match self
            .zabbix
            .item_value(&self.cfg.naming.packages_host, PACKAGES_LLD_KEY)
            .await
        {
            Ok(raw) if !raw.is_empty() => raw,
            Ok(_) => {
                debug!(host = host_id, "no packages discovery data found; run 'ztc scan' first");
                return Vec::new();
            }
            Err(e) => {
                debug!(host = host_id, error = %e, "failed to get packages discovery data");
                return Vec::new();
            }
        };

        let lld: LldData = match serde_json::from_str(&raw) {
            Ok(lld) => lld,
            Err(e) => {
                debug!(error = %e, "failed to parse packages discovery data");
                return Vec::new();
            }
        };

        let mut packages = Vec::new();
        for entry in &lld.data {
            let hosts = split_csv(entry.get("{#P.HOSTS}").and_then(Value::as_str));
            if !hosts.iter().any(|h| h == host_id) {
                continue;
            }
            if let Some(name) = entry.get("{#P.NAME}").and_then(Value::as_str) {
                if !name.is_empty() && !packages.iter().any(|p| p == name) {
                    packages.push(name.to_string());
                }
            }
        }

        packages
    }

    /// Execute a fix plan, bounded by the scan worker count. Per-host
    /// failures are recorded, not fatal.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        plan: &FixPlan,
        opts: &FixOptions,
    ) -> Result<FixResults> {
        let workers = self.cfg.scan.workers.max(1);
        let semaphore = Arc::new(Semaphore::new(workers));
        let results = Arc::new(Mutex::new(FixResults::default()));
        let mut tasks: JoinSet<()> = JoinSet::new();

        let ssh_user = if opts.ssh_user.is_empty() {
            "root".to_string()
        } else {
            opts.ssh_user.clone()
        };

        for host_plan in plan.hosts.clone() {
            let executor = self.executor.clone();
            let semaphore = semaphore.clone();
            let results = results.clone();
            let cancel = cancel.clone();
            let use_ssh = opts.use_ssh;
            let ssh_user = ssh_user.clone();

            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };

                let result = execute_on_host(&executor, &cancel, &host_plan, use_ssh, &ssh_user).await;

                let mut results = results.lock().unwrap_or_else(|p| p.into_inner());
                if result.success {
                    results.successful += 1;
                } else {
                    results.failed += 1;
                }
                results.hosts.push(result);
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    warn!(error = %e, "fix task panicked");
                }
            }
        }

        let results = results.lock().unwrap_or_else(|p| p.into_inner());
        Ok(results.clone())
    }

    /// Whether the name is one of the four virtual hosts.
    fn is_virtual_host(&self, name: &str) -> bool {
        let naming = &self.cfg.naming;
        name == naming.hosts_host
            || name == naming.packages_host
            || name == naming.bulletins_host
            || name == naming.statistics_host
    }

    async fn host_os(&self, host_id: &str) -> String {
        let Ok(items) = self.zabbix.host_items(host_id, "system.sw.os").await else {
            return String::new();
        };
        items
            .into_iter()
            .find(|item| !item.value.is_empty())
            .map(|item| item.value)
            .unwrap_or_default()
    }

    /// Log out from the Zabbix API.
    pub async fn close(&self) -> Result<()> {
        self.zabbix.logout().await
    }
}

async fn execute_on_host(
    executor: &Executor,
    cancel: &CancellationToken,
    plan: &HostFixPlan,
    use_ssh: bool,
    ssh_user: &str,
) -> HostFixResult {
    let mut result = HostFixResult {
        host_id: plan.host_id.clone(),
        name: plan.name.clone(),
        ..HostFixResult::default()
    };

    info!(
        host = %plan.name,
        address = %plan.address,
        command = %plan.command,
        ssh = use_ssh,
        "executing fix command"
    );

    let outcome = if use_ssh {
        executor
            .execute_with_retry(cancel, 2, || {
                executor.execute_via_ssh(&plan.address, ssh_user, &plan.command)
            })
            .await
    } else {
        executor
            .execute_with_retry(cancel, 2, || {
                executor.execute_via_agent(&plan.address, &plan.agent_port, &plan.command)
            })
            .await
    };

    match outcome {
        Ok(output) => {
            result.success = true;
            result.output = output;
            info!(host = %plan.name, "fix executed successfully");
        }
        Err(e) => {
            result.error = e.to_string();
            warn!(host = %plan.name, error = %e, "fix execution failed");
        }
    }

    result
}

/// Pick the address and agent port for a host: prefer the main agent
/// interface (type 1, main 1), then any main interface, then anything.
/// IP wins when the interface says `useip`, DNS otherwise.
fn host_address(host: &Host) -> (String, String) {
    let pick = |iface: &crate::zabbix::HostInterface| -> Option<(String, String)> {
        if iface.use_ip == "1" && !iface.ip.is_empty() {
            return Some((iface.ip.clone(), iface.port.clone()));
        }
        if !iface.dns.is_empty() {
            return Some((iface.dns.clone(), iface.port.clone()));
        }
        None
    };

    for iface in &host.interfaces {
        if iface.main == "1" && iface.interface_type == "1" {
            if let Some(found) = pick(iface) {
                return found;
            }
        }
    }
    for iface in &host.interfaces {
        if iface.main == "1" {
            if let Some(found) = pick(iface) {
                return found;
            }
        }
    }
    for iface in &host.interfaces {
        if !iface.ip.is_empty() {
            return (iface.ip.clone(), iface.port.clone());
        }
        if !iface.dns.is_empty() {
            return (iface.dns.clone(), iface.port.clone());
        }
    }

    (String::new(), String::new())
}

fn split_csv(raw: Option<&str>) -> Vec<String> {
    raw.filter(|s| !s.is_empty())
        .map(|s| s.split(',').map(str::to_string).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zabbix::HostInterface;

    fn interface(ip: &str, dns: &str, port: &str, iface_type: &str, main: &str, use_ip: &str) -> HostInterface {
        HostInterface {
            ip: ip.to_string(),
            dns: dns.to_string(),
            port: port.to_string(),
            interface_type: iface_type.to_string(),
            main: main.to_string(),
            use_ip: use_ip.to_string(),
            ..HostInterface::default()
        }
    }

    #[test]
    fn address_prefers_main_agent_interface() {
        let host = Host {
            interfaces: vec![
                interface("198.51.100.9", "", "161", "2", "1", "1"), // SNMP
                interface("192.0.2.10", "", "10050", "1", "1", "1"), // agent
            ],
            ..Host::default()
        };
        assert_eq!(
            host_address(&host),
            ("192.0.2.10".to_string(), "10050".to_string())
        );
    }

    #[test]
    fn address_uses_dns_when_not_useip() {
        let host = Host {
            interfaces: vec![interface("", "web01.example.com", "10050", "1", "1", "0")],
            ..Host::default()
        };
        assert_eq!(
            host_address(&host),
            ("web01.example.com".to_string(), "10050".to_string())
        );
    }

    #[test]
    fn address_falls_back_to_any_interface() {
        let host = Host {
            interfaces: vec![interface("203.0.113.5", "", "10051", "2", "0", "1")],
            ..Host::default()
        };
        assert_eq!(
            host_address(&host),
            ("203.0.113.5".to_string(), "10051".to_string())
        );
    }

    #[test]
    fn address_empty_without_interfaces() {
        assert_eq!(host_address(&Host::default()), (String::new(), String::new()));
    }

    #[test]
    fn split_csv_handles_empty() {
        assert!(split_csv(None).is_empty());
        assert!(split_csv(Some("")).is_empty());
        assert_eq!(split_csv(Some("1,2,3")), vec!["1", "2", "3"]);
    }
}
