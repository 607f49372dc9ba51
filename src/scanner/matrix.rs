//! Host matrix: enumerates scannable hosts and pulls their OS identity and
//! package inventory from Zabbix.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::scanner::osutil::{extract_os_version, normalize_os_name};
use crate::scanner::types::ScanOptions;
use crate::zabbix::{Client, Host};

/// Everything the scanner needs to know about one host.
#[derive(Debug, Clone)]
pub struct HostData {
    pub host: Host,
    /// Normalized OS family, e.g. `"ubuntu"`.
    pub os_name: String,
    /// Version number, e.g. `"20.04"`.
    pub os_version: String,
    /// Raw package lines.
    pub packages: Vec<String>,
}

/// Fetches and filters host data from Zabbix.
pub struct HostMatrix {
    cfg: Arc<Config>,
    client: Arc<Client>,
}

impl HostMatrix {
    pub fn new(cfg: Arc<Config>, client: Arc<Client>) -> Self {
        Self { cfg, client }
    }

    /// Enumerate monitored hosts carrying the OS-report template, pull
    /// their OS and package items, and apply the eligibility filter.
    /// Individual-host failures are logged and skipped, never fatal.
    #[tracing::instrument(skip_all)]
    pub async fn fetch_hosts(&self, opts: &ScanOptions) -> Result<Vec<HostData>> {
        let mut hosts = self
            .client
            .hosts_with_template(&self.cfg.scan.os_report_template)
            .await?;

        info!(count = hosts.len(), "found hosts with OS-report template");

        if !opts.host_ids.is_empty() {
            hosts.retain(|h| opts.host_ids.contains(&h.host_id));
            info!(count = hosts.len(), "filtered to specific hosts");
        }

        if opts.limit > 0 && hosts.len() > opts.limit {
            hosts.truncate(opts.limit);
            info!(limit = opts.limit, "applied host limit");
        }

        let mut host_data = Vec::new();
        for host in hosts {
            match self.fetch_host_data(&host).await {
                Ok(Some(data)) => host_data.push(data),
                Ok(None) => {}
                Err(e) => {
                    warn!(host = %host.name, error = %e, "failed to fetch host data");
                }
            }
        }

        Ok(host_data)
    }

    /// Pull OS and package items for one host. Returns `None` when the
    /// host has no usable data or fails the eligibility filter.
    async fn fetch_host_data(&self, host: &Host) -> Result<Option<HostData>> {
        debug!(host = %host.name, "fetching host data");

        let os_items = self.client.host_items(&host.host_id, "system.sw.os").await?;
        let (mut os_name, os_version) = os_items
            .iter()
            .find(|item| !item.value.is_empty())
            .map(|item| parse_os_info(&item.value))
            .unwrap_or_default();

        if os_name.is_empty() {
            debug!(host = %host.name, "no OS information available");
            return Ok(None);
        }

        let pkg_items = self
            .client
            .host_items(&host.host_id, "system.sw.packages")
            .await?;
        let packages = pkg_items
            .iter()
            .find(|item| !item.value.is_empty())
            .map(|item| parse_package_list(&item.value))
            .unwrap_or_default();

        if packages.is_empty() {
            debug!(host = %host.name, "no package information available");
            return Ok(None);
        }

        os_name = normalize_os_name(&os_name);
        let os_version = extract_os_version(&os_version);

        if let Some(reason) = exclusion_reason(&os_version, &packages) {
            debug!(host = %host.name, reason, "excluded host");
            return Ok(None);
        }

        debug!(
            host = %host.name,
            os = %os_name,
            version = %os_version,
            packages = packages.len(),
            "fetched host data"
        );

        Ok(Some(HostData {
            host: host.clone(),
            os_name,
            os_version,
            packages,
        }))
    }
}

/// Why a host must be excluded from the scan, or `None` if eligible.
/// The rules: OS version `0.0` means the agent reported nothing useful,
/// five or fewer packages is not a real package list, and a `report.py`
/// line marks the legacy reporting script itself.
pub(crate) fn exclusion_reason(os_version: &str, packages: &[String]) -> Option<&'static str> {
    if os_version == "0.0" {
        return Some("OS version 0.0");
    }
    if packages.len() <= 5 {
        return Some("too few packages");
    }
    if packages.iter().any(|p| p.contains("report.py")) {
        return Some("report.py in packages");
    }
    None
}

/// Split an OS info string like `"Red Hat Enterprise Linux Server release
/// 7.9.2009 (Maipo)"` into a lowercased name and the first version-like
/// token. Everything before the first token starting with a digit belongs
/// to the name.
pub(crate) fn parse_os_info(os_info: &str) -> (String, String) {
    let mut name_parts = Vec::new();
    let mut version = String::new();

    for part in os_info.split_whitespace() {
        if part.starts_with(|c: char| c.is_ascii_digit()) {
            version = part.to_string();
            break;
        }
        name_parts.push(part);
    }

    (name_parts.join(" ").to_lowercase(), version)
}

/// Split the raw package item value into trimmed, non-empty lines.
pub(crate) fn parse_package_list(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packages(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("pkg{i} 1.0 amd64")).collect()
    }

    #[test]
    fn parse_os_info_single_word_name() {
        let (name, version) = parse_os_info("Ubuntu 20.04.3 LTS");
        assert_eq!(name, "ubuntu");
        assert_eq!(version, "20.04.3");
    }

    #[test]
    fn parse_os_info_multi_word_name() {
        let (name, version) = parse_os_info("Red Hat Enterprise Linux Server release 7.9.2009 (Maipo)");
        assert_eq!(name, "red hat enterprise linux server release");
        assert_eq!(version, "7.9.2009");
    }

    #[test]
    fn parse_os_info_no_version() {
        let (name, version) = parse_os_info("Debian");
        assert_eq!(name, "debian");
        assert_eq!(version, "");
    }

    #[test]
    fn parse_os_info_empty() {
        assert_eq!(parse_os_info("  "), (String::new(), String::new()));
    }

    #[test]
    fn parse_package_list_skips_blank_lines() {
        let raw = "nginx 1.18.0 amd64\n\n  curl 7.68.0 amd64  \n\n";
        let packages = parse_package_list(raw);
        assert_eq!(packages, vec!["nginx 1.18.0 amd64", "curl 7.68.0 amd64"]);
    }

    #[test]
    fn exclusion_zero_version() {
        assert_eq!(exclusion_reason("0.0", &packages(10)), Some("OS version 0.0"));
    }

    #[test]
    fn exclusion_too_few_packages() {
        // five packages is still too few; six is enough
        assert_eq!(
            exclusion_reason("20.04", &packages(5)),
            Some("too few packages")
        );
        assert_eq!(exclusion_reason("20.04", &packages(6)), None);
    }

    #[test]
    fn exclusion_report_script() {
        let mut pkgs = packages(10);
        pkgs.push("/opt/monitoring/report.py 1.0".to_string());
        assert_eq!(
            exclusion_reason("20.04", &pkgs),
            Some("report.py in packages")
        );
    }
}
