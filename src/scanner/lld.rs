//! Discovery-payload and value-tuple generation.
//!
//! The macro names, item keys, and numeric formatting here are wire-visible
//! contracts: scores are formatted with one decimal, averages with two,
//! counts as plain integers. Both the Python-era macro/key families and the
//! newer ones are emitted for backward compatibility.

use serde_json::json;

use crate::config::NamingConfig;
use crate::scanner::types::{BulletinEntry, HostEntry, PackageEntry, Statistics};
use crate::zabbix::{LldData, SenderData};

/// Generates discovery payloads and per-item value tuples.
pub struct LldGenerator {
    naming: NamingConfig,
}

impl LldGenerator {
    pub fn new(naming: NamingConfig) -> Self {
        Self { naming }
    }

    /// Hosts discovery payload: one entry per scanned host.
    pub fn hosts_lld(&self, hosts: &[HostEntry]) -> LldData {
        LldData {
            data: hosts
                .iter()
                .map(|host| {
                    json!({
                        "{#H.ID}": host.host_id,
                        "{#H.HOST}": host.host,
                        "{#H.VNAME}": host.name,
                        "{#H.SCORE}": format!("{:.1}", host.score),
                        "{#H.OS}": host.os_name,
                        "{#H.OSVER}": host.os_version,
                        "{#H.FIX}": host.cumulative_fix,
                    })
                })
                .collect(),
        }
    }

    /// Packages discovery payload. Carries both the `{#P.*}` macros and the
    /// Python-compatible `{#PKG.*}` trigger macros.
    pub fn packages_lld(&self, packages: &[PackageEntry]) -> LldData {
        LldData {
            data: packages
                .iter()
                .map(|package| {
                    let affected = package.affected_hosts.len();
                    let impact = (affected as f64 * package.score) as i64;
                    let package_url = package.bulletins.first().cloned().unwrap_or_default();
                    let package_id = format!(
                        "{} {} {}",
                        package.name, package.version, package.arch
                    );

                    json!({
                        "{#P.NAME}": package.name,
                        "{#P.VERSION}": package.version,
                        "{#P.ARCH}": package.arch,
                        "{#P.SCORE}": format!("{:.1}", package.score),
                        "{#P.FIX}": package.fix,
                        "{#P.AFFECTED}": affected,
                        "{#P.HOSTS}": package.affected_hosts.join(","),
                        "{#PKG.ID}": package_id,
                        "{#PKG.SCORE}": format!("{:.1}", package.score),
                        "{#PKG.IMPACT}": impact,
                        "{#PKG.URL}": package_url,
                        "{#PKG.HOSTS}": package.affected_host_names.join("\n"),
                        "{#PKG.FIX}": package.fix,
                    })
                })
                .collect(),
        }
    }

    /// Bulletins discovery payload, with the `{#BULLETIN.*}` compatibility
    /// macros alongside `{#B.*}`.
    pub fn bulletins_lld(&self, bulletins: &[BulletinEntry]) -> LldData {
        LldData {
            data: bulletins
                .iter()
                .map(|bulletin| {
                    let affected = bulletin.affected_hosts.len();
                    let impact = (affected as f64 * bulletin.score) as i64;

                    json!({
                        "{#B.ID}": bulletin.id,
                        "{#B.TYPE}": bulletin.bulletin_type,
                        "{#B.SCORE}": format!("{:.1}", bulletin.score),
                        "{#B.CVES}": bulletin.cves.join(","),
                        "{#B.AFFECTED}": affected,
                        "{#B.HOSTS}": bulletin.affected_hosts.join(","),
                        "{#B.PKGS}": bulletin.affected_packages.join(","),
                        "{#BULLETIN.ID}": bulletin.id,
                        "{#BULLETIN.SCORE}": format!("{:.1}", bulletin.score),
                        "{#BULLETIN.IMPACT}": impact,
                        "{#BULLETIN.HOSTS}": bulletin.affected_host_names.join("\n"),
                    })
                })
                .collect(),
        }
    }

    /// Per-host score values, keyed `vulners.hosts[<id>]`.
    pub fn host_score_data(&self, hosts: &[HostEntry]) -> Vec<SenderData> {
        hosts
            .iter()
            .map(|host| SenderData {
                host: self.naming.hosts_host.clone(),
                key: format!("vulners.hosts[{}]", host.host_id),
                value: format!("{:.1}", host.score),
            })
            .collect()
    }

    /// Per-package values: the affected-host count, keyed
    /// `vulners.packages[<name>,<version>,<arch>]`.
    pub fn package_score_data(&self, packages: &[PackageEntry]) -> Vec<SenderData> {
        packages
            .iter()
            .map(|package| SenderData {
                host: self.naming.packages_host.clone(),
                key: format!(
                    "vulners.packages[{},{},{}]",
                    package.name, package.version, package.arch
                ),
                value: format!("{}", package.affected_hosts.len()),
            })
            .collect()
    }

    /// Per-bulletin values: the affected-host count, keyed
    /// `vulners.bulletins[<id>]`.
    pub fn bulletin_score_data(&self, bulletins: &[BulletinEntry]) -> Vec<SenderData> {
        bulletins
            .iter()
            .map(|bulletin| SenderData {
                host: self.naming.bulletins_host.clone(),
                key: format!("vulners.bulletins[{}]", bulletin.id),
                value: format!("{}", bulletin.affected_hosts.len()),
            })
            .collect()
    }

    /// Statistics values: Python-era keys, their `vulners.score*` aliases,
    /// the `vulners.stats[...]` family, and the 11 histogram buckets.
    pub fn statistics_data(&self, stats: &Statistics) -> Vec<SenderData> {
        let host = &self.naming.statistics_host;
        let row = |key: &str, value: String| SenderData {
            host: host.clone(),
            key: key.to_string(),
            value,
        };

        let mut data = vec![
            row("vulners.TotalHosts", format!("{}", stats.total_hosts)),
            row("vulners.Maximum", format!("{:.1}", stats.max_cvss)),
            row("vulners.Average", format!("{:.2}", stats.avg_cvss)),
            row("vulners.Minimum", format!("{:.1}", stats.min_cvss)),
            row("vulners.scoreMedian", format!("{:.1}", stats.median_cvss)),
            row("vulners.scoreAverage", format!("{:.2}", stats.avg_cvss)),
            row("vulners.scoreMaximum", format!("{:.1}", stats.max_cvss)),
            row("vulners.scoreMinimum", format!("{:.1}", stats.min_cvss)),
            row(
                "vulners.stats[total_hosts]",
                format!("{}", stats.total_hosts),
            ),
            row(
                "vulners.stats[vuln_hosts]",
                format!("{}", stats.vulnerable_hosts),
            ),
            row(
                "vulners.stats[total_vulns]",
                format!("{}", stats.total_packages),
            ),
            row(
                "vulners.stats[total_bulletins]",
                format!("{}", stats.total_bulletins),
            ),
            row(
                "vulners.stats[total_cves]",
                format!("{}", stats.total_cves),
            ),
            row("vulners.stats[max_score]", format!("{:.1}", stats.max_cvss)),
            row("vulners.stats[avg_score]", format!("{:.2}", stats.avg_cvss)),
        ];

        for (i, count) in stats.histogram.iter().enumerate() {
            data.push(row(
                &format!("vulners.hostsCountScore{i}"),
                format!("{count}"),
            ));
        }

        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> LldGenerator {
        LldGenerator::new(NamingConfig::default())
    }

    fn sample_host() -> HostEntry {
        HostEntry {
            host_id: "10084".to_string(),
            host: "web01".to_string(),
            name: "Web Server 01".to_string(),
            os_name: "ubuntu".to_string(),
            os_version: "20.04".to_string(),
            score: 7.5,
            cumulative_fix: "apt-get install --only-upgrade openssl".to_string(),
            ..HostEntry::default()
        }
    }

    fn sample_package() -> PackageEntry {
        PackageEntry {
            name: "openssl".to_string(),
            version: "1.1.1f".to_string(),
            arch: "amd64".to_string(),
            score: 7.5,
            fix: "upgrade".to_string(),
            affected_hosts: vec!["10084".to_string(), "10085".to_string()],
            affected_host_names: vec!["Web Server 01".to_string(), "DB".to_string()],
            bulletins: vec!["USN-1".to_string(), "USN-2".to_string()],
        }
    }

    fn sample_bulletin() -> BulletinEntry {
        BulletinEntry {
            id: "USN-1".to_string(),
            bulletin_type: "usn".to_string(),
            score: 9.8,
            cves: vec!["CVE-1".to_string(), "CVE-2".to_string()],
            fix: String::new(),
            affected_packages: vec!["openssl 1.1.1f amd64".to_string()],
            affected_hosts: vec!["10084".to_string()],
            affected_host_names: vec!["Web Server 01".to_string()],
        }
    }

    #[test]
    fn hosts_lld_macros() {
        let lld = generator().hosts_lld(&[sample_host()]);
        assert_eq!(lld.data.len(), 1);
        let entry = &lld.data[0];
        assert_eq!(entry["{#H.ID}"], "10084");
        assert_eq!(entry["{#H.HOST}"], "web01");
        assert_eq!(entry["{#H.VNAME}"], "Web Server 01");
        assert_eq!(entry["{#H.SCORE}"], "7.5");
        assert_eq!(entry["{#H.OS}"], "ubuntu");
        assert_eq!(entry["{#H.OSVER}"], "20.04");
        assert_eq!(entry["{#H.FIX}"], "apt-get install --only-upgrade openssl");
    }

    #[test]
    fn score_formatting_one_decimal() {
        let mut host = sample_host();
        host.score = 9.0;
        let lld = generator().hosts_lld(&[host]);
        assert_eq!(lld.data[0]["{#H.SCORE}"], "9.0");
    }

    #[test]
    fn packages_lld_macros_and_impact() {
        let lld = generator().packages_lld(&[sample_package()]);
        let entry = &lld.data[0];
        assert_eq!(entry["{#P.NAME}"], "openssl");
        assert_eq!(entry["{#P.AFFECTED}"], 2);
        assert_eq!(entry["{#P.HOSTS}"], "10084,10085");
        // impact = floor(2 * 7.5) = 15
        assert_eq!(entry["{#PKG.IMPACT}"], 15);
        assert_eq!(entry["{#PKG.ID}"], "openssl 1.1.1f amd64");
        // URL is the first bulletin
        assert_eq!(entry["{#PKG.URL}"], "USN-1");
        // host names newline-joined
        assert_eq!(entry["{#PKG.HOSTS}"], "Web Server 01\nDB");
    }

    #[test]
    fn package_url_empty_without_bulletins() {
        let mut package = sample_package();
        package.bulletins.clear();
        let lld = generator().packages_lld(&[package]);
        assert_eq!(lld.data[0]["{#PKG.URL}"], "");
    }

    #[test]
    fn bulletins_lld_macros() {
        let lld = generator().bulletins_lld(&[sample_bulletin()]);
        let entry = &lld.data[0];
        assert_eq!(entry["{#B.ID}"], "USN-1");
        assert_eq!(entry["{#B.SCORE}"], "9.8");
        assert_eq!(entry["{#B.CVES}"], "CVE-1,CVE-2");
        assert_eq!(entry["{#B.AFFECTED}"], 1);
        assert_eq!(entry["{#B.PKGS}"], "openssl 1.1.1f amd64");
        // impact = floor(1 * 9.8) = 9
        assert_eq!(entry["{#BULLETIN.IMPACT}"], 9);
        assert_eq!(entry["{#BULLETIN.HOSTS}"], "Web Server 01");
    }

    #[test]
    fn host_score_values() {
        let data = generator().host_score_data(&[sample_host()]);
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].host, "vulners.hosts");
        assert_eq!(data[0].key, "vulners.hosts[10084]");
        assert_eq!(data[0].value, "7.5");
    }

    #[test]
    fn package_value_is_affected_count() {
        let data = generator().package_score_data(&[sample_package()]);
        assert_eq!(data[0].host, "vulners.packages");
        assert_eq!(data[0].key, "vulners.packages[openssl,1.1.1f,amd64]");
        assert_eq!(data[0].value, "2");
    }

    #[test]
    fn bulletin_value_is_affected_count() {
        let data = generator().bulletin_score_data(&[sample_bulletin()]);
        assert_eq!(data[0].host, "vulners.bulletins");
        assert_eq!(data[0].key, "vulners.bulletins[USN-1]");
        assert_eq!(data[0].value, "1");
    }

    #[test]
    fn statistics_keys_and_formats() {
        let stats = Statistics {
            total_hosts: 3,
            vulnerable_hosts: 2,
            total_packages: 5,
            total_bulletins: 4,
            total_cves: 7,
            max_cvss: 9.8,
            avg_cvss: 4.1667,
            min_cvss: 0.0,
            median_cvss: 5.0,
            histogram: [1, 0, 0, 0, 0, 1, 0, 0, 0, 0, 1],
        };

        let data = generator().statistics_data(&stats);
        let find = |key: &str| {
            data.iter()
                .find(|d| d.key == key)
                .unwrap_or_else(|| panic!("missing key {key}"))
                .value
                .clone()
        };

        assert_eq!(find("vulners.TotalHosts"), "3");
        assert_eq!(find("vulners.Maximum"), "9.8");
        assert_eq!(find("vulners.Average"), "4.17"); // two decimals
        assert_eq!(find("vulners.Minimum"), "0.0");
        assert_eq!(find("vulners.scoreMedian"), "5.0");
        // legacy aliases
        assert_eq!(find("vulners.scoreAverage"), "4.17");
        assert_eq!(find("vulners.scoreMaximum"), "9.8");
        assert_eq!(find("vulners.scoreMinimum"), "0.0");
        // stats family
        assert_eq!(find("vulners.stats[total_hosts]"), "3");
        assert_eq!(find("vulners.stats[vuln_hosts]"), "2");
        assert_eq!(find("vulners.stats[total_vulns]"), "5");
        assert_eq!(find("vulners.stats[total_bulletins]"), "4");
        assert_eq!(find("vulners.stats[total_cves]"), "7");
        assert_eq!(find("vulners.stats[max_score]"), "9.8");
        assert_eq!(find("vulners.stats[avg_score]"), "4.17");
        // histogram buckets
        assert_eq!(find("vulners.hostsCountScore0"), "1");
        assert_eq!(find("vulners.hostsCountScore5"), "1");
        assert_eq!(find("vulners.hostsCountScore10"), "1");
        assert_eq!(find("vulners.hostsCountScore2"), "0");

        // every row targets the statistics virtual host
        assert!(data.iter().all(|d| d.host == "vulners.statistics"));
        // 15 named keys + 11 buckets
        assert_eq!(data.len(), 26);
    }

    #[test]
    fn lld_round_trips_as_json() {
        let lld = generator().packages_lld(&[sample_package()]);
        let serialized = serde_json::to_string(&lld).unwrap();
        let back: LldData = serde_json::from_str(&serialized).unwrap();
        let again = serde_json::to_string(&back).unwrap();
        assert_eq!(serialized, again);
    }
}
