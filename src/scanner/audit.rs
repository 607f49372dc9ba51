//! Conversion of raw audit findings into per-package and per-bulletin
//! summaries for one host.

use std::collections::HashMap;

use crate::scanner::osutil::parse_package_string;
use crate::scanner::types::{BulletinSummary, PackageVuln};
use crate::vulners::AuditResult;

/// Group findings by package line: max score wins, bulletins and CVEs
/// accumulate.
pub fn extract_vuln_packages(result: &AuditResult) -> Vec<PackageVuln> {
    let mut packages: Vec<PackageVuln> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for vuln in &result.vulnerabilities {
        let slot = match index.get(vuln.package.as_str()) {
            Some(&i) => i,
            None => {
                let (name, version, arch) = parse_package_string(&vuln.package);
                packages.push(PackageVuln {
                    name,
                    version,
                    arch,
                    fix: vuln.fix.clone(),
                    ..PackageVuln::default()
                });
                index.insert(&vuln.package, packages.len() - 1);
                packages.len() - 1
            }
        };

        let package = &mut packages[slot];
        if vuln.cvss_score > package.score {
            package.score = vuln.cvss_score;
        }
        if !vuln.bulletin_id.is_empty() {
            package.bulletins.push(vuln.bulletin_id.clone());
        }
        package.cves.extend(vuln.cve_list.iter().cloned());
    }

    packages
}

/// Group findings by bulletin: max score wins, CVEs dedup, every touched
/// package line is recorded.
pub fn extract_bulletins(result: &AuditResult) -> Vec<BulletinSummary> {
    let mut bulletins: Vec<BulletinSummary> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for vuln in &result.vulnerabilities {
        if vuln.bulletin_id.is_empty() {
            continue;
        }

        let slot = match index.get(vuln.bulletin_id.as_str()) {
            Some(&i) => i,
            None => {
                bulletins.push(BulletinSummary {
                    id: vuln.bulletin_id.clone(),
                    score: vuln.cvss_score,
                    cves: vuln.cve_list.clone(),
                    fix: vuln.fix.clone(),
                    ..BulletinSummary::default()
                });
                index.insert(&vuln.bulletin_id, bulletins.len() - 1);
                bulletins.len() - 1
            }
        };

        let bulletin = &mut bulletins[slot];
        if vuln.cvss_score > bulletin.score {
            bulletin.score = vuln.cvss_score;
        }
        for cve in &vuln.cve_list {
            if !bulletin.cves.contains(cve) {
                bulletin.cves.push(cve.clone());
            }
        }
        bulletin.affected_packages.push(vuln.package.clone());
    }

    bulletins
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulners::AuditVulnerability;

    fn finding(package: &str, bulletin: &str, score: f64, cves: &[&str]) -> AuditVulnerability {
        AuditVulnerability {
            package: package.to_string(),
            bulletin_id: bulletin.to_string(),
            cvss_score: score,
            cve_list: cves.iter().map(|s| s.to_string()).collect(),
            fix: "update it".to_string(),
        }
    }

    #[test]
    fn empty_result_extracts_nothing() {
        let result = AuditResult::default();
        assert!(extract_vuln_packages(&result).is_empty());
        assert!(extract_bulletins(&result).is_empty());
    }

    #[test]
    fn packages_group_by_line_with_max_score() {
        let result = AuditResult {
            vulnerabilities: vec![
                finding("openssl 1.1.1f amd64", "USN-1", 5.0, &["CVE-1"]),
                finding("openssl 1.1.1f amd64", "USN-2", 9.0, &["CVE-2"]),
                finding("curl 7.68.0 amd64", "USN-3", 4.0, &["CVE-3"]),
            ],
            ..AuditResult::default()
        };

        let packages = extract_vuln_packages(&result);
        assert_eq!(packages.len(), 2);

        let openssl = packages.iter().find(|p| p.name == "openssl").unwrap();
        assert_eq!(openssl.version, "1.1.1f");
        assert_eq!(openssl.arch, "amd64");
        assert_eq!(openssl.score, 9.0);
        assert_eq!(openssl.bulletins, vec!["USN-1", "USN-2"]);
        assert_eq!(openssl.cves, vec!["CVE-1", "CVE-2"]);
    }

    #[test]
    fn bulletins_group_by_id_with_cve_dedup() {
        let result = AuditResult {
            vulnerabilities: vec![
                finding("openssl 1.1.1f amd64", "USN-1", 5.0, &["CVE-1", "CVE-2"]),
                finding("libssl1.1 1.1.1f amd64", "USN-1", 7.0, &["CVE-2", "CVE-3"]),
            ],
            ..AuditResult::default()
        };

        let bulletins = extract_bulletins(&result);
        assert_eq!(bulletins.len(), 1);
        let merged = &bulletins[0];
        assert_eq!(merged.id, "USN-1");
        assert_eq!(merged.score, 7.0);
        assert_eq!(merged.cves, vec!["CVE-1", "CVE-2", "CVE-3"]);
        assert_eq!(
            merged.affected_packages,
            vec!["openssl 1.1.1f amd64", "libssl1.1 1.1.1f amd64"]
        );
    }

    #[test]
    fn findings_without_bulletin_are_skipped_for_bulletins() {
        let result = AuditResult {
            vulnerabilities: vec![finding("curl 7.68.0 amd64", "", 4.0, &["CVE-3"])],
            ..AuditResult::default()
        };
        assert!(extract_bulletins(&result).is_empty());
        // but the package itself still counts
        assert_eq!(extract_vuln_packages(&result).len(), 1);
    }
}
