//! Scan option, result, and statistics types.

/// Options for one vulnerability scan.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Maximum number of hosts to scan (0 = unlimited).
    pub limit: usize,
    /// Don't push results to Zabbix.
    pub no_push: bool,
    /// Don't make any changes.
    pub dry_run: bool,
    /// Specific host IDs to scan (empty = all).
    pub host_ids: Vec<String>,
}

/// The results of a vulnerability scan.
#[derive(Debug, Clone, Default)]
pub struct ScanResults {
    pub hosts_scanned: usize,
    pub hosts_with_vulns: usize,
    pub vulnerable_packages: usize,
    pub max_cvss: f64,
    pub hosts: Vec<HostEntry>,
    pub packages: Vec<PackageEntry>,
    pub bulletins: Vec<BulletinEntry>,
}

/// Vulnerability data for a single host.
#[derive(Debug, Clone, Default)]
pub struct HostEntry {
    pub host_id: String,
    /// Technical name.
    pub host: String,
    /// Visible name.
    pub name: String,
    pub os_name: String,
    pub os_version: String,
    /// Cumulative CVSS score for the host.
    pub score: f64,
    /// Cumulative fix text, commas stripped.
    pub cumulative_fix: String,
    pub packages: Vec<PackageVuln>,
    pub bulletins: Vec<BulletinSummary>,
}

/// Vulnerability information for a single package on a single host.
#[derive(Debug, Clone, Default)]
pub struct PackageVuln {
    pub name: String,
    pub version: String,
    pub arch: String,
    pub score: f64,
    pub fix: String,
    pub bulletins: Vec<String>,
    pub cves: Vec<String>,
}

/// Bulletin information for a single host.
#[derive(Debug, Clone, Default)]
pub struct BulletinSummary {
    pub id: String,
    pub bulletin_type: String,
    pub score: f64,
    pub cves: Vec<String>,
    pub fix: String,
    /// Raw package lines this bulletin touches on the host.
    pub affected_packages: Vec<String>,
}

/// A vulnerable package aggregated across hosts.
#[derive(Debug, Clone, Default)]
pub struct PackageEntry {
    pub name: String,
    pub version: String,
    pub arch: String,
    /// Maximum score of any contributing finding.
    pub score: f64,
    pub fix: String,
    /// Host IDs, first-seen order, deduped.
    pub affected_hosts: Vec<String>,
    /// Visible host names, parallel to `affected_hosts`.
    pub affected_host_names: Vec<String>,
    pub bulletins: Vec<String>,
}

/// A security bulletin aggregated across hosts.
#[derive(Debug, Clone, Default)]
pub struct BulletinEntry {
    pub id: String,
    pub bulletin_type: String,
    /// Maximum score of any contributing finding.
    pub score: f64,
    pub cves: Vec<String>,
    pub fix: String,
    pub affected_packages: Vec<String>,
    /// Host IDs, first-seen order, deduped.
    pub affected_hosts: Vec<String>,
    /// Visible host names, parallel to `affected_hosts`.
    pub affected_host_names: Vec<String>,
}

/// Cross-fleet statistics, computed over ALL scanned hosts including
/// score-0 ones.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Statistics {
    pub total_hosts: usize,
    pub vulnerable_hosts: usize,
    pub total_packages: usize,
    pub total_bulletins: usize,
    pub total_cves: usize,
    pub max_cvss: f64,
    pub avg_cvss: f64,
    pub min_cvss: f64,
    pub median_cvss: f64,
    /// Hosts per integer CVSS bucket, index 0-10.
    pub histogram: [u32; 11],
}
