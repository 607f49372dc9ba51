//! Cross-host aggregation of per-host findings.
//!
//! The aggregator merges host entries into three views: the host sequence
//! itself, package aggregates keyed by `name|version|arch`, and bulletin
//! aggregates keyed by bulletin ID. Affected-host sets dedup while keeping
//! first-seen order, and aggregate scores only ever grow.
//!
//! Not thread-safe: the orchestrator serializes `add_host` calls under a
//! mutex and never holds it across a network call.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::scanner::types::{
    BulletinEntry, BulletinSummary, HostEntry, PackageEntry, PackageVuln, ScanResults, Statistics,
};

/// Aggregates vulnerability data across hosts.
#[derive(Default)]
pub struct Aggregator {
    hosts: Vec<HostEntry>,
    packages: HashMap<String, PackageEntry>,
    // Key insertion order, so materialized results are deterministic for
    // identical inputs.
    package_order: Vec<String>,
    bulletins: HashMap<String, BulletinEntry>,
    bulletin_order: Vec<String>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear accumulated data for a fresh scan.
    pub fn reset(&mut self) {
        self.hosts.clear();
        self.packages.clear();
        self.package_order.clear();
        self.bulletins.clear();
        self.bulletin_order.clear();
    }

    /// Merge one host's findings into the aggregates.
    pub fn add_host(&mut self, entry: HostEntry) {
        // Packages, keyed by name|version|arch so same-name packages with a
        // different arch stay separate.
        for package in &entry.packages {
            let key = format!("{}|{}|{}", package.name, package.version, package.arch);
            let aggregate = match self.packages.entry(key) {
                Entry::Occupied(occupied) => occupied.into_mut(),
                Entry::Vacant(vacant) => {
                    self.package_order.push(vacant.key().clone());
                    vacant.insert(PackageEntry {
                        name: package.name.clone(),
                        version: package.version.clone(),
                        arch: package.arch.clone(),
                        score: package.score,
                        fix: package.fix.clone(),
                        ..PackageEntry::default()
                    })
                }
            };

            push_unique(&mut aggregate.affected_hosts, &entry.host_id);
            push_unique(&mut aggregate.affected_host_names, &entry.name);
            extend_unique(&mut aggregate.bulletins, &package.bulletins);

            if package.score > aggregate.score {
                aggregate.score = package.score;
            }
        }

        // Bulletins, same pattern plus CVE and package dedup.
        for bulletin in &entry.bulletins {
            let aggregate = match self.bulletins.entry(bulletin.id.clone()) {
                Entry::Occupied(occupied) => occupied.into_mut(),
                Entry::Vacant(vacant) => {
                    self.bulletin_order.push(bulletin.id.clone());
                    vacant.insert(BulletinEntry {
                        id: bulletin.id.clone(),
                        bulletin_type: bulletin.bulletin_type.clone(),
                        score: bulletin.score,
                        fix: bulletin.fix.clone(),
                        ..BulletinEntry::default()
                    })
                }
            };

            push_unique(&mut aggregate.affected_hosts, &entry.host_id);
            push_unique(&mut aggregate.affected_host_names, &entry.name);
            extend_unique(&mut aggregate.affected_packages, &bulletin.affected_packages);
            extend_unique(&mut aggregate.cves, &bulletin.cves);

            if bulletin.score > aggregate.score {
                aggregate.score = bulletin.score;
            }
        }

        self.hosts.push(entry);
    }

    /// Materialize the aggregates, packages and bulletins sorted by
    /// descending score (stable, so ties keep first-insertion order).
    pub fn results(&self) -> ScanResults {
        let mut results = ScanResults {
            hosts_scanned: self.hosts.len(),
            hosts: self.hosts.clone(),
            ..ScanResults::default()
        };

        for host in &self.hosts {
            if host.score > 0.0 {
                results.hosts_with_vulns += 1;
            }
            if host.score > results.max_cvss {
                results.max_cvss = host.score;
            }
        }

        results.packages = self
            .package_order
            .iter()
            .filter_map(|key| self.packages.get(key).cloned())
            .collect();
        results.vulnerable_packages = results.packages.len();
        results
            .packages
            .sort_by(|a, b| b.score.total_cmp(&a.score));

        results.bulletins = self
            .bulletin_order
            .iter()
            .filter_map(|id| self.bulletins.get(id).cloned())
            .collect();
        results
            .bulletins
            .sort_by(|a, b| b.score.total_cmp(&a.score));

        results
    }

    /// Compute fleet statistics over ALL hosts, including score-0 ones —
    /// min, median and average deliberately count non-vulnerable hosts.
    pub fn statistics(&self) -> Statistics {
        let mut stats = Statistics {
            total_hosts: self.hosts.len(),
            total_packages: self.packages.len(),
            total_bulletins: self.bulletins.len(),
            ..Statistics::default()
        };

        let mut scores: Vec<f64> = Vec::with_capacity(self.hosts.len());
        let mut total_score = 0.0;

        for host in &self.hosts {
            if host.score > 0.0 {
                stats.vulnerable_hosts += 1;
            }
            total_score += host.score;
            scores.push(host.score);

            if host.score > stats.max_cvss {
                stats.max_cvss = host.score;
            }

            // Bucket by the integer floor of the score, clamped to 0..=10.
            let bucket = (host.score.floor() as i64).clamp(0, 10) as usize;
            stats.histogram[bucket] += 1;
        }

        let mut cves: Vec<&str> = self
            .bulletins
            .values()
            .flat_map(|b| b.cves.iter().map(String::as_str))
            .collect();
        cves.sort_unstable();
        cves.dedup();
        stats.total_cves = cves.len();

        if !scores.is_empty() {
            stats.avg_cvss = total_score / scores.len() as f64;

            scores.sort_by(f64::total_cmp);
            stats.min_cvss = scores[0];

            let mid = scores.len() / 2;
            stats.median_cvss = if scores.len() % 2 == 0 {
                (scores[mid - 1] + scores[mid]) / 2.0
            } else {
                scores[mid]
            };
        }

        stats
    }
}

/// Append `value` only if not already present.
fn push_unique(values: &mut Vec<String>, value: &str) {
    if !values.iter().any(|v| v == value) {
        values.push(value.to_string());
    }
}

/// Append each of `source` not already present in `values`.
fn extend_unique(values: &mut Vec<String>, source: &[String]) {
    for value in source {
        push_unique(values, value);
    }
}

/// Keep packages with CVSS >= `min_score`.
pub fn filter_by_min_cvss(packages: Vec<PackageVuln>, min_score: f64) -> Vec<PackageVuln> {
    packages
        .into_iter()
        .filter(|p| p.score >= min_score)
        .collect()
}

/// Keep bulletins with CVSS >= `min_score`.
pub fn filter_bulletins_by_min_cvss(
    bulletins: Vec<BulletinSummary>,
    min_score: f64,
) -> Vec<BulletinSummary> {
    bulletins
        .into_iter()
        .filter(|b| b.score >= min_score)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(id: &str, name: &str, score: f64) -> HostEntry {
        HostEntry {
            host_id: id.to_string(),
            name: name.to_string(),
            score,
            ..HostEntry::default()
        }
    }

    fn package(name: &str, version: &str, score: f64) -> PackageVuln {
        PackageVuln {
            name: name.to_string(),
            version: version.to_string(),
            score,
            ..PackageVuln::default()
        }
    }

    fn bulletin(id: &str, score: f64, cves: &[&str]) -> BulletinSummary {
        BulletinSummary {
            id: id.to_string(),
            score,
            cves: cves.iter().map(|s| s.to_string()).collect(),
            ..BulletinSummary::default()
        }
    }

    #[test]
    fn push_unique_dedups() {
        let mut values = vec!["a".to_string()];
        push_unique(&mut values, "b");
        push_unique(&mut values, "a");
        push_unique(&mut values, "");
        assert_eq!(values, vec!["a", "b", ""]);
    }

    #[test]
    fn extend_unique_overlapping() {
        let mut values = vec!["a".to_string(), "b".to_string()];
        extend_unique(&mut values, &["b".to_string(), "c".to_string()]);
        assert_eq!(values, vec!["a", "b", "c"]);
    }

    #[test]
    fn filter_by_min_cvss_is_inclusive() {
        let packages = vec![
            package("a", "1", 3.0),
            package("b", "1", 7.5),
            package("c", "1", 5.0),
            package("d", "1", 9.8),
        ];
        assert_eq!(filter_by_min_cvss(packages.clone(), 1.0).len(), 4);
        assert_eq!(filter_by_min_cvss(packages.clone(), 10.0).len(), 0);
        // boundary: >= keeps the 5.0 package
        assert_eq!(filter_by_min_cvss(packages, 5.0).len(), 3);
    }

    #[test]
    fn empty_aggregator_yields_empty_results() {
        let agg = Aggregator::new();
        let results = agg.results();
        assert_eq!(results.hosts_scanned, 0);
        assert!(results.packages.is_empty());
        let stats = agg.statistics();
        assert_eq!(stats.median_cvss, 0.0);
        assert_eq!(stats.min_cvss, 0.0);
        assert!(stats.histogram.iter().all(|&c| c == 0));
    }

    #[test]
    fn single_host_clean_path() {
        let mut agg = Aggregator::new();
        let mut entry = host("1", "web01", 7.5);
        entry.packages = vec![PackageVuln {
            name: "openssl".to_string(),
            version: "1.1.1f".to_string(),
            arch: "amd64".to_string(),
            score: 7.5,
            bulletins: vec!["USN-1".to_string()],
            ..PackageVuln::default()
        }];
        entry.bulletins = vec![bulletin("USN-1", 7.5, &["CVE-2021-3711"])];
        agg.add_host(entry);

        let results = agg.results();
        assert_eq!(results.hosts_scanned, 1);
        assert_eq!(results.hosts_with_vulns, 1);
        assert_eq!(results.vulnerable_packages, 1);
        assert_eq!(results.max_cvss, 7.5);
        assert_eq!(results.packages[0].affected_hosts, vec!["1"]);

        let stats = agg.statistics();
        assert_eq!(stats.histogram[7], 1);
        assert_eq!(stats.histogram.iter().sum::<u32>() as usize, 1);
    }

    #[test]
    fn score_merge_takes_max_and_dedups_hosts() {
        let mut agg = Aggregator::new();
        let mut first = host("1", "alpha", 5.0);
        first.packages = vec![package("openssl", "1.1.1", 5.0)];
        let mut second = host("2", "beta", 9.0);
        second.packages = vec![package("openssl", "1.1.1", 9.0)];
        let mut repeat = host("1", "alpha", 5.0);
        repeat.packages = vec![package("openssl", "1.1.1", 5.0)];

        agg.add_host(first);
        agg.add_host(second);
        agg.add_host(repeat);

        let results = agg.results();
        assert_eq!(results.packages.len(), 1);
        assert_eq!(results.packages[0].score, 9.0);
        assert_eq!(results.packages[0].affected_hosts, vec!["1", "2"]);
        assert_eq!(results.packages[0].affected_host_names, vec!["alpha", "beta"]);
    }

    #[test]
    fn score_never_decreases() {
        let mut agg = Aggregator::new();
        let mut first = host("1", "a", 9.0);
        first.packages = vec![package("curl", "7.68", 9.0)];
        let mut second = host("2", "b", 3.0);
        second.packages = vec![package("curl", "7.68", 3.0)];

        agg.add_host(first);
        agg.add_host(second);

        assert_eq!(agg.results().packages[0].score, 9.0);
    }

    #[test]
    fn different_arch_stays_separate() {
        let mut agg = Aggregator::new();
        let mut entry = host("1", "a", 5.0);
        entry.packages = vec![
            PackageVuln {
                arch: "amd64".to_string(),
                ..package("libc6", "2.31", 5.0)
            },
            PackageVuln {
                arch: "i386".to_string(),
                ..package("libc6", "2.31", 5.0)
            },
        ];
        agg.add_host(entry);
        assert_eq!(agg.results().packages.len(), 2);
    }

    #[test]
    fn bulletin_fan_in() {
        let mut agg = Aggregator::new();
        let mut first = host("1", "alpha", 6.0);
        first.bulletins = vec![BulletinSummary {
            affected_packages: vec!["nginx 1.18.0 amd64".to_string()],
            ..bulletin("USN-1", 6.0, &["CVE-1", "CVE-2"])
        }];
        let mut second = host("2", "beta", 8.0);
        second.bulletins = vec![BulletinSummary {
            affected_packages: vec!["openssl 1.1.1f amd64".to_string()],
            ..bulletin("USN-1", 8.0, &["CVE-2", "CVE-3"])
        }];

        agg.add_host(first);
        agg.add_host(second);

        let results = agg.results();
        assert_eq!(results.bulletins.len(), 1);
        let merged = &results.bulletins[0];
        assert_eq!(merged.score, 8.0);
        assert_eq!(merged.affected_hosts, vec!["1", "2"]);
        assert_eq!(merged.affected_packages.len(), 2);
        assert_eq!(merged.cves, vec!["CVE-1", "CVE-2", "CVE-3"]);
    }

    #[test]
    fn results_sorted_descending_by_score() {
        let mut agg = Aggregator::new();
        let mut entry = host("1", "a", 3.0);
        entry.packages = vec![
            package("a", "1", 3.0),
            package("b", "1", 9.0),
            package("c", "1", 6.0),
        ];
        agg.add_host(entry);

        let results = agg.results();
        let scores: Vec<f64> = results.packages.iter().map(|p| p.score).collect();
        assert_eq!(scores, vec![9.0, 6.0, 3.0]);
    }

    #[test]
    fn statistics_include_zero_score_hosts() {
        let mut agg = Aggregator::new();
        let mut first = host("1", "a", 7.5);
        first.packages = vec![package("nginx", "1.18", 7.5)];
        first.bulletins = vec![bulletin("B1", 7.5, &["CVE-2021-1234", "CVE-2021-5678"])];
        let mut second = host("2", "b", 5.0);
        second.packages = vec![package("openssl", "1.1", 5.0)];
        second.bulletins = vec![bulletin("B2", 5.0, &["CVE-2021-5678", "CVE-2021-9999"])];

        agg.add_host(first);
        agg.add_host(second);
        agg.add_host(host("3", "c", 0.0));

        let stats = agg.statistics();
        assert_eq!(stats.total_hosts, 3);
        assert_eq!(stats.vulnerable_hosts, 2);
        assert_eq!(stats.max_cvss, 7.5);
        let expected_avg = (7.5 + 5.0 + 0.0) / 3.0;
        assert!((stats.avg_cvss - expected_avg).abs() < 1e-9);
        // unique CVEs across bulletins
        assert_eq!(stats.total_cves, 3);
        // all hosts, sorted [0, 5.0, 7.5] → median 5.0, min 0
        assert_eq!(stats.median_cvss, 5.0);
        assert_eq!(stats.min_cvss, 0.0);
    }

    #[test]
    fn median_even_count_averages_middle_pair() {
        let mut agg = Aggregator::new();
        for (id, score) in [("1", 8.0), ("2", 2.0), ("3", 6.0), ("4", 4.0)] {
            agg.add_host(host(id, id, score));
        }
        assert_eq!(agg.statistics().median_cvss, 5.0);
    }

    #[test]
    fn median_odd_count_takes_middle() {
        let mut agg = Aggregator::new();
        for (id, score) in [("1", 9.0), ("2", 3.0), ("3", 5.0)] {
            agg.add_host(host(id, id, score));
        }
        let stats = agg.statistics();
        assert_eq!(stats.median_cvss, 5.0);
        assert_eq!(stats.min_cvss, 3.0);
    }

    #[test]
    fn histogram_buckets_floor_and_clamp() {
        let mut agg = Aggregator::new();
        agg.add_host(host("1", "a", 0.0));
        agg.add_host(host("2", "b", 0.0));
        agg.add_host(host("3", "c", 3.5));
        agg.add_host(host("4", "d", 7.9));
        agg.add_host(host("5", "e", 10.0));

        let stats = agg.statistics();
        assert_eq!(stats.histogram[0], 2);
        assert_eq!(stats.histogram[3], 1);
        assert_eq!(stats.histogram[7], 1);
        assert_eq!(stats.histogram[10], 1);
        // histogram totality: buckets sum to total hosts
        assert_eq!(
            stats.histogram.iter().sum::<u32>() as usize,
            stats.total_hosts
        );
    }

    #[test]
    fn reset_is_idempotent() {
        let mut agg = Aggregator::new();
        let mut entry = host("1", "a", 7.5);
        entry.packages = vec![package("nginx", "1.18", 7.5)];
        agg.add_host(entry.clone());

        agg.reset();
        agg.add_host(entry.clone());
        let once = agg.statistics();

        agg.reset();
        agg.reset();
        agg.add_host(entry);
        let twice = agg.statistics();

        assert_eq!(once, twice);
        assert_eq!(once.total_hosts, 1);
        assert_eq!(once.total_packages, 1);
    }
}
