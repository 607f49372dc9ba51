//! Scan orchestration.
//!
//! A scan runs in phases: fetch eligible hosts from Zabbix (sequential),
//! audit them against Vulners (one task per host, bounded by a worker
//! semaphore), merge findings under the aggregator mutex, then publish in
//! two phases — discovery payloads first, a cancellable settle wait, then
//! per-item values. A failing host never fails the scan; cancellation
//! aborts in-flight audits and surfaces as [`ZtcError::Cancelled`].

pub mod aggregator;
pub mod audit;
pub mod lld;
pub mod matrix;
pub mod osutil;
pub mod types;

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Result, ZtcError};
use crate::vulners::{AuditApi, AuditResult, VulnersClient};
use crate::zabbix::{Client, Sender, BULLETINS_LLD_KEY, HOSTS_LLD_KEY, PACKAGES_LLD_KEY};

use aggregator::{filter_bulletins_by_min_cvss, filter_by_min_cvss, Aggregator};
use audit::{extract_bulletins, extract_vuln_packages};
use lld::LldGenerator;
use matrix::{HostData, HostMatrix};
use types::{HostEntry, ScanOptions, ScanResults, Statistics};

/// Orchestrates vulnerability scanning.
pub struct Scanner {
    cfg: Arc<Config>,
    zabbix: Arc<Client>,
    vulners: Arc<dyn AuditApi>,
    sender: Sender,
    matrix: HostMatrix,
    aggregator: Arc<Mutex<Aggregator>>,
    lld: LldGenerator,
}

impl Scanner {
    /// Connect to Zabbix and build the full scan pipeline.
    pub async fn new(cfg: Arc<Config>) -> Result<Self> {
        let zabbix = Arc::new(Client::connect(cfg.clone()).await?);
        let vulners: Arc<dyn AuditApi> = Arc::new(VulnersClient::new(&cfg)?);
        Ok(Self::assemble(cfg, zabbix, vulners))
    }

    /// Wire the pipeline from existing collaborators.
    pub fn assemble(cfg: Arc<Config>, zabbix: Arc<Client>, vulners: Arc<dyn AuditApi>) -> Self {
        Self {
            sender: Sender::new(cfg.clone()),
            matrix: HostMatrix::new(cfg.clone(), zabbix.clone()),
            aggregator: Arc::new(Mutex::new(Aggregator::new())),
            lld: LldGenerator::new(cfg.naming.clone()),
            cfg,
            zabbix,
            vulners,
        }
    }

    /// Run a scan. The token aborts in-flight audit calls when cancelled.
    #[tracing::instrument(skip_all)]
    pub async fn scan(
        &self,
        cancel: &CancellationToken,
        opts: &ScanOptions,
    ) -> Result<ScanResults> {
        info!("fetching hosts from Zabbix");
        let hosts = self.matrix.fetch_hosts(opts).await?;

        if hosts.is_empty() {
            warn!("no hosts with OS-report data found");
            return Ok(ScanResults::default());
        }

        info!(hosts = hosts.len(), "starting vulnerability scan");

        // Repeated calls must not accumulate stale data.
        lock(&self.aggregator).reset();

        scan_hosts(
            cancel,
            hosts,
            self.vulners.clone(),
            self.aggregator.clone(),
            self.cfg.scan.workers,
            self.cfg.scan.min_cvss,
        )
        .await?;

        Ok(lock(&self.aggregator).results())
    }

    /// Two-phase publish: discovery payloads, settle wait, then values.
    /// Each send is sequential and any error short-circuits.
    #[tracing::instrument(skip_all)]
    pub async fn publish(
        &self,
        cancel: &CancellationToken,
        results: &ScanResults,
    ) -> Result<()> {
        info!("pushing LLD data to Zabbix");

        let naming = &self.cfg.naming;
        self.sender
            .send_lld(
                &naming.hosts_host,
                HOSTS_LLD_KEY,
                &self.lld.hosts_lld(&results.hosts),
            )
            .await?;
        self.sender
            .send_lld(
                &naming.packages_host,
                PACKAGES_LLD_KEY,
                &self.lld.packages_lld(&results.packages),
            )
            .await?;
        self.sender
            .send_lld(
                &naming.bulletins_host,
                BULLETINS_LLD_KEY,
                &self.lld.bulletins_lld(&results.bulletins),
            )
            .await?;

        // Give Zabbix time to process the discovery payloads and
        // materialize the per-entity items before values arrive.
        let delay = self.cfg.scan.lld_delay;
        if delay > 0 {
            info!(seconds = delay, "waiting for Zabbix to process LLD rules");
            tokio::select! {
                _ = cancel.cancelled() => return Err(ZtcError::Cancelled),
                _ = tokio::time::sleep(std::time::Duration::from_secs(delay)) => {}
            }
        }

        info!("pushing score data to Zabbix");

        self.sender
            .send_batch(&self.lld.host_score_data(&results.hosts))
            .await?;
        self.sender
            .send_batch(&self.lld.package_score_data(&results.packages))
            .await?;
        self.sender
            .send_batch(&self.lld.bulletin_score_data(&results.bulletins))
            .await?;

        let stats = lock(&self.aggregator).statistics();
        self.sender
            .send_batch(&self.lld.statistics_data(&stats))
            .await?;

        info!(
            hosts = results.hosts.len(),
            packages = results.packages.len(),
            bulletins = results.bulletins.len(),
            "results pushed to Zabbix"
        );

        Ok(())
    }

    /// Fleet statistics from the most recent scan.
    pub fn statistics(&self) -> Statistics {
        lock(&self.aggregator).statistics()
    }

    /// Log out from the Zabbix API.
    pub async fn close(&self) -> Result<()> {
        self.zabbix.logout().await
    }
}

fn lock(aggregator: &Mutex<Aggregator>) -> MutexGuard<'_, Aggregator> {
    aggregator.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Fan one audit task out per host, bounded by a semaphore of `workers`
/// permits. Per-host failures are logged at warn and dropped; cancellation
/// aborts everything still in flight.
async fn scan_hosts(
    cancel: &CancellationToken,
    hosts: Vec<HostData>,
    vulners: Arc<dyn AuditApi>,
    aggregator: Arc<Mutex<Aggregator>>,
    workers: usize,
    min_cvss: f64,
) -> Result<()> {
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks: JoinSet<()> = JoinSet::new();

    for host_data in hosts {
        let vulners = vulners.clone();
        let aggregator = aggregator.clone();
        let semaphore = semaphore.clone();

        tasks.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return, // semaphore closed, scan is shutting down
            };

            match scan_single_host(vulners.as_ref(), &host_data, min_cvss).await {
                Ok(entry) => {
                    lock(&aggregator).add_host(entry);
                }
                Err(e) => {
                    warn!(host = %host_data.host.name, error = %e, "failed to scan host");
                }
            }
        });
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tasks.abort_all();
                while tasks.join_next().await.is_some() {}
                return Err(ZtcError::Cancelled);
            }
            joined = tasks.join_next() => {
                match joined {
                    Some(Ok(())) => {}
                    Some(Err(e)) if e.is_panic() => {
                        warn!(error = %e, "host scan task panicked");
                    }
                    Some(Err(_)) => {} // aborted
                    None => break,
                }
            }
        }
    }

    Ok(())
}

/// Audit one host and shape the response into a host entry.
async fn scan_single_host(
    vulners: &dyn AuditApi,
    host_data: &HostData,
    min_cvss: f64,
) -> Result<HostEntry> {
    debug!(
        host = %host_data.host.name,
        os = %host_data.os_name,
        version = %host_data.os_version,
        packages = host_data.packages.len(),
        "scanning host"
    );

    let result = vulners
        .audit(
            &host_data.os_name,
            &host_data.os_version,
            &host_data.packages,
        )
        .await?;

    let entry = build_host_entry(host_data, &result, min_cvss);

    info!(
        host = %host_data.host.name,
        score = entry.score,
        packages = entry.packages.len(),
        bulletins = entry.bulletins.len(),
        "host scanned"
    );

    Ok(entry)
}

/// Shape an audit result into a host entry: extract findings, apply the
/// minimum-CVSS filter, and strip commas from the fix text (the line
/// protocol reserves them downstream).
fn build_host_entry(host_data: &HostData, result: &AuditResult, min_cvss: f64) -> HostEntry {
    let packages = filter_by_min_cvss(extract_vuln_packages(result), min_cvss);
    let bulletins = filter_bulletins_by_min_cvss(extract_bulletins(result), min_cvss);

    HostEntry {
        host_id: host_data.host.host_id.clone(),
        host: host_data.host.host.clone(),
        name: host_data.host.name.clone(),
        os_name: host_data.os_name.clone(),
        os_version: host_data.os_version.clone(),
        score: result.cvss_score,
        cumulative_fix: result.cumulative_fix.replace(',', ""),
        packages,
        bulletins,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulners::AuditVulnerability;
    use crate::zabbix::Host;
    use async_trait::async_trait;
    use std::collections::HashMap;

    fn host_data(id: &str, name: &str, package: &str) -> HostData {
        HostData {
            host: Host {
                host_id: id.to_string(),
                host: name.to_lowercase(),
                name: name.to_string(),
                ..Host::default()
            },
            os_name: "ubuntu".to_string(),
            os_version: "20.04".to_string(),
            packages: vec![package.to_string()],
        }
    }

    /// Audit stub keyed by the first package line.
    struct StubAudit {
        responses: HashMap<String, AuditResult>,
    }

    #[async_trait]
    impl AuditApi for StubAudit {
        async fn audit(
            &self,
            os: &str,
            _version: &str,
            packages: &[String],
        ) -> Result<AuditResult> {
            self.responses
                .get(&packages[0])
                .cloned()
                .ok_or_else(|| ZtcError::audit(os, "no stub response"))
        }
    }

    /// Audit stub that never returns, for cancellation tests.
    struct HangingAudit;

    #[async_trait]
    impl AuditApi for HangingAudit {
        async fn audit(&self, _: &str, _: &str, _: &[String]) -> Result<AuditResult> {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok(AuditResult::default())
        }
    }

    fn audit_result(score: f64, package: &str, bulletin: &str) -> AuditResult {
        AuditResult {
            cvss_score: score,
            cumulative_fix: "upgrade, please".to_string(),
            vulnerabilities: vec![AuditVulnerability {
                package: package.to_string(),
                bulletin_id: bulletin.to_string(),
                cvss_score: score,
                cve_list: vec![format!("CVE-{bulletin}")],
                fix: "upgrade".to_string(),
            }],
        }
    }

    #[test]
    fn build_host_entry_filters_and_strips_commas() {
        let data = host_data("1", "Web", "openssl 1.1.1f amd64");
        let mut result = audit_result(7.5, "openssl 1.1.1f amd64", "USN-1");
        result.vulnerabilities.push(AuditVulnerability {
            package: "lowrisk 1.0 amd64".to_string(),
            bulletin_id: "USN-2".to_string(),
            cvss_score: 0.5,
            cve_list: vec![],
            fix: String::new(),
        });

        let entry = build_host_entry(&data, &result, 1.0);
        assert_eq!(entry.host_id, "1");
        assert_eq!(entry.score, 7.5);
        assert_eq!(entry.cumulative_fix, "upgrade please");
        // the 0.5-score finding fell below min_cvss
        assert_eq!(entry.packages.len(), 1);
        assert_eq!(entry.bulletins.len(), 1);
        assert_eq!(entry.packages[0].name, "openssl");
    }

    #[tokio::test]
    async fn fan_out_merges_hosts_through_aggregator() {
        let mut responses = HashMap::new();
        responses.insert(
            "openssl 1.1.1f amd64".to_string(),
            audit_result(5.0, "openssl 1.1.1f amd64", "USN-1"),
        );
        responses.insert(
            "openssl 1.1.1f amd64 v2".to_string(),
            audit_result(9.0, "openssl 1.1.1f amd64", "USN-1"),
        );

        let hosts = vec![
            host_data("1", "Alpha", "openssl 1.1.1f amd64"),
            host_data("2", "Beta", "openssl 1.1.1f amd64 v2"),
        ];

        let aggregator = Arc::new(Mutex::new(Aggregator::new()));
        let cancel = CancellationToken::new();
        scan_hosts(
            &cancel,
            hosts,
            Arc::new(StubAudit { responses }),
            aggregator.clone(),
            4,
            1.0,
        )
        .await
        .unwrap();

        let results = lock(&aggregator).results();
        assert_eq!(results.hosts_scanned, 2);
        assert_eq!(results.packages.len(), 1);
        assert_eq!(results.packages[0].score, 9.0);
        assert_eq!(results.packages[0].affected_hosts.len(), 2);
        assert_eq!(results.bulletins.len(), 1);
    }

    #[tokio::test]
    async fn failing_host_is_dropped_not_fatal() {
        let mut responses = HashMap::new();
        responses.insert(
            "good 1.0 amd64".to_string(),
            audit_result(5.0, "good 1.0 amd64", "USN-1"),
        );

        let hosts = vec![
            host_data("1", "Good", "good 1.0 amd64"),
            host_data("2", "Bad", "unknown 1.0 amd64"),
        ];

        let aggregator = Arc::new(Mutex::new(Aggregator::new()));
        let cancel = CancellationToken::new();
        scan_hosts(
            &cancel,
            hosts,
            Arc::new(StubAudit { responses }),
            aggregator.clone(),
            2,
            1.0,
        )
        .await
        .unwrap();

        assert_eq!(lock(&aggregator).results().hosts_scanned, 1);
    }

    #[tokio::test]
    async fn zero_workers_is_clamped_to_one() {
        let mut responses = HashMap::new();
        responses.insert(
            "pkg 1.0 amd64".to_string(),
            audit_result(5.0, "pkg 1.0 amd64", "USN-1"),
        );

        let aggregator = Arc::new(Mutex::new(Aggregator::new()));
        let cancel = CancellationToken::new();
        scan_hosts(
            &cancel,
            vec![host_data("1", "Solo", "pkg 1.0 amd64")],
            Arc::new(StubAudit { responses }),
            aggregator.clone(),
            0,
            1.0,
        )
        .await
        .unwrap();

        assert_eq!(lock(&aggregator).results().hosts_scanned, 1);
    }

    #[tokio::test]
    async fn cancellation_aborts_in_flight_audits() {
        let hosts = vec![
            host_data("1", "Alpha", "pkg 1.0 amd64"),
            host_data("2", "Beta", "pkg 1.0 amd64"),
        ];

        let aggregator = Arc::new(Mutex::new(Aggregator::new()));
        let cancel = CancellationToken::new();

        let cancel_trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            cancel_trigger.cancel();
        });

        let err = scan_hosts(
            &cancel,
            hosts,
            Arc::new(HangingAudit),
            aggregator.clone(),
            4,
            1.0,
        )
        .await
        .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(lock(&aggregator).results().hosts_scanned, 0);
    }
}
