//! Loadable-agent adapter.
//!
//! A thin wrapper over the shared scan core for embedding in a monitoring
//! agent: `configure` maps agent-side option strings onto a [`Config`],
//! `start` spawns a periodic rescan task, `export` answers item-key
//! requests from the cached snapshot, and `stop` tears the task down.
//! All the hard work lives in [`crate::scanner`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::error::{Result, ZtcError};
use crate::scanner::lld::LldGenerator;
use crate::scanner::types::{ScanResults, Statistics};
use crate::scanner::Scanner;

/// Default seconds between background scans.
pub const DEFAULT_SCAN_INTERVAL: u64 = 3600;

/// The most recent scan outcome, swapped in atomically.
#[derive(Debug, Clone)]
pub struct CachedScan {
    pub results: ScanResults,
    pub stats: Statistics,
}

/// Readers-writer-locked snapshot of the last successful scan. `None`
/// until the first scan completes — a legitimate "no data yet" state.
#[derive(Default)]
pub struct ScanCache {
    inner: RwLock<Option<CachedScan>>,
}

impl ScanCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached data. The exclusive lock is held for the swap
    /// only.
    pub fn update(&self, results: ScanResults, stats: Statistics) {
        *self.inner.write() = Some(CachedScan { results, stats });
    }

    /// A consistent snapshot of the cached data, if any scan has finished.
    pub fn snapshot(&self) -> Option<CachedScan> {
        self.inner.read().clone()
    }
}

/// The agent plugin: Configure → Start → Export* → Stop.
pub struct Plugin {
    cfg: Option<Arc<Config>>,
    scan_interval: u64,
    cache: Arc<ScanCache>,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl Default for Plugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin {
    pub fn new() -> Self {
        Self {
            cfg: None,
            scan_interval: DEFAULT_SCAN_INTERVAL,
            cache: Arc::new(ScanCache::new()),
            cancel: None,
            task: None,
        }
    }

    /// Check mandatory agent-side options before configuring.
    pub fn validate(options: &HashMap<String, String>) -> Result<()> {
        for key in ["VulnersApiKey", "ZabbixApiUser", "ZabbixApiPassword"] {
            if options.get(key).map_or(true, String::is_empty) {
                return Err(ZtcError::config(format!(
                    "plugin option {key} is required"
                )));
            }
        }
        Ok(())
    }

    /// Map agent-side option strings onto the config. Unparseable numeric
    /// values keep their defaults.
    pub fn configure(&mut self, options: &HashMap<String, String>) {
        let mut cfg = Config::default();

        let get = |key: &str| options.get(key).cloned();

        if let Some(v) = get("VulnersApiKey") {
            cfg.vulners.api_key = v;
        }
        if let Some(v) = get("VulnersHost") {
            cfg.vulners.host = v;
        }
        if let Some(v) = get("VulnersRateLimit").and_then(|v| v.parse().ok()) {
            cfg.vulners.rate_limit = v;
        }
        if let Some(v) = get("ZabbixFrontUrl") {
            cfg.zabbix.front_url = v;
        }
        if let Some(v) = get("ZabbixApiUser") {
            cfg.zabbix.api_user = v;
        }
        if let Some(v) = get("ZabbixApiPassword") {
            cfg.zabbix.api_password = v;
        }
        if let Some(v) = get("ZabbixServerFQDN") {
            cfg.zabbix.server_fqdn = v;
        }
        if let Some(v) = get("ZabbixServerPort").and_then(|v| v.parse().ok()) {
            cfg.zabbix.server_port = v;
        }
        if let Some(v) = get("ZabbixSenderPath") {
            cfg.zabbix.sender_path = v;
        }
        if let Some(v) = get("ZabbixGetPath") {
            cfg.zabbix.get_path = v;
        }
        if let Some(v) = get("MinCVSS").and_then(|v| v.parse().ok()) {
            cfg.scan.min_cvss = v;
        }
        if let Some(v) = get("Workers").and_then(|v| v.parse().ok()) {
            cfg.scan.workers = v;
        }
        if let Some(v) = get("Timeout").and_then(|v| v.parse().ok()) {
            cfg.scan.timeout = v;
        }
        if let Some(v) = get("ScanInterval").and_then(|v| v.parse().ok()) {
            self.scan_interval = v;
        }

        self.cfg = Some(Arc::new(cfg));
    }

    /// Spawn the periodic rescan task: one scan immediately, then on every
    /// interval tick until `stop`.
    pub fn start(&mut self) {
        let Some(cfg) = self.cfg.clone() else {
            error!("plugin not configured, not starting");
            return;
        };

        let interval = if self.scan_interval > 0 {
            self.scan_interval
        } else {
            DEFAULT_SCAN_INTERVAL
        };
        info!(interval, "starting plugin scan loop");

        let cancel = CancellationToken::new();
        let cache = self.cache.clone();
        let loop_cancel = cancel.clone();

        self.task = Some(tokio::spawn(async move {
            scan_loop(cfg, cache, interval, loop_cancel).await;
        }));
        self.cancel = Some(cancel);
    }

    /// Stop the rescan task and wait for it to finish.
    pub async fn stop(&mut self) {
        info!("stopping plugin");
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    /// Answer an item-key request from the cached snapshot.
    pub fn export(&self, key: &str, params: &[String]) -> Result<Value> {
        let Some(cached) = self.cache.snapshot() else {
            return Err(ZtcError::not_found("no scan data available yet"));
        };
        let Some(cfg) = &self.cfg else {
            return Err(ZtcError::config("plugin not configured"));
        };

        let generator = LldGenerator::new(cfg.naming.clone());
        let results = &cached.results;

        match key {
            "vulners.hosts_lld" => {
                Ok(Value::String(serde_json::to_string(
                    &generator.hosts_lld(&results.hosts),
                )?))
            }
            "vulners.packages_lld" => {
                Ok(Value::String(serde_json::to_string(
                    &generator.packages_lld(&results.packages),
                )?))
            }
            "vulners.bulletins_lld" => {
                Ok(Value::String(serde_json::to_string(
                    &generator.bulletins_lld(&results.bulletins),
                )?))
            }
            "vulners.host.score" => {
                let host_id = params
                    .first()
                    .ok_or_else(|| ZtcError::validation("vulners.host.score requires a hostid parameter"))?;
                let score = results
                    .hosts
                    .iter()
                    .find(|h| &h.host_id == host_id)
                    .map(|h| h.score)
                    .unwrap_or(0.0);
                Ok(score.into())
            }
            "vulners.package.score" => {
                if params.len() < 2 {
                    return Err(ZtcError::validation(
                        "vulners.package.score requires name and version parameters",
                    ));
                }
                let score = results
                    .packages
                    .iter()
                    .find(|p| p.name == params[0] && p.version == params[1])
                    .map(|p| p.score)
                    .unwrap_or(0.0);
                Ok(score.into())
            }
            "vulners.bulletin.score" => {
                let id = params
                    .first()
                    .ok_or_else(|| ZtcError::validation("vulners.bulletin.score requires a bulletin id parameter"))?;
                let score = results
                    .bulletins
                    .iter()
                    .find(|b| &b.id == id)
                    .map(|b| b.score)
                    .unwrap_or(0.0);
                Ok(score.into())
            }
            "vulners.stats" => {
                let metric = params
                    .first()
                    .ok_or_else(|| ZtcError::validation("vulners.stats requires a metric parameter"))?;
                stat_metric(&cached.stats, metric)
            }
            other => Err(ZtcError::validation(format!("unknown key: {other}"))),
        }
    }
}

async fn scan_loop(cfg: Arc<Config>, cache: Arc<ScanCache>, interval: u64, cancel: CancellationToken) {
    run_scan(&cfg, &cache, &cancel).await;

    let mut ticker = tokio::time::interval(Duration::from_secs(interval));
    ticker.tick().await; // the first tick fires immediately

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => run_scan(&cfg, &cache, &cancel).await,
        }
    }
}

async fn run_scan(cfg: &Arc<Config>, cache: &ScanCache, cancel: &CancellationToken) {
    let scanner = match Scanner::new(cfg.clone()).await {
        Ok(scanner) => scanner,
        Err(e) => {
            error!(error = %e, "failed to create scanner");
            return;
        }
    };

    let results = match scanner.scan(cancel, &Default::default()).await {
        Ok(results) => results,
        Err(e) => {
            error!(error = %e, "scan failed");
            let _ = scanner.close().await;
            return;
        }
    };

    let stats = scanner.statistics();
    info!(
        hosts = results.hosts_scanned,
        vulns = results.vulnerable_packages,
        "scan completed"
    );
    cache.update(results, stats);

    let _ = scanner.close().await;
}

fn stat_metric(stats: &Statistics, metric: &str) -> Result<Value> {
    let value = match metric {
        "total_hosts" => stats.total_hosts.into(),
        "vuln_hosts" => stats.vulnerable_hosts.into(),
        "total_vulns" => stats.total_packages.into(),
        "total_bulletins" => stats.total_bulletins.into(),
        "total_cves" => stats.total_cves.into(),
        "max_score" => stats.max_cvss.into(),
        "avg_score" => stats.avg_cvss.into(),
        other => {
            return Err(ZtcError::validation(format!(
                "unknown stats metric: {other}"
            )))
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::types::HostEntry;

    fn options(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn cached_results() -> ScanResults {
        ScanResults {
            hosts_scanned: 1,
            hosts: vec![HostEntry {
                host_id: "1".to_string(),
                name: "Web".to_string(),
                score: 7.5,
                ..HostEntry::default()
            }],
            ..ScanResults::default()
        }
    }

    #[test]
    fn cache_starts_empty_and_swaps() {
        let cache = ScanCache::new();
        assert!(cache.snapshot().is_none());

        let stats = Statistics {
            total_hosts: 1,
            ..Statistics::default()
        };
        cache.update(cached_results(), stats);

        let snapshot = cache.snapshot().unwrap();
        assert_eq!(snapshot.results.hosts_scanned, 1);
        assert_eq!(snapshot.stats.total_hosts, 1);
    }

    #[test]
    fn validate_requires_mandatory_options() {
        assert!(Plugin::validate(&options(&[])).is_err());
        assert!(Plugin::validate(&options(&[("VulnersApiKey", "k")])).is_err());
        assert!(Plugin::validate(&options(&[
            ("VulnersApiKey", "k"),
            ("ZabbixApiUser", "u"),
            ("ZabbixApiPassword", "p"),
        ]))
        .is_ok());
    }

    #[test]
    fn configure_maps_options() {
        let mut plugin = Plugin::new();
        plugin.configure(&options(&[
            ("VulnersApiKey", "k"),
            ("ZabbixApiUser", "u"),
            ("ZabbixApiPassword", "p"),
            ("ZabbixServerPort", "10052"),
            ("MinCVSS", "4.5"),
            ("Workers", "8"),
            ("ScanInterval", "600"),
            ("ZabbixServerPort-bad", "x"),
        ]));

        let cfg = plugin.cfg.as_ref().unwrap();
        assert_eq!(cfg.vulners.api_key, "k");
        assert_eq!(cfg.zabbix.server_port, 10052);
        assert_eq!(cfg.scan.min_cvss, 4.5);
        assert_eq!(cfg.scan.workers, 8);
        assert_eq!(plugin.scan_interval, 600);
    }

    #[test]
    fn configure_keeps_defaults_on_bad_numbers() {
        let mut plugin = Plugin::new();
        plugin.configure(&options(&[("Workers", "many"), ("ScanInterval", "soon")]));
        let cfg = plugin.cfg.as_ref().unwrap();
        assert_eq!(cfg.scan.workers, 4);
        assert_eq!(plugin.scan_interval, DEFAULT_SCAN_INTERVAL);
    }

    #[test]
    fn export_without_data_is_an_error() {
        let mut plugin = Plugin::new();
        plugin.configure(&options(&[]));
        let err = plugin.export("vulners.hosts_lld", &[]).unwrap_err();
        assert!(matches!(err, ZtcError::NotFound(_)));
    }

    #[test]
    fn export_answers_from_cache() {
        let mut plugin = Plugin::new();
        plugin.configure(&options(&[]));
        plugin.cache.update(
            cached_results(),
            Statistics {
                total_hosts: 1,
                vulnerable_hosts: 1,
                max_cvss: 7.5,
                ..Statistics::default()
            },
        );

        let lld = plugin.export("vulners.hosts_lld", &[]).unwrap();
        let parsed: crate::zabbix::LldData =
            serde_json::from_str(lld.as_str().unwrap()).unwrap();
        assert_eq!(parsed.data.len(), 1);

        let score = plugin
            .export("vulners.host.score", &["1".to_string()])
            .unwrap();
        assert_eq!(score, serde_json::json!(7.5));

        // unknown host scores 0
        let score = plugin
            .export("vulners.host.score", &["99".to_string()])
            .unwrap();
        assert_eq!(score, serde_json::json!(0.0));

        let total = plugin
            .export("vulners.stats", &["total_hosts".to_string()])
            .unwrap();
        assert_eq!(total, serde_json::json!(1));

        assert!(plugin
            .export("vulners.stats", &["nope".to_string()])
            .is_err());
        assert!(plugin.export("vulners.nope", &[]).is_err());
    }
}
