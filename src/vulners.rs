//! Vulners Linux audit client.
//!
//! Wraps the `POST /api/v3/audit/audit/` endpoint: given an OS family,
//! version, and the raw package lines, the service returns findings with
//! CVSS scores, bulletin IDs, CVE lists, and fix hints.
//!
//! All calls go through a shared token-bucket rate limiter sized
//! `(rate, burst = 2 * rate)`; callers must not bypass it.

use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::Config;
use crate::error::{Result, ZtcError};

/// A single finding: one (package, bulletin) pair on the audited host.
#[derive(Debug, Clone, Default)]
pub struct AuditVulnerability {
    /// Raw package line the finding applies to, e.g. `"openssl 1.1.1f amd64"`.
    pub package: String,
    /// Security bulletin identifier, e.g. `"USN-5051-1"`.
    pub bulletin_id: String,
    /// CVSS base score.
    pub cvss_score: f64,
    /// CVEs grouped under the bulletin.
    pub cve_list: Vec<String>,
    /// Suggested fix command fragment.
    pub fix: String,
}

/// The parsed result of one audit call.
#[derive(Debug, Clone, Default)]
pub struct AuditResult {
    /// Cumulative CVSS score for the host.
    pub cvss_score: f64,
    /// Cumulative fix text for the host.
    pub cumulative_fix: String,
    /// Individual findings.
    pub vulnerabilities: Vec<AuditVulnerability>,
}

/// The audit operation, as a seam so the scanner can be exercised without
/// the network.
#[async_trait]
pub trait AuditApi: Send + Sync {
    /// Audit one host's package list.
    async fn audit(&self, os: &str, version: &str, packages: &[String]) -> Result<AuditResult>;
}

/// Rate-limited HTTP client for the Vulners audit API.
pub struct VulnersClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    limiter: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl VulnersClient {
    /// Build a client from config. A `rate_limit` of 0 disables throttling.
    pub fn new(cfg: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.scan.timeout))
            .build()?;

        let limiter = NonZeroU32::new(cfg.vulners.rate_limit).map(|rate| {
            let burst = NonZeroU32::new(rate.get() * 2).unwrap_or(rate);
            RateLimiter::direct(Quota::per_second(rate).allow_burst(burst))
        });

        Ok(Self {
            http,
            api_key: cfg.vulners.api_key.clone(),
            base_url: cfg.vulners.host.trim_end_matches('/').to_string(),
            limiter,
        })
    }
}

#[async_trait]
impl AuditApi for VulnersClient {
    #[tracing::instrument(skip(self, packages), fields(packages = packages.len()))]
    async fn audit(&self, os: &str, version: &str, packages: &[String]) -> Result<AuditResult> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let url = format!("{}/api/v3/audit/audit/", self.base_url);
        debug!(os, version, packages = packages.len(), "calling Vulners audit");

        let response = self
            .http
            .post(&url)
            .json(&json!({
                "os": os,
                "version": version,
                "package": packages,
                "apiKey": self.api_key,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ZtcError::audit(os, format!("HTTP {}", response.status())));
        }

        let wire: AuditResponse = response.json().await?;
        if wire.result != "OK" {
            let message = wire
                .data
                .error
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| format!("API result {:?}", wire.result));
            return Err(ZtcError::audit(os, message));
        }

        Ok(parse_audit_data(wire.data))
    }
}

// --- wire format ---

#[derive(Debug, Deserialize)]
struct AuditResponse {
    #[serde(default)]
    result: String,
    #[serde(default)]
    data: AuditData,
}

#[derive(Debug, Default, Deserialize)]
struct AuditData {
    #[serde(default)]
    cvss: CvssBlock,
    #[serde(default)]
    cumulative_fix: String,
    /// package line → bulletin ID → matching entries. BTreeMaps keep the
    /// flattened finding order stable across runs.
    #[serde(default)]
    packages: BTreeMap<String, BTreeMap<String, Vec<WireVulnerability>>>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CvssBlock {
    #[serde(default)]
    score: f64,
}

#[derive(Debug, Default, Deserialize)]
struct WireVulnerability {
    #[serde(default)]
    package: String,
    #[serde(default)]
    cvss: CvssBlock,
    #[serde(default, rename = "cvelist")]
    cve_list: Vec<String>,
    #[serde(default)]
    fix: String,
}

fn parse_audit_data(data: AuditData) -> AuditResult {
    let mut vulnerabilities = Vec::new();

    for (package_line, bulletins) in &data.packages {
        for (bulletin_id, entries) in bulletins {
            for entry in entries {
                let package = if entry.package.is_empty() {
                    package_line.clone()
                } else {
                    entry.package.clone()
                };
                vulnerabilities.push(AuditVulnerability {
                    package,
                    bulletin_id: bulletin_id.clone(),
                    cvss_score: entry.cvss.score,
                    cve_list: entry.cve_list.clone(),
                    fix: entry.fix.clone(),
                });
            }
        }
    }

    AuditResult {
        cvss_score: data.cvss.score,
        cumulative_fix: data.cumulative_fix,
        vulnerabilities,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "result": "OK",
        "data": {
            "cvss": { "score": 7.5 },
            "cumulative_fix": "apt-get install --only-upgrade openssl",
            "packages": {
                "openssl 1.1.1f amd64": {
                    "USN-5051-1": [
                        {
                            "package": "openssl 1.1.1f amd64",
                            "cvss": { "score": 7.5 },
                            "cvelist": ["CVE-2021-3711", "CVE-2021-3712"],
                            "fix": "apt-get install --only-upgrade openssl"
                        }
                    ]
                },
                "zlib1g 1.2.11 amd64": {
                    "USN-5260-1": [
                        {
                            "package": "zlib1g 1.2.11 amd64",
                            "cvss": { "score": 9.8 },
                            "cvelist": ["CVE-2018-25032"],
                            "fix": "apt-get install --only-upgrade zlib1g"
                        }
                    ]
                }
            }
        }
    }"#;

    #[test]
    fn parses_audit_response() {
        let wire: AuditResponse = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(wire.result, "OK");
        let result = parse_audit_data(wire.data);

        assert_eq!(result.cvss_score, 7.5);
        assert_eq!(
            result.cumulative_fix,
            "apt-get install --only-upgrade openssl"
        );
        assert_eq!(result.vulnerabilities.len(), 2);

        // BTreeMap ordering: openssl sorts before zlib1g.
        let first = &result.vulnerabilities[0];
        assert_eq!(first.package, "openssl 1.1.1f amd64");
        assert_eq!(first.bulletin_id, "USN-5051-1");
        assert_eq!(first.cvss_score, 7.5);
        assert_eq!(first.cve_list.len(), 2);
    }

    #[test]
    fn empty_data_parses_to_empty_result() {
        let wire: AuditResponse =
            serde_json::from_str(r#"{"result": "OK", "data": {}}"#).unwrap();
        let result = parse_audit_data(wire.data);
        assert_eq!(result.cvss_score, 0.0);
        assert!(result.vulnerabilities.is_empty());
    }

    #[test]
    fn error_payload_shape() {
        let wire: AuditResponse = serde_json::from_str(
            r#"{"result": "error", "data": {"error": "wrong api key"}}"#,
        )
        .unwrap();
        assert_eq!(wire.result, "error");
        assert_eq!(wire.data.error.as_deref(), Some("wrong api key"));
    }

    #[test]
    fn limiter_disabled_at_rate_zero() {
        let mut cfg = Config::for_testing();
        cfg.vulners.rate_limit = 0;
        let client = VulnersClient::new(&cfg).unwrap();
        assert!(client.limiter.is_none());

        cfg.vulners.rate_limit = 10;
        let client = VulnersClient::new(&cfg).unwrap();
        assert!(client.limiter.is_some());
    }
}
