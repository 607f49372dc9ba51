//! # Zabbix Threat Control
//!
//! A vulnerability-assessment overlay for Zabbix, backed by the Vulners
//! audit API. Hosts whose OS identity and package inventory Zabbix already
//! collects are audited for known vulnerabilities, the per-host findings
//! are merged into fleet-wide package and bulletin views, and the
//! aggregates are fed back into Zabbix through low-level discovery so the
//! existing alerting, dashboards, and history keep working.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use ztc::{Config, Scanner, ScanOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = Arc::new(Config::load(std::path::Path::new("/etc/ztc.yaml"))?);
//!     let scanner = Scanner::new(cfg).await?;
//!
//!     let cancel = CancellationToken::new();
//!     let results = scanner.scan(&cancel, &ScanOptions::default()).await?;
//!     scanner.publish(&cancel, &results).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! The pipeline: host matrix → scan orchestrator → (concurrent) audit
//! client → aggregator → discovery generator → sender → Zabbix, in two
//! phases with a settle wait in between. Remediation ([`fixer`]) consumes
//! the already-published aggregates, not live scan state.

pub mod config;
pub mod error;
pub mod fixer;
pub mod logging;
pub mod plugin;
pub mod scanner;
pub mod telemetry;
pub mod vulners;
pub mod zabbix;

// Re-export main types
pub use config::Config;
pub use error::{Result, ZtcError};
pub use scanner::types::{ScanOptions, ScanResults, Statistics};
pub use scanner::Scanner;

// Re-export remediation types
pub use fixer::types::{FixOptions, FixPlan, FixResults};
pub use fixer::Fixer;

// Re-export the audit seam
pub use vulners::{AuditApi, AuditResult, VulnersClient};

// Re-export the agent-plugin adapter
pub use plugin::{Plugin, ScanCache};
