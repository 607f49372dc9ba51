//! Configuration for ztc.
//!
//! Two on-disk formats are accepted: YAML (preferred) and the legacy INI
//! format of the original Python project, selected by file extension.
//! Environment variables with the `ZTC_<GROUP>_<KEY>` prefix override file
//! values. The YAML schema is the source of truth; INI keys are mapped
//! through a fixed table and unknown keys are warned about and skipped.

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ZtcError};

/// Default config path, matching the original Python project.
pub const DEFAULT_CONFIG_PATH: &str = "/opt/monitoring/zabbix-threat-control/ztc.conf";

/// Config file paths to try, in priority order.
const CONFIG_SEARCH_PATHS: &[&str] = &[
    "/opt/monitoring/zabbix-threat-control/ztc.conf", // legacy INI (Python project)
    "/etc/ztc.yaml",                                  // new YAML
    "/etc/ztc.conf",                                  // alternate legacy INI
];

/// Returns the first existing config file from the search paths.
///
/// If none exist, returns [`DEFAULT_CONFIG_PATH`] (which will fail with a
/// clear error when loaded).
pub fn find_config_path() -> PathBuf {
    for path in CONFIG_SEARCH_PATHS {
        if Path::new(path).exists() {
            return PathBuf::from(path);
        }
    }
    PathBuf::from(DEFAULT_CONFIG_PATH)
}

/// Main configuration for ztc.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Zabbix connection settings.
    pub zabbix: ZabbixConfig,
    /// Vulners API settings.
    pub vulners: VulnersConfig,
    /// Scan tuning parameters.
    pub scan: ScanConfig,
    /// OpenTelemetry settings.
    pub telemetry: TelemetryConfig,
    /// Names of virtual hosts, groups, dashboards and actions.
    pub naming: NamingConfig,
}

/// Zabbix connection settings: JSON-RPC frontend plus the line-protocol
/// submission tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZabbixConfig {
    /// Frontend URL, e.g. `https://zabbix.example.com`.
    pub front_url: String,
    /// API user name.
    pub api_user: String,
    /// API user password.
    pub api_password: String,
    /// Zabbix server FQDN for zabbix_sender.
    pub server_fqdn: String,
    /// Zabbix server trapper port.
    pub server_port: u16,
    /// Path to the zabbix_sender binary.
    pub sender_path: String,
    /// Path to the zabbix_get binary.
    pub get_path: String,
    /// Verify TLS certificates when talking to the frontend.
    pub verify_ssl: bool,
}

/// Vulners API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VulnersConfig {
    /// API key. Required only for the scan and fix commands.
    pub api_key: String,
    /// API base URL.
    pub host: String,
    /// Requests per second allowed against the API (0 disables limiting).
    pub rate_limit: u32,
}

/// Scan tuning parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Minimum CVSS score a finding must have to be kept.
    pub min_cvss: f64,
    /// Technical name of the OS-report template.
    pub os_report_template: String,
    /// Visible name of the OS-report template.
    pub os_report_visible_name: String,
    /// Group the OS-report template is placed in.
    pub template_group_name: String,
    /// HTTP timeout for API calls, in seconds.
    pub timeout: u64,
    /// Number of concurrent host scans.
    pub workers: usize,
    /// Seconds to wait between discovery and value submission (0 disables).
    pub lld_delay: u64,
}

/// OpenTelemetry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Enable trace export.
    pub enabled: bool,
    /// OTLP/HTTP collector endpoint.
    pub otlp_endpoint: String,
}

/// Customizable names for virtual hosts, groups, dashboards, and actions.
/// These match the `[OPTIONAL]` section keys of the original Python config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    pub hosts_host: String,
    pub hosts_visible_name: String,
    pub packages_host: String,
    pub packages_visible_name: String,
    pub bulletins_host: String,
    pub bulletins_visible_name: String,
    pub statistics_host: String,
    pub statistics_visible_name: String,
    pub group_name: String,
    pub dashboard_name: String,
    pub action_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            zabbix: ZabbixConfig::default(),
            vulners: VulnersConfig::default(),
            scan: ScanConfig::default(),
            telemetry: TelemetryConfig::default(),
            naming: NamingConfig::default(),
        }
    }
}

impl Default for ZabbixConfig {
    fn default() -> Self {
        Self {
            front_url: "http://localhost".to_string(),
            api_user: String::new(),
            api_password: String::new(),
            server_fqdn: "localhost".to_string(),
            server_port: 10051,
            sender_path: "zabbix_sender".to_string(),
            get_path: "zabbix_get".to_string(),
            verify_ssl: true,
        }
    }
}

impl Default for VulnersConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            host: "https://vulners.com".to_string(),
            rate_limit: 10,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            min_cvss: 1.0,
            os_report_template: "tmpl.vulners.os-report".to_string(),
            os_report_visible_name: "Template Vulners OS-Report".to_string(),
            template_group_name: "Templates".to_string(),
            timeout: 30,
            workers: 4,
            lld_delay: 300,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: String::new(),
        }
    }
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            hosts_host: "vulners.hosts".to_string(),
            hosts_visible_name: "Vulners - Hosts".to_string(),
            packages_host: "vulners.packages".to_string(),
            packages_visible_name: "Vulners - Packages".to_string(),
            bulletins_host: "vulners.bulletins".to_string(),
            bulletins_visible_name: "Vulners - Bulletins".to_string(),
            statistics_host: "vulners.statistics".to_string(),
            statistics_visible_name: "Vulners - Statistics".to_string(),
            group_name: "Vulners".to_string(),
            dashboard_name: "Vulners".to_string(),
            action_name: "Vulners".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a file, auto-detecting the format by
    /// extension: `.yaml`/`.yml` is parsed as YAML, anything else as legacy
    /// INI. Environment variables (`ZTC_` prefix) always override file
    /// values.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ZtcError::config(format!(
                "config file not found: {}",
                path.display()
            )));
        }

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        let mut cfg = match ext.as_str() {
            "yaml" | "yml" => Self::load_yaml(path)?,
            _ => {
                // .conf, .ini, or no extension: legacy INI
                let (cfg, warnings) = Self::load_ini_with_warnings(path)?;
                for w in warnings {
                    eprintln!("WARNING: {w}");
                }
                cfg
            }
        };

        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn load_yaml(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&raw)
            .map_err(|e| ZtcError::config(format!("failed to parse YAML config file: {e}")))
    }

    /// Load a legacy INI config file, returning the config and a list of
    /// warnings for keys that were skipped. Does not apply env overrides or
    /// validate — the migrate-config command wants the file contents as-is.
    pub fn load_ini_with_warnings(path: &Path) -> Result<(Self, Vec<String>)> {
        if !path.exists() {
            return Err(ZtcError::config(format!(
                "config file not found: {}",
                path.display()
            )));
        }

        let file = ini::Ini::load_from_file(path)
            .map_err(|e| ZtcError::config(format!("failed to parse INI config file: {e}")))?;

        let mut cfg = Config::default();
        let mut warnings = Vec::new();

        for (section, props) in file.iter() {
            let section_name = section.unwrap_or("DEFAULT");
            for (key, value) in props.iter() {
                let normalized = key.to_lowercase().replace(['_', '-', '.'], "");
                match map_ini_key(&normalized) {
                    Some((group, opt)) => {
                        if let Err(msg) = cfg.set(group, opt, value) {
                            return Err(ZtcError::config(format!(
                                "INI key [{section_name}] {key}: {msg}"
                            )));
                        }
                    }
                    None if is_legacy_only_key(&normalized) => {
                        warnings.push(format!(
                            "Python-only INI key [{section_name}] {key} is not supported (skipped)"
                        ));
                    }
                    // Keys outside any section are ini-library artifacts,
                    // not user configuration; stay quiet about them.
                    None if section.is_some() => {
                        warnings.push(format!(
                            "unrecognized INI key [{section_name}] {key} (skipped)"
                        ));
                    }
                    None => {}
                }
            }
        }

        Ok((cfg, warnings))
    }

    /// Apply `ZTC_<GROUP>_<KEY>` environment overrides on top of file values.
    fn apply_env_overrides(&mut self) -> Result<()> {
        dotenvy::dotenv().ok();

        for (name, value) in env::vars() {
            let Some(rest) = name.strip_prefix("ZTC_") else {
                continue;
            };
            let rest = rest.to_lowercase();
            let Some((group, key)) = rest.split_once('_') else {
                continue;
            };
            // Unknown env keys are ignored; bad values are an error.
            let (group, key) = (group.to_string(), key.to_string());
            if let Err(msg) = self.set(&group, &key, &value) {
                if msg != UNKNOWN_OPTION {
                    return Err(ZtcError::config(format!("env override {name}: {msg}")));
                }
            }
        }
        Ok(())
    }

    /// Set one option by `(group, key)` path from its string form.
    fn set(&mut self, group: &str, key: &str, value: &str) -> std::result::Result<(), String> {
        match (group, key) {
            ("zabbix", "front_url") => self.zabbix.front_url = value.to_string(),
            ("zabbix", "api_user") => self.zabbix.api_user = value.to_string(),
            ("zabbix", "api_password") => self.zabbix.api_password = value.to_string(),
            ("zabbix", "server_fqdn") => self.zabbix.server_fqdn = value.to_string(),
            ("zabbix", "server_port") => self.zabbix.server_port = parse(value)?,
            ("zabbix", "sender_path") => self.zabbix.sender_path = value.to_string(),
            ("zabbix", "get_path") => self.zabbix.get_path = value.to_string(),
            ("zabbix", "verify_ssl") => self.zabbix.verify_ssl = parse_bool(value)?,
            ("vulners", "api_key") => self.vulners.api_key = value.to_string(),
            ("vulners", "host") => self.vulners.host = value.to_string(),
            ("vulners", "rate_limit") => self.vulners.rate_limit = parse(value)?,
            ("scan", "min_cvss") => self.scan.min_cvss = parse(value)?,
            ("scan", "os_report_template") => self.scan.os_report_template = value.to_string(),
            ("scan", "os_report_visible_name") => {
                self.scan.os_report_visible_name = value.to_string()
            }
            ("scan", "template_group_name") => self.scan.template_group_name = value.to_string(),
            ("scan", "timeout") => self.scan.timeout = parse(value)?,
            ("scan", "workers") => self.scan.workers = parse(value)?,
            ("scan", "lld_delay") => self.scan.lld_delay = parse(value)?,
            ("telemetry", "enabled") => self.telemetry.enabled = parse_bool(value)?,
            ("telemetry", "otlp_endpoint") => self.telemetry.otlp_endpoint = value.to_string(),
            ("naming", "hosts_host") => self.naming.hosts_host = value.to_string(),
            ("naming", "hosts_visible_name") => self.naming.hosts_visible_name = value.to_string(),
            ("naming", "packages_host") => self.naming.packages_host = value.to_string(),
            ("naming", "packages_visible_name") => {
                self.naming.packages_visible_name = value.to_string()
            }
            ("naming", "bulletins_host") => self.naming.bulletins_host = value.to_string(),
            ("naming", "bulletins_visible_name") => {
                self.naming.bulletins_visible_name = value.to_string()
            }
            ("naming", "statistics_host") => self.naming.statistics_host = value.to_string(),
            ("naming", "statistics_visible_name") => {
                self.naming.statistics_visible_name = value.to_string()
            }
            ("naming", "group_name") => self.naming.group_name = value.to_string(),
            ("naming", "dashboard_name") => self.naming.dashboard_name = value.to_string(),
            ("naming", "action_name") => self.naming.action_name = value.to_string(),
            _ => return Err(UNKNOWN_OPTION.to_string()),
        }
        Ok(())
    }

    /// Check that Zabbix connection fields are set and values are in range.
    ///
    /// Does NOT require `vulners.api_key` — that is only needed for the scan
    /// and fix commands and is checked by [`Config::require_vulners_key`].
    pub fn validate(&self) -> Result<()> {
        let mut errs = Vec::new();

        if self.zabbix.api_user.is_empty() {
            errs.push("zabbix.api_user is required".to_string());
        }
        if self.zabbix.api_password.is_empty() {
            errs.push("zabbix.api_password is required".to_string());
        }
        if self.zabbix.server_port == 0 {
            errs.push("zabbix.server_port must be between 1 and 65535".to_string());
        }
        if !self.zabbix.front_url.is_empty() {
            match url::Url::parse(&self.zabbix.front_url) {
                Ok(u) if u.has_host() => {}
                _ => errs.push("zabbix.front_url must be a valid URL with scheme and host".into()),
            }
        }
        if !(0.0..=10.0).contains(&self.scan.min_cvss) {
            errs.push(format!(
                "scan.min_cvss must be between 0.0 and 10.0, got {}",
                self.scan.min_cvss
            ));
        }
        if self.scan.workers == 0 {
            errs.push("scan.workers must be greater than 0".to_string());
        }
        if self.scan.timeout == 0 {
            errs.push("scan.timeout must be greater than 0".to_string());
        }

        if errs.is_empty() {
            Ok(())
        } else {
            Err(ZtcError::config(errs.join("; ")))
        }
    }

    /// Check that the Vulners API key is set. Call this in commands that
    /// need the Vulners API (scan, fix).
    pub fn require_vulners_key(&self) -> Result<()> {
        if self.vulners.api_key.is_empty() {
            return Err(ZtcError::config(
                "vulners.api_key is required (set in config file or ZTC_VULNERS_API_KEY)",
            ));
        }
        Ok(())
    }

    /// The full Zabbix JSON-RPC endpoint URL.
    pub fn api_url(&self) -> String {
        format!(
            "{}/api_jsonrpc.php",
            self.zabbix.front_url.trim_end_matches('/')
        )
    }

    /// Render this config as canonical YAML (used by migrate-config).
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| ZtcError::config(e.to_string()))
    }

    /// A minimal valid configuration for tests.
    pub fn for_testing() -> Self {
        let mut cfg = Config::default();
        cfg.zabbix.api_user = "test".to_string();
        cfg.zabbix.api_password = "test".to_string();
        cfg.vulners.api_key = "test-key".to_string();
        cfg
    }
}

const UNKNOWN_OPTION: &str = "unknown option";

fn parse<T: std::str::FromStr>(value: &str) -> std::result::Result<T, String>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| format!("invalid value {value:?}: {e}"))
}

fn parse_bool(value: &str) -> std::result::Result<bool, String> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        other => Err(format!("invalid boolean {other:?}")),
    }
}

/// Map a legacy INI key (lowercased, separators stripped) to its
/// `(group, key)` path in the YAML schema.
fn map_ini_key(normalized: &str) -> Option<(&'static str, &'static str)> {
    let mapped = match normalized {
        // MANDATORY section
        "vulnersapikey" => ("vulners", "api_key"),
        "zabbixapiuser" => ("zabbix", "api_user"),
        "zabbixapipassword" => ("zabbix", "api_password"),
        // OPTIONAL section
        "zabbixfronturl" => ("zabbix", "front_url"),
        "zabbixserverfqdn" => ("zabbix", "server_fqdn"),
        "zabbixserverport" => ("zabbix", "server_port"),
        "zabbixsenderpath" | "zabbixsender" => ("zabbix", "sender_path"),
        "zabbixgetpath" | "zabbixget" => ("zabbix", "get_path"),
        "mincvss" => ("scan", "min_cvss"),
        "osreporttemplate" | "templatehost" => ("scan", "os_report_template"),
        "templatevisiblename" => ("scan", "os_report_visible_name"),
        "templategroupname" => ("scan", "template_group_name"),
        // OPTIONAL section — naming
        "hostshost" => ("naming", "hosts_host"),
        "hostsvisiblename" => ("naming", "hosts_visible_name"),
        "packageshost" => ("naming", "packages_host"),
        "packagesvisiblename" => ("naming", "packages_visible_name"),
        "bulletinshost" => ("naming", "bulletins_host"),
        "bulletinsvisiblename" => ("naming", "bulletins_visible_name"),
        "statisticshost" => ("naming", "statistics_host"),
        "statisticsvisiblename" => ("naming", "statistics_visible_name"),
        "hostgroupname" => ("naming", "group_name"),
        "dashboardname" => ("naming", "dashboard_name"),
        "actionname" => ("naming", "action_name"),
        // ADVANCED section
        "zabbixverifyssl" | "verifyssl" => ("zabbix", "verify_ssl"),
        "vulnershost" => ("vulners", "host"),
        "vulnersratelimit" => ("vulners", "rate_limit"),
        "timeout" => ("scan", "timeout"),
        "workers" => ("scan", "workers"),
        "llddelay" => ("scan", "lld_delay"),
        _ => return None,
    };
    Some(mapped)
}

/// Python-era INI keys that are recognized but have no equivalent here.
/// They produce a specific warning instead of "unrecognized".
fn is_legacy_only_key(normalized: &str) -> bool {
    matches!(
        normalized,
        "vulnersproxyhost"          // proxy not implemented
            | "vulnersproxyport"
            | "trustedzabbixusers"  // trust checks not implemented
            | "usezabbixagenttofix" // fix uses --ssh flag instead
            | "sshuser"             // fix uses --ssh-user flag instead
            | "logfile"             // logs go to stderr
            | "debuglevel"          // use --verbose flag
            | "workdir"
            | "hostsapplicationname"    // Zabbix < 5.2 concept, deprecated
            | "statisticsmacrosname"    // hardcoded
            | "statisticsmacrosvalue"
            | "templatemacrosname"
            | "templatemacrosvalue"
            | "templateapplicationname" // Zabbix < 5.2 concept, deprecated
    )
}
