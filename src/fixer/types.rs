//! Remediation option, plan, and result types.

/// Options for a fix operation.
#[derive(Debug, Clone, Default)]
pub struct FixOptions {
    /// Fix every host affected by this bulletin.
    pub bulletin_id: String,
    /// Fix one host by ID.
    pub host_id: String,
    /// Fix one host by technical name (resolved to an ID).
    pub host_name: String,
    /// Show the plan without executing.
    pub dry_run: bool,
    /// Execute over SSH instead of the Zabbix agent.
    pub use_ssh: bool,
    /// SSH user (defaults to root).
    pub ssh_user: String,
}

/// The full remediation plan.
#[derive(Debug, Clone, Default)]
pub struct FixPlan {
    pub hosts: Vec<HostFixPlan>,
}

/// Remediation plan for one host.
#[derive(Debug, Clone, Default)]
pub struct HostFixPlan {
    pub host_id: String,
    /// Visible name.
    pub name: String,
    /// IP or DNS target.
    pub address: String,
    /// Zabbix agent port.
    pub agent_port: String,
    /// Package names to upgrade; empty means full system update.
    pub packages: Vec<String>,
    /// The generated package-manager command.
    pub command: String,
}

/// Aggregate results of executing a fix plan.
#[derive(Debug, Clone, Default)]
pub struct FixResults {
    pub successful: usize,
    pub failed: usize,
    pub hosts: Vec<HostFixResult>,
}

/// The outcome of one host's fix.
#[derive(Debug, Clone, Default)]
pub struct HostFixResult {
    pub host_id: String,
    pub name: String,
    pub success: bool,
    pub output: String,
    pub error: String,
}
