//! Input validation for everything that ends up in a subprocess argument.
//!
//! All checks fail closed before any subprocess is spawned. Values passing
//! these validators contain no shell metacharacters outside the permitted
//! sets.

use std::net::IpAddr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Result, ZtcError};

static PACKAGE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9._+:~-]*$").unwrap());

static SSH_USER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9._-]*$").unwrap());

// Hostname: starts and ends alphanumeric, dots and hyphens in between.
// Label and total lengths are checked separately in `is_valid_fqdn`.
static FQDN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9.-]{0,251}[a-zA-Z0-9])?$").unwrap());

/// Validate that the target is a parseable IP address or a valid DNS name.
/// Hosts may use either in their Zabbix interface configuration.
pub fn validate_host_target(target: &str) -> Result<()> {
    if target.is_empty() {
        return Err(ZtcError::validation("host target is empty"));
    }
    if target.parse::<IpAddr>().is_ok() {
        return Ok(());
    }
    if is_valid_fqdn(target) {
        return Ok(());
    }
    Err(ZtcError::validation(format!(
        "invalid host target (not a valid IP or hostname): {target:?}"
    )))
}

fn is_valid_fqdn(s: &str) -> bool {
    if s.len() > 253 {
        return false;
    }
    if !FQDN_RE.is_match(s) {
        return false;
    }
    s.split('.').all(|label| !label.is_empty() && label.len() <= 63)
}

/// Validate that a package name contains only safe characters.
pub fn validate_package_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ZtcError::validation("package name is empty"));
    }
    if name.len() > 256 {
        return Err(ZtcError::validation(format!(
            "package name too long: {} chars",
            name.len()
        )));
    }
    if !PACKAGE_NAME_RE.is_match(name) {
        return Err(ZtcError::validation(format!(
            "invalid package name: {name:?}"
        )));
    }
    Ok(())
}

/// Validate that an SSH username contains only safe characters.
pub fn validate_ssh_user(user: &str) -> Result<()> {
    if user.is_empty() {
        return Err(ZtcError::validation("SSH user is empty"));
    }
    if user.len() > 64 {
        return Err(ZtcError::validation(format!(
            "SSH user too long: {} chars",
            user.len()
        )));
    }
    if !SSH_USER_RE.is_match(user) {
        return Err(ZtcError::validation(format!("invalid SSH user: {user:?}")));
    }
    Ok(())
}

/// Validate every package name in the batch; the first offender fails it.
pub fn sanitize_packages(packages: &[String]) -> Result<()> {
    for package in packages {
        validate_package_name(package)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_target_accepts_ips() {
        assert!(validate_host_target("192.0.2.10").is_ok());
        assert!(validate_host_target("::1").is_ok());
        assert!(validate_host_target("2001:db8::42").is_ok());
    }

    #[test]
    fn host_target_accepts_hostnames() {
        assert!(validate_host_target("web01").is_ok());
        assert!(validate_host_target("web01.example.com").is_ok());
        assert!(validate_host_target("a-b-c.example.com").is_ok());
    }

    #[test]
    fn host_target_rejects_injection() {
        for bad in [
            "",
            "host; rm -rf /",
            "host$(whoami)",
            "host`id`",
            "host name",
            "-leading.example.com",
            "trailing-.example.com",
        ] {
            assert!(validate_host_target(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn host_target_rejects_oversized_names() {
        // label longer than 63 chars
        let long_label = format!("{}.example.com", "a".repeat(64));
        assert!(validate_host_target(&long_label).is_err());
        // total length over 253 chars
        let long_name = format!(
            "{}.{}.{}.{}",
            "a".repeat(63),
            "b".repeat(63),
            "c".repeat(63),
            "d".repeat(63)
        );
        assert!(long_name.len() > 253);
        assert!(validate_host_target(&long_name).is_err());
    }

    #[test]
    fn package_names_accept_distro_conventions() {
        for good in [
            "openssl",
            "libssl1.1",
            "gcc-10",
            "libstdc++6",
            "python3.8",
            "ca-certificates",
            "1password",
            "libreadline8:amd64",
            "ncurses-base~really",
        ] {
            assert!(validate_package_name(good).is_ok(), "rejected {good:?}");
        }
    }

    #[test]
    fn package_names_reject_metacharacters() {
        for bad in [
            "",
            "-leading-dash",
            "pkg;id",
            "pkg name",
            "pkg$(x)",
            "pkg|cat",
            "pkg'quote",
        ] {
            assert!(validate_package_name(bad).is_err(), "accepted {bad:?}");
        }
        assert!(validate_package_name(&"a".repeat(257)).is_err());
    }

    #[test]
    fn ssh_users() {
        assert!(validate_ssh_user("root").is_ok());
        assert!(validate_ssh_user("deploy_user").is_ok());
        assert!(validate_ssh_user("_svc").is_ok());
        assert!(validate_ssh_user("").is_err());
        assert!(validate_ssh_user("1admin").is_err());
        assert!(validate_ssh_user("user;id").is_err());
        assert!(validate_ssh_user(&"u".repeat(65)).is_err());
    }

    #[test]
    fn sanitize_packages_fails_on_first_offender() {
        let packages = vec!["openssl".to_string(), "bad one".to_string()];
        assert!(sanitize_packages(&packages).is_err());
        assert!(sanitize_packages(&["curl".to_string()]).is_ok());
        assert!(sanitize_packages(&[]).is_ok());
    }
}
