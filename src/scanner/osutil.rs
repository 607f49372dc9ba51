//! OS name normalization and package-line parsing.

/// Split a package line like `"nginx 1.18.0 amd64"` into
/// `(name, version, arch)`. Version and arch may be absent.
pub fn parse_package_string(package: &str) -> (String, String, String) {
    let parts: Vec<&str> = package.split_whitespace().collect();
    match parts.as_slice() {
        [name, version, arch] => (name.to_string(), version.to_string(), arch.to_string()),
        [name, version] => (name.to_string(), version.to_string(), String::new()),
        [name] => (name.to_string(), String::new(), String::new()),
        _ => (package.to_string(), String::new(), String::new()),
    }
}

/// Normalize an OS name to the family tag the Vulners API expects.
/// Substring match on the lowercased name; unknown names pass through.
pub fn normalize_os_name(os_name: &str) -> String {
    let lower = os_name.to_lowercase();

    let families = [
        ("ubuntu", "ubuntu"),
        ("debian", "debian"),
        ("centos", "centos"),
        ("red hat", "redhat"),
        ("rhel", "redhat"),
        ("amazon", "amazon"),
        ("oracle", "oraclelinux"),
        ("suse", "suse"),
        ("fedora", "fedora"),
        ("alpine", "alpine"),
        ("arch", "arch"),
    ];

    for (needle, family) in families {
        if lower.contains(needle) {
            return family.to_string();
        }
    }
    lower
}

/// Extract the version number from an OS version string: the first
/// whitespace-delimited token ("20.04 LTS" → "20.04").
pub fn extract_os_version(os_version: &str) -> String {
    os_version
        .split_whitespace()
        .next()
        .unwrap_or(os_version)
        .to_string()
}
