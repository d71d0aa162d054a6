use anyhow::{Result, anyhow};

/// Normalizes a hostname for comparison against remote inventories:
/// trimmed, trailing dot removed, IDNA-encoded, lower-cased.
pub fn normalize_domain(input: &str) -> Result<String> {
    let trimmed = input.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        return Err(anyhow!("domain name is required"));
    }
    let ascii =
        idna::domain_to_ascii(trimmed).map_err(|err| anyhow!("invalid domain name: {err}"))?;
    if !ascii.contains('.') {
        return Err(anyhow!("domain name must be fully qualified: {ascii}"));
    }
    Ok(ascii.to_lowercase())
}

/// Loose equality used when matching remote records that may carry
/// trailing dots or different casing.
pub fn same_domain(left: &str, right: &str) -> bool {
    let clean = |value: &str| value.trim().trim_end_matches('.').to_lowercase();
    clean(left) == clean(right)
}

pub fn contains_domain(candidates: &[String], domain: &str) -> bool {
    candidates.iter().any(|candidate| same_domain(candidate, domain))
}

/// Registrable zone of a hostname, e.g. `example.com` for `app.example.com`.
pub fn derive_zone(hostname: &str) -> String {
    let parts: Vec<&str> = hostname.trim_end_matches('.').split('.').collect();
    if parts.len() >= 2 {
        format!("{}.{}", parts[parts.len() - 2], parts[parts.len() - 1])
    } else {
        hostname.to_string()
    }
}

/// Record name relative to the zone, as registrar DNS panels expect it
/// (`dashboard` for `dashboard.example.com`, `@` for the apex).
pub fn relative_record_name(hostname: &str) -> String {
    let hostname = hostname.trim_end_matches('.');
    let zone = derive_zone(hostname);
    if hostname == zone {
        return "@".to_string();
    }
    hostname
        .strip_suffix(&format!(".{zone}"))
        .unwrap_or(hostname)
        .to_string()
}
