//! Common validation utilities shared across modules

/// Validate that a port number is in valid range (1-65535)
pub fn validate_port_range(port: u16) -> Result<(), String> {
    if port == 0 {
        return Err("Port must be between 1 and 65535".to_string());
    }
    Ok(())
}

/// Check if a string is empty or only whitespace
pub fn is_empty_or_whitespace(s: &str) -> bool {
    s.trim().is_empty()
}

/// Validate that a hostname/domain doesn't contain invalid characters
pub fn validate_hostname_chars(hostname: &str) -> bool {
    !hostname.is_empty()
        && hostname.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '*')
        && !hostname.starts_with('-')
        && !hostname.ends_with('-')
}

/// Validate an upstream address of the form `host:port`
pub fn validate_upstream(target: &str) -> Result<(), String> {
    let (host, port) = target
        .rsplit_once(':')
        .ok_or_else(|| format!("Target must be host:port, got '{}'", target))?;
    if is_empty_or_whitespace(host) {
        return Err(format!("Target host is empty in '{}'", target));
    }
    let port: u16 = port.parse().map_err(|_| format!("Invalid target port in '{}'", target))?;
    validate_port_range(port)
}
