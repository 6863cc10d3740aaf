//! Local host identity

use once_cell::sync::Lazy;
use std::net::ToSocketAddrs;

/// Host name of this machine, resolved once. `unknown` when it cannot be read.
pub static HOSTNAME: Lazy<String> = Lazy::new(|| {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
});

pub fn hostname() -> &'static str {
    HOSTNAME.as_str()
}

/// `<hostname> (<address>)` using the first address the host name resolves
/// to, or `unknown`.
pub static LOCATION: Lazy<String> = Lazy::new(|| {
    (HOSTNAME.as_str(), 0)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .map(|addr| format!("{} ({})", HOSTNAME.as_str(), addr.ip()))
        .unwrap_or_else(|| "unknown".to_string())
});

pub fn location() -> &'static str {
    LOCATION.as_str()
}

/// Account the process runs under, from `USER` or `USERNAME`
pub fn user_name() -> String {
    ["USER", "USERNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Correlation id used when the caller supplies none: `<hostname>-<uuid>`
pub fn default_correlation_id() -> String {
    format!("{}-{}", hostname(), uuid::Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hostname_is_stable() {
        assert!(!hostname().is_empty());
        assert!(std::ptr::eq(hostname(), hostname()));
    }

    #[test]
    fn test_location_names_this_host() {
        let location = location();
        assert!(location == "unknown" || location.starts_with(&format!("{} (", hostname())));
        assert!(!user_name().is_empty());
    }

    #[test]
    fn test_default_correlation_id_shape() {
        let a = default_correlation_id();
        let b = default_correlation_id();
        assert_ne!(a, b);

        let prefix = format!("{}-", hostname());
        assert!(a.starts_with(&prefix));
        let suffix = &a[prefix.len()..];
        assert!(uuid::Uuid::parse_str(suffix).is_ok());
    }
}
