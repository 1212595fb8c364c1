//! IP anonymization and salted hashing.
//!
//! Raw addresses never reach storage: what persists is a salted SHA-256 of
//! the (optionally truncated) address. A missing or placeholder salt is a
//! configuration error, not a silent fallback to unsalted hashing.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use sha2::{Digest, Sha256};

use crate::config::AnalyticsSettings;
use crate::storage::StorageError;

/// Truncate to the network prefix: /24 for IPv4, /48 for IPv6.
pub fn anonymize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(addr) => {
            let o = addr.octets();
            IpAddr::V4(Ipv4Addr::new(o[0], o[1], o[2], 0))
        }
        IpAddr::V6(addr) => {
            let s = addr.segments();
            IpAddr::V6(Ipv6Addr::new(s[0], s[1], s[2], 0, 0, 0, 0, 0))
        }
    }
}

/// The configured salt, or a configuration error when it is unset, empty, or
/// still an unexpanded `$VARIABLE` placeholder.
pub fn require_salt(settings: &AnalyticsSettings) -> Result<&str, StorageError> {
    match settings.ip_hash_salt.as_deref() {
        Some(salt) if !salt.trim().is_empty() && !salt.starts_with('$') => Ok(salt),
        Some(salt) if salt.starts_with('$') => Err(StorageError::Configuration(format!(
            "analytics.ip_hash_salt looks like an unexpanded placeholder ({salt})"
        ))),
        _ => Err(StorageError::Configuration(
            "analytics.ip_hash_salt is not set; refusing to hash visitor IPs".to_string(),
        )),
    }
}

/// Hex-encoded `SHA-256(ip || salt)`.
pub fn hash_ip(ip: IpAddr, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ip.to_string().as_bytes());
    hasher.update(salt.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymize_truncates_v4_to_slash_24() {
        let ip: IpAddr = "192.168.1.100".parse().unwrap();
        assert_eq!(anonymize_ip(ip), "192.168.1.0".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn anonymize_truncates_v6_to_slash_48() {
        let ip: IpAddr = "2001:db8:abcd:1234::5678".parse().unwrap();
        assert_eq!(anonymize_ip(ip), "2001:db8:abcd::".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn hashing_is_salted_and_deterministic() {
        let ip: IpAddr = "203.0.113.7".parse().unwrap();
        let a = hash_ip(ip, "salt-one");
        let b = hash_ip(ip, "salt-one");
        let c = hash_ip(ip, "salt-two");

        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn digest_covers_ip_then_salt() {
        let ip: IpAddr = "203.0.113.7".parse().unwrap();
        assert_eq!(
            hash_ip(ip, "pepper"),
            "87c70c102853e437b09965cf06024fbb539ca825f132d5ee4bc7cad9537c40d5"
        );
    }

    #[test]
    fn missing_or_placeholder_salt_is_rejected() {
        let mut settings = AnalyticsSettings::default();
        assert!(require_salt(&settings).is_err());

        settings.ip_hash_salt = Some("  ".to_string());
        assert!(require_salt(&settings).is_err());

        settings.ip_hash_salt = Some("$IP_HASH_SALT".to_string());
        assert!(require_salt(&settings).is_err());

        settings.ip_hash_salt = Some("an-actual-salt-value".to_string());
        assert!(require_salt(&settings).is_ok());
    }
}
