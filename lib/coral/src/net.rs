//! Address classification for observed-endpoint synthesis

use std::net::IpAddr;

/// Returns true when `ip` is not a usable public address claim: RFC 1918
/// (`10.0.0.0/8`, `172.16.0.0/12`, `192.168.0.0/16`), loopback (`127.0.0.0/8`,
/// `::1`), ULA (`fc00::/7`), or unparseable. The gateway substitutes the
/// transport-observed source IP for such claims.
pub fn is_private_address(ip: &str) -> bool {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.is_private() || v4.is_loopback(),
        Ok(IpAddr::V6(v6)) => v6.is_loopback() || (v6.octets()[0] & 0xfe) == 0xfc,
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc1918_ranges_are_private() {
        for ip in [
            "10.0.0.0",
            "10.255.255.255",
            "10.42.0.1",
            "172.16.0.0",
            "172.31.255.255",
            "172.20.1.2",
            "192.168.0.0",
            "192.168.255.255",
            "192.168.1.5",
        ] {
            assert!(is_private_address(ip), "{ip} should be private");
        }
    }

    #[test]
    fn test_loopback_is_private() {
        assert!(is_private_address("127.0.0.1"));
        assert!(is_private_address("127.255.0.3"));
        assert!(is_private_address("::1"));
    }

    #[test]
    fn test_ula_is_private() {
        assert!(is_private_address("fc00::1"));
        assert!(is_private_address("fd12:3456:789a::1"));
    }

    #[test]
    fn test_public_addresses() {
        for ip in [
            "1.2.3.4",
            "8.8.8.8",
            "172.15.255.255",
            "172.32.0.0",
            "9.255.255.255",
            "11.0.0.0",
            "192.167.255.255",
            "192.169.0.0",
            "203.0.113.9",
            "2001:db8::1",
            "fe80::1",
        ] {
            assert!(!is_private_address(ip), "{ip} should be public");
        }
    }

    #[test]
    fn test_garbage_treated_as_private() {
        assert!(is_private_address(""));
        assert!(is_private_address("not-an-ip"));
        assert!(is_private_address("300.1.1.1"));
    }
}
