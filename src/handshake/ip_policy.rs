//! Screening of the tunnel address a client claims in its hello.
//!
//! A pure predicate applied while parsing ClientHello. The default
//! policy admits both address families but requires a private-range
//! address and forbids every special-purpose class.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::core::IpPolicyError;

/// Which tunnel addresses a server accepts at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpPolicy {
    /// Accept IPv4 tunnel addresses.
    pub allow_v4: bool,
    /// Accept IPv6 tunnel addresses.
    pub allow_v6: bool,
    /// Require RFC 1918 (v4) or ULA `fc00::/7` (v6) addresses.
    pub require_private: bool,
    /// Reject loopback addresses.
    pub forbid_loopback: bool,
    /// Reject multicast addresses.
    pub forbid_multicast: bool,
    /// Reject the unspecified address.
    pub forbid_unspecified: bool,
    /// Reject `169.254/16` and `fe80::/10`.
    pub forbid_link_local: bool,
    /// Reject `255.255.255.255`.
    pub forbid_broadcast_v4: bool,
}

impl Default for IpPolicy {
    fn default() -> Self {
        Self {
            allow_v4: true,
            allow_v6: true,
            require_private: true,
            forbid_loopback: true,
            forbid_multicast: true,
            forbid_unspecified: true,
            forbid_link_local: true,
            forbid_broadcast_v4: true,
        }
    }
}

impl IpPolicy {
    /// A policy that admits any well-formed address. Test use mostly.
    pub fn permissive() -> Self {
        Self {
            allow_v4: true,
            allow_v6: true,
            require_private: false,
            forbid_loopback: false,
            forbid_multicast: false,
            forbid_unspecified: false,
            forbid_link_local: false,
            forbid_broadcast_v4: false,
        }
    }

    /// Apply every enabled check in the fixed order; the first failure
    /// wins.
    pub fn validate(&self, ip: &IpAddr) -> Result<(), IpPolicyError> {
        match ip {
            IpAddr::V4(v4) => self.validate_v4(v4),
            IpAddr::V6(v6) => self.validate_v6(v6),
        }
    }

    fn validate_v4(&self, ip: &Ipv4Addr) -> Result<(), IpPolicyError> {
        if !self.allow_v4 {
            return Err(IpPolicyError::VersionNotAllowed);
        }
        if self.forbid_loopback && ip.is_loopback() {
            return Err(IpPolicyError::Loopback);
        }
        if self.forbid_multicast && ip.is_multicast() {
            return Err(IpPolicyError::Multicast);
        }
        if self.forbid_unspecified && ip.is_unspecified() {
            return Err(IpPolicyError::Unspecified);
        }
        if self.forbid_link_local && ip.is_link_local() {
            return Err(IpPolicyError::LinkLocal);
        }
        if self.forbid_broadcast_v4 && ip.is_broadcast() {
            return Err(IpPolicyError::BroadcastV4);
        }
        if self.require_private && !ip.is_private() {
            return Err(IpPolicyError::NotPrivate);
        }
        Ok(())
    }

    fn validate_v6(&self, ip: &Ipv6Addr) -> Result<(), IpPolicyError> {
        if !self.allow_v6 {
            return Err(IpPolicyError::VersionNotAllowed);
        }
        if self.forbid_loopback && ip.is_loopback() {
            return Err(IpPolicyError::Loopback);
        }
        if self.forbid_multicast && ip.is_multicast() {
            return Err(IpPolicyError::Multicast);
        }
        if self.forbid_unspecified && ip.is_unspecified() {
            return Err(IpPolicyError::Unspecified);
        }
        if self.forbid_link_local && is_link_local_v6(ip) {
            return Err(IpPolicyError::LinkLocal);
        }
        if self.require_private && !is_unique_local_v6(ip) {
            return Err(IpPolicyError::NotPrivate);
        }
        Ok(())
    }
}

/// `fe80::/10`.
fn is_link_local_v6(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xffc0) == 0xfe80
}

/// ULA `fc00::/7`.
fn is_unique_local_v6(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xfe00) == 0xfc00
}

/// Canonicalize raw address bytes: 4 bytes -> v4, 16 bytes -> v6 with
/// 4-in-6 mapped back to v4, anything else rejected.
pub fn normalize_ip(bytes: &[u8]) -> Result<IpAddr, IpPolicyError> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().map_err(|_| IpPolicyError::InvalidLength(bytes.len()))?;
            Ok(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().map_err(|_| IpPolicyError::InvalidLength(bytes.len()))?;
            let v6 = Ipv6Addr::from(octets);
            match v6.to_ipv4_mapped() {
                Some(v4) => Ok(IpAddr::V4(v4)),
                None => Ok(IpAddr::V6(v6)),
            }
        }
        other => Err(IpPolicyError::InvalidLength(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v4(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_default_accepts_private_v4() {
        let policy = IpPolicy::default();
        assert!(policy.validate(&v4("10.0.0.5")).is_ok());
        assert!(policy.validate(&v4("192.168.1.20")).is_ok());
        assert!(policy.validate(&v4("172.16.9.1")).is_ok());
    }

    #[test]
    fn test_default_rejects_special_v4() {
        let policy = IpPolicy::default();
        assert_eq!(policy.validate(&v4("127.0.0.1")), Err(IpPolicyError::Loopback));
        assert_eq!(policy.validate(&v4("224.0.0.1")), Err(IpPolicyError::Multicast));
        assert_eq!(policy.validate(&v4("0.0.0.0")), Err(IpPolicyError::Unspecified));
        assert_eq!(
            policy.validate(&v4("169.254.10.1")),
            Err(IpPolicyError::LinkLocal)
        );
        assert_eq!(
            policy.validate(&v4("255.255.255.255")),
            Err(IpPolicyError::BroadcastV4)
        );
        assert_eq!(policy.validate(&v4("8.8.8.8")), Err(IpPolicyError::NotPrivate));
    }

    #[test]
    fn test_default_v6() {
        let policy = IpPolicy::default();
        assert!(policy.validate(&"fd00::1".parse().unwrap()).is_ok());
        assert_eq!(
            policy.validate(&"::1".parse().unwrap()),
            Err(IpPolicyError::Loopback)
        );
        assert_eq!(
            policy.validate(&"fe80::1".parse().unwrap()),
            Err(IpPolicyError::LinkLocal)
        );
        assert_eq!(
            policy.validate(&"2001:db8::1".parse().unwrap()),
            Err(IpPolicyError::NotPrivate)
        );
    }

    #[test]
    fn test_version_gates_apply_first() {
        let policy = IpPolicy {
            allow_v4: false,
            ..IpPolicy::default()
        };
        // Loopback would also fail, but the version gate wins.
        assert_eq!(
            policy.validate(&v4("127.0.0.1")),
            Err(IpPolicyError::VersionNotAllowed)
        );

        let policy = IpPolicy {
            allow_v6: false,
            ..IpPolicy::default()
        };
        assert_eq!(
            policy.validate(&"::1".parse().unwrap()),
            Err(IpPolicyError::VersionNotAllowed)
        );
    }

    #[test]
    fn test_permissive_accepts_everything_well_formed() {
        let policy = IpPolicy::permissive();
        for addr in ["127.0.0.1", "8.8.8.8", "0.0.0.0", "255.255.255.255"] {
            assert!(policy.validate(&v4(addr)).is_ok());
        }
    }

    #[test]
    fn test_normalize_lengths() {
        assert_eq!(normalize_ip(&[10, 0, 0, 2]).unwrap(), v4("10.0.0.2"));
        assert!(matches!(
            normalize_ip(&[1, 2, 3]),
            Err(IpPolicyError::InvalidLength(3))
        ));
        assert!(matches!(
            normalize_ip(&[0u8; 5]),
            Err(IpPolicyError::InvalidLength(5))
        ));
    }

    #[test]
    fn test_normalize_maps_4_in_6() {
        let mapped: Ipv6Addr = "::ffff:10.0.0.7".parse().unwrap();
        assert_eq!(normalize_ip(&mapped.octets()).unwrap(), v4("10.0.0.7"));

        let plain: Ipv6Addr = "fd00::7".parse().unwrap();
        assert_eq!(
            normalize_ip(&plain.octets()).unwrap(),
            IpAddr::V6("fd00::7".parse().unwrap())
        );
    }
}
