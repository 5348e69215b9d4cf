use core::net::{Ipv4Addr, Ipv6Addr};

pub const FAMILY_NONE: u8 = 0;
pub const FAMILY_IPV4: u8 = 2;
pub const FAMILY_IPV6: u8 = 10;

/// Which frame fields take part in the redirect key.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum KeyMode {
    /// Ingress interface only.
    #[default]
    Interface = 0,
    /// Ingress interface and destination MAC.
    DestMac = 1,
    /// Ingress interface and the L3/L4 flow tuple.
    Flow = 2,
}

impl KeyMode {
    /// Unknown values fall back to `Interface`.
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => KeyMode::DestMac,
            2 => KeyMode::Flow,
            _ => KeyMode::Interface,
        }
    }
}

/// Lookup key for `redir_targets`.
///
/// Fields outside the active mode stay zero so equal frames always hash to the
/// same entry. Ports are in host order, addresses are wire octets (IPv4 uses
/// the first four bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct RedirectKey {
    pub ifindex: u32,
    pub mode: u8,
    pub family: u8,
    pub proto: u8,
    pub pad0: u8,
    pub src_port: u16,
    pub dst_port: u16,
    pub dst_mac: [u8; 6],
    pub pad1: [u8; 2],
    pub src_addr: [u8; 16],
    pub dst_addr: [u8; 16],
}

impl RedirectKey {
    pub const fn interface(ifindex: u32) -> Self {
        Self {
            ifindex,
            mode: KeyMode::Interface as u8,
            family: FAMILY_NONE,
            proto: 0,
            pad0: 0,
            src_port: 0,
            dst_port: 0,
            dst_mac: [0; 6],
            pad1: [0; 2],
            src_addr: [0; 16],
            dst_addr: [0; 16],
        }
    }

    pub const fn dest_mac(ifindex: u32, dst_mac: [u8; 6]) -> Self {
        let mut key = Self::interface(ifindex);
        key.mode = KeyMode::DestMac as u8;
        key.dst_mac = dst_mac;
        key
    }

    /// Flow key for a frame that is neither IPv4 nor IPv6.
    pub const fn l2_flow(ifindex: u32) -> Self {
        let mut key = Self::interface(ifindex);
        key.mode = KeyMode::Flow as u8;
        key
    }

    pub fn ipv4_flow(
        ifindex: u32,
        proto: u8,
        src: Ipv4Addr,
        src_port: u16,
        dst: Ipv4Addr,
        dst_port: u16,
    ) -> Self {
        let mut key = Self::l2_flow(ifindex);
        key.family = FAMILY_IPV4;
        key.proto = proto;
        key.src_port = src_port;
        key.dst_port = dst_port;
        key.src_addr[..4].copy_from_slice(&src.octets());
        key.dst_addr[..4].copy_from_slice(&dst.octets());
        key
    }

    pub fn ipv6_flow(
        ifindex: u32,
        proto: u8,
        src: Ipv6Addr,
        src_port: u16,
        dst: Ipv6Addr,
        dst_port: u16,
    ) -> Self {
        let mut key = Self::l2_flow(ifindex);
        key.family = FAMILY_IPV6;
        key.proto = proto;
        key.src_port = src_port;
        key.dst_port = dst_port;
        key.src_addr = src.octets();
        key.dst_addr = dst.octets();
        key
    }

    pub fn key_mode(&self) -> KeyMode {
        KeyMode::from_raw(self.mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_key_zeroes_other_fields() {
        let key = RedirectKey::interface(3);
        assert_eq!(key.ifindex, 3);
        assert_eq!(key.key_mode(), KeyMode::Interface);
        assert_eq!(key.dst_mac, [0; 6]);
        assert_eq!(key.src_addr, [0; 16]);
    }

    #[test]
    fn ipv4_flow_uses_leading_octets() {
        let key = RedirectKey::ipv4_flow(
            2,
            17,
            Ipv4Addr::new(10, 0, 0, 1),
            5353,
            Ipv4Addr::new(10, 0, 0, 2),
            53,
        );
        assert_eq!(key.family, FAMILY_IPV4);
        assert_eq!(&key.src_addr[..4], &[10, 0, 0, 1]);
        assert_eq!(&key.src_addr[4..], &[0; 12]);
        assert_eq!(key.dst_port, 53);
        assert_ne!(key, RedirectKey::l2_flow(2));
    }

    #[test]
    fn unknown_mode_falls_back_to_interface() {
        assert_eq!(KeyMode::from_raw(9), KeyMode::Interface);
        assert_eq!(KeyMode::from_raw(2), KeyMode::Flow);
    }
}
