use crate::frame::FrameView;
use crate::key::{FAMILY_IPV4, FAMILY_IPV6, KeyMode, RedirectKey};

pub const ETH_HDR_LEN: usize = 14;
pub const VLAN_HDR_LEN: usize = 4;
pub const IPV4_MIN_HDR_LEN: usize = 20;
pub const IPV6_HDR_LEN: usize = 40;

/// Upper bound on stacked 802.1Q/802.1ad tags walked before giving up on L3.
pub const MAX_VLAN_DEPTH: usize = 2;

const ETH_TYPE_OFFSET: usize = 12;
const ETH_P_IPV4: u16 = 0x0800;
const ETH_P_IPV6: u16 = 0x86DD;
const ETH_P_8021Q: u16 = 0x8100;
const ETH_P_8021AD: u16 = 0x88A8;

const PROTO_TCP: u8 = 6;
const PROTO_UDP: u8 = 17;
const PROTO_SCTP: u8 = 132;

const IPV4_FRAG_OFFSET_MASK: u16 = 0x1fff;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Classification {
    Key(RedirectKey),
    /// The frame is too short or its headers are inconsistent with its length.
    Malformed,
}

impl Classification {
    pub fn key(&self) -> Option<&RedirectKey> {
        match self {
            Classification::Key(key) => Some(key),
            Classification::Malformed => None,
        }
    }
}

/// Derives the lookup key for `frame` under `mode`.
///
/// Total and side-effect free: every frame yields a key or `Malformed`, and no
/// byte past the captured length is ever read.
#[inline(always)]
pub fn classify<F: FrameView>(frame: &F, mode: KeyMode) -> Classification {
    if frame.len() < ETH_HDR_LEN {
        return Classification::Malformed;
    }

    let ifindex = frame.ingress_ifindex();
    let key = match mode {
        KeyMode::Interface => Some(RedirectKey::interface(ifindex)),
        KeyMode::DestMac => frame
            .load::<6>(0)
            .map(|mac| RedirectKey::dest_mac(ifindex, mac)),
        KeyMode::Flow => flow_key(frame, ifindex),
    };

    match key {
        Some(key) => Classification::Key(key),
        None => Classification::Malformed,
    }
}

#[inline(always)]
fn flow_key<F: FrameView>(frame: &F, ifindex: u32) -> Option<RedirectKey> {
    let mut key = RedirectKey::l2_flow(ifindex);
    let mut offset = ETH_HDR_LEN;
    let mut ether_type = frame.load_be16(ETH_TYPE_OFFSET)?;

    for _ in 0..MAX_VLAN_DEPTH {
        if ether_type != ETH_P_8021Q && ether_type != ETH_P_8021AD {
            break;
        }
        // tag: TCI(2) + encapsulated ether type(2)
        ether_type = frame.load_be16(offset + 2)?;
        offset += VLAN_HDR_LEN;
    }

    match ether_type {
        ETH_P_IPV4 => fill_ipv4(frame, offset, &mut key)?,
        ETH_P_IPV6 => fill_ipv6(frame, offset, &mut key)?,
        _ => {}
    }
    Some(key)
}

#[inline(always)]
fn fill_ipv4<F: FrameView>(frame: &F, offset: usize, key: &mut RedirectKey) -> Option<()> {
    let [version_ihl] = frame.load::<1>(offset)?;
    if version_ihl >> 4 != 4 {
        return None;
    }
    let ihl_words = (version_ihl & 0x0f) as usize;
    if ihl_words < 5 {
        return None;
    }
    let header_len = ihl_words * 4;
    if offset + header_len > frame.len() {
        return None;
    }

    let frag = frame.load_be16(offset + 6)?;
    let [proto] = frame.load::<1>(offset + 9)?;
    let src = frame.load::<4>(offset + 12)?;
    let dst = frame.load::<4>(offset + 16)?;

    key.family = FAMILY_IPV4;
    key.proto = proto;
    key.src_addr[..4].copy_from_slice(&src);
    key.dst_addr[..4].copy_from_slice(&dst);

    // Only the first fragment carries the L4 header.
    if frag & IPV4_FRAG_OFFSET_MASK == 0 && carries_ports(proto) {
        fill_ports(frame, offset + header_len, key)?;
    }
    Some(())
}

#[inline(always)]
fn fill_ipv6<F: FrameView>(frame: &F, offset: usize, key: &mut RedirectKey) -> Option<()> {
    if offset + IPV6_HDR_LEN > frame.len() {
        return None;
    }
    let [version] = frame.load::<1>(offset)?;
    if version >> 4 != 6 {
        return None;
    }
    let [next_header] = frame.load::<1>(offset + 6)?;
    key.family = FAMILY_IPV6;
    key.proto = next_header;
    key.src_addr = frame.load::<16>(offset + 8)?;
    key.dst_addr = frame.load::<16>(offset + 24)?;

    // Extension headers are not walked.
    if carries_ports(next_header) {
        fill_ports(frame, offset + IPV6_HDR_LEN, key)?;
    }
    Some(())
}

#[inline(always)]
fn fill_ports<F: FrameView>(frame: &F, offset: usize, key: &mut RedirectKey) -> Option<()> {
    key.src_port = frame.load_be16(offset)?;
    key.dst_port = frame.load_be16(offset + 2)?;
    Some(())
}

#[inline(always)]
fn carries_ports(proto: u8) -> bool {
    proto == PROTO_TCP || proto == PROTO_UDP || proto == PROTO_SCTP
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::SliceFrame;
    use core::net::{Ipv4Addr, Ipv6Addr};

    const IFINDEX: u32 = 2;
    const DST_MAC: [u8; 6] = [0x02, 0, 0, 0, 0, 0x01];

    fn eth(buf: &mut [u8], ether_type: u16) -> usize {
        buf[..6].copy_from_slice(&DST_MAC);
        buf[6..12].copy_from_slice(&[0x02, 0, 0, 0, 0, 0x02]);
        buf[12..14].copy_from_slice(&ether_type.to_be_bytes());
        ETH_HDR_LEN
    }

    fn ipv4_udp(buf: &mut [u8], at: usize, ihl: u8, frag: u16) -> usize {
        buf[at] = 0x40 | ihl;
        buf[at + 6..at + 8].copy_from_slice(&frag.to_be_bytes());
        buf[at + 9] = PROTO_UDP;
        buf[at + 12..at + 16].copy_from_slice(&[192, 168, 1, 10]);
        buf[at + 16..at + 20].copy_from_slice(&[192, 168, 1, 20]);
        let l4 = at + ihl as usize * 4;
        buf[l4..l4 + 2].copy_from_slice(&40000u16.to_be_bytes());
        buf[l4 + 2..l4 + 4].copy_from_slice(&53u16.to_be_bytes());
        l4 + 8
    }

    fn expected_v4(src_port: u16, dst_port: u16) -> RedirectKey {
        RedirectKey::ipv4_flow(
            IFINDEX,
            PROTO_UDP,
            Ipv4Addr::new(192, 168, 1, 10),
            src_port,
            Ipv4Addr::new(192, 168, 1, 20),
            dst_port,
        )
    }

    #[test]
    fn short_frames_are_malformed_in_every_mode() {
        let buf = [0u8; ETH_HDR_LEN - 1];
        for len in 0..=buf.len() {
            let frame = SliceFrame::new(&buf[..len], IFINDEX);
            for mode in [KeyMode::Interface, KeyMode::DestMac, KeyMode::Flow] {
                assert_eq!(classify(&frame, mode), Classification::Malformed);
            }
        }
    }

    #[test]
    fn interface_mode_uses_ingress_only() {
        let mut buf = [0u8; 60];
        eth(&mut buf, ETH_P_IPV4);
        let frame = SliceFrame::new(&buf, IFINDEX);
        assert_eq!(
            classify(&frame, KeyMode::Interface),
            Classification::Key(RedirectKey::interface(IFINDEX))
        );
    }

    #[test]
    fn dest_mac_mode_reads_destination() {
        let mut buf = [0u8; ETH_HDR_LEN];
        eth(&mut buf, 0x0806);
        let frame = SliceFrame::new(&buf, IFINDEX);
        assert_eq!(
            classify(&frame, KeyMode::DestMac),
            Classification::Key(RedirectKey::dest_mac(IFINDEX, DST_MAC))
        );
    }

    #[test]
    fn flow_mode_ipv4_udp() {
        let mut buf = [0u8; 64];
        let at = eth(&mut buf, ETH_P_IPV4);
        let end = ipv4_udp(&mut buf, at, 5, 0);
        let frame = SliceFrame::new(&buf[..end], IFINDEX);
        assert_eq!(
            classify(&frame, KeyMode::Flow),
            Classification::Key(expected_v4(40000, 53))
        );
    }

    #[test]
    fn flow_mode_honours_ipv4_options() {
        let mut buf = [0u8; 80];
        let at = eth(&mut buf, ETH_P_IPV4);
        let end = ipv4_udp(&mut buf, at, 7, 0);
        let frame = SliceFrame::new(&buf[..end], IFINDEX);
        assert_eq!(
            classify(&frame, KeyMode::Flow),
            Classification::Key(expected_v4(40000, 53))
        );
    }

    #[test]
    fn flow_mode_rejects_ihl_beyond_frame() {
        let mut buf = [0u8; 64];
        let at = eth(&mut buf, ETH_P_IPV4);
        ipv4_udp(&mut buf, at, 5, 0);
        buf[at] = 0x4f; // claims 60 bytes of header
        let frame = SliceFrame::new(&buf[..at + 40], IFINDEX);
        assert_eq!(classify(&frame, KeyMode::Flow), Classification::Malformed);
    }

    #[test]
    fn flow_mode_rejects_bad_version_and_short_ihl() {
        let mut buf = [0u8; 64];
        let at = eth(&mut buf, ETH_P_IPV4);
        ipv4_udp(&mut buf, at, 5, 0);
        buf[at] = 0x65;
        assert_eq!(
            classify(&SliceFrame::new(&buf, IFINDEX), KeyMode::Flow),
            Classification::Malformed
        );
        buf[at] = 0x44;
        assert_eq!(
            classify(&SliceFrame::new(&buf, IFINDEX), KeyMode::Flow),
            Classification::Malformed
        );
    }

    #[test]
    fn flow_mode_truncated_ports_are_malformed() {
        let mut buf = [0u8; 64];
        let at = eth(&mut buf, ETH_P_IPV4);
        ipv4_udp(&mut buf, at, 5, 0);
        let frame = SliceFrame::new(&buf[..at + IPV4_MIN_HDR_LEN + 3], IFINDEX);
        assert_eq!(classify(&frame, KeyMode::Flow), Classification::Malformed);
    }

    #[test]
    fn flow_mode_skips_ports_of_later_fragments() {
        let mut buf = [0u8; 64];
        let at = eth(&mut buf, ETH_P_IPV4);
        ipv4_udp(&mut buf, at, 5, 0x0010);
        let frame = SliceFrame::new(&buf[..at + IPV4_MIN_HDR_LEN], IFINDEX);
        assert_eq!(
            classify(&frame, KeyMode::Flow),
            Classification::Key(expected_v4(0, 0))
        );
    }

    #[test]
    fn flow_mode_walks_vlan_tags() {
        let mut buf = [0u8; 80];
        eth(&mut buf, ETH_P_8021AD);
        buf[16..18].copy_from_slice(&ETH_P_8021Q.to_be_bytes());
        buf[20..22].copy_from_slice(&ETH_P_IPV4.to_be_bytes());
        let end = ipv4_udp(&mut buf, ETH_HDR_LEN + 2 * VLAN_HDR_LEN, 5, 0);
        let frame = SliceFrame::new(&buf[..end], IFINDEX);
        assert_eq!(
            classify(&frame, KeyMode::Flow),
            Classification::Key(expected_v4(40000, 53))
        );
    }

    #[test]
    fn flow_mode_stops_after_max_vlan_depth() {
        let mut buf = [0u8; 80];
        eth(&mut buf, ETH_P_8021Q);
        buf[16..18].copy_from_slice(&ETH_P_8021Q.to_be_bytes());
        buf[20..22].copy_from_slice(&ETH_P_8021Q.to_be_bytes());
        buf[24..26].copy_from_slice(&ETH_P_IPV4.to_be_bytes());
        let frame = SliceFrame::new(&buf, IFINDEX);
        assert_eq!(
            classify(&frame, KeyMode::Flow),
            Classification::Key(RedirectKey::l2_flow(IFINDEX))
        );
    }

    #[test]
    fn flow_mode_truncated_vlan_tag_is_malformed() {
        let mut buf = [0u8; 16];
        eth(&mut buf, ETH_P_8021Q);
        let frame = SliceFrame::new(&buf[..16], IFINDEX);
        assert_eq!(classify(&frame, KeyMode::Flow), Classification::Malformed);
    }

    #[test]
    fn flow_mode_ipv6_tcp() {
        let mut buf = [0u8; 80];
        let at = eth(&mut buf, ETH_P_IPV6);
        let src = Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 1);
        let dst = Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 2);
        buf[at] = 0x60;
        buf[at + 6] = PROTO_TCP;
        buf[at + 8..at + 24].copy_from_slice(&src.octets());
        buf[at + 24..at + 40].copy_from_slice(&dst.octets());
        let l4 = at + IPV6_HDR_LEN;
        buf[l4..l4 + 2].copy_from_slice(&443u16.to_be_bytes());
        buf[l4 + 2..l4 + 4].copy_from_slice(&51000u16.to_be_bytes());
        let frame = SliceFrame::new(&buf[..l4 + 20], IFINDEX);
        assert_eq!(
            classify(&frame, KeyMode::Flow),
            Classification::Key(RedirectKey::ipv6_flow(
                IFINDEX, PROTO_TCP, src, 443, dst, 51000
            ))
        );
    }

    #[test]
    fn flow_mode_truncated_ipv6_is_malformed() {
        let mut buf = [0u8; 50];
        let at = eth(&mut buf, ETH_P_IPV6);
        buf[at] = 0x60;
        let frame = SliceFrame::new(&buf, IFINDEX);
        assert_eq!(classify(&frame, KeyMode::Flow), Classification::Malformed);
    }

    #[test]
    fn flow_mode_non_ip_is_l2_key() {
        let mut buf = [0u8; 42];
        eth(&mut buf, 0x0806);
        let frame = SliceFrame::new(&buf, IFINDEX);
        assert_eq!(
            classify(&frame, KeyMode::Flow),
            Classification::Key(RedirectKey::l2_flow(IFINDEX))
        );
    }
}
