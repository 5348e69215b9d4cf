use std::ffi::CString;
use std::net::IpAddr;

use anyhow::{Context, Result, anyhow, bail, ensure};

use xdp_redirect_common::{KeyMode, RedirectKey, RedirectTarget};

/// Resolves an interface name to its index. Plain numbers are taken as an
/// index already.
pub fn ifindex(iface: &str) -> Result<u32> {
    if let Ok(index) = iface.parse::<u32>() {
        ensure!(index > 0, "interface index must be greater than zero");
        return Ok(index);
    }
    let name = CString::new(iface).with_context(|| format!("invalid interface name {iface:?}"))?;
    let index = unsafe { libc::if_nametoindex(name.as_ptr()) };
    if index == 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("unknown interface {iface}"));
    }
    Ok(index)
}

/// Parses `interface:<iface>`, `socket:<slot>`, `bounce` or `deny`.
pub fn parse_target<F>(text: &str, resolve: F) -> Result<RedirectTarget>
where
    F: Fn(&str) -> Result<u32>,
{
    let (kind, arg) = match text.split_once(':') {
        Some((kind, arg)) => (kind.trim(), Some(arg.trim())),
        None => (text.trim(), None),
    };
    match (kind, arg) {
        ("interface" | "iface", Some(iface)) => Ok(RedirectTarget::interface(resolve(iface)?)),
        ("socket" | "xsk", Some(slot)) => {
            let slot = slot
                .parse::<u32>()
                .with_context(|| format!("invalid socket slot {slot:?}"))?;
            Ok(RedirectTarget::socket(slot))
        }
        ("bounce", None) => Ok(RedirectTarget::bounce()),
        ("deny" | "drop", None) => Ok(RedirectTarget::DENY),
        _ => bail!(
            "invalid target {text:?}, expected interface:<iface>, socket:<slot>, bounce or deny"
        ),
    }
}

pub fn parse_mac(s: &str) -> Result<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = s.split([':', '-']);
    for byte in mac.iter_mut() {
        let part = parts
            .next()
            .ok_or_else(|| anyhow!("MAC address {s:?} has fewer than six octets"))?;
        ensure!(part.len() == 2, "invalid octet {part:?} in MAC address {s:?}");
        *byte = u8::from_str_radix(part, 16)
            .with_context(|| format!("invalid octet {part:?} in MAC address {s:?}"))?;
    }
    ensure!(
        parts.next().is_none(),
        "MAC address {s:?} has more than six octets"
    );
    Ok(mac)
}

pub fn parse_proto(s: &str) -> Result<u8> {
    match s.to_ascii_lowercase().as_str() {
        "tcp" => Ok(6),
        "udp" => Ok(17),
        "sctp" => Ok(132),
        "icmp" => Ok(1),
        "icmpv6" => Ok(58),
        other => other
            .parse::<u8>()
            .with_context(|| format!("unknown protocol {s:?}")),
    }
}

/// Fields of a flow key as given on the command line.
#[derive(Clone, Debug)]
pub struct FlowTuple {
    pub proto: u8,
    pub src: IpAddr,
    pub src_port: u16,
    pub dst: IpAddr,
    pub dst_port: u16,
}

pub fn flow_key(ifindex: u32, flow: &FlowTuple) -> Result<RedirectKey> {
    match (flow.src, flow.dst) {
        (IpAddr::V4(src), IpAddr::V4(dst)) => Ok(RedirectKey::ipv4_flow(
            ifindex,
            flow.proto,
            src,
            flow.src_port,
            dst,
            flow.dst_port,
        )),
        (IpAddr::V6(src), IpAddr::V6(dst)) => Ok(RedirectKey::ipv6_flow(
            ifindex,
            flow.proto,
            src,
            flow.src_port,
            dst,
            flow.dst_port,
        )),
        _ => bail!("flow source and destination must be the same address family"),
    }
}

pub fn key_mode_name(mode: KeyMode) -> &'static str {
    match mode {
        KeyMode::Interface => "interface",
        KeyMode::DestMac => "dest-mac",
        KeyMode::Flow => "flow",
    }
}

/// Rejects keys the attached program can never build: it derives every key in
/// the single mode it was attached with.
pub fn ensure_key_mode(key: &RedirectKey, program_mode: KeyMode) -> Result<()> {
    let key_mode = key.key_mode();
    ensure!(
        key_mode == program_mode,
        "{} key never matches: the program runs in {} key mode",
        key_mode_name(key_mode),
        key_mode_name(program_mode)
    );
    Ok(())
}
