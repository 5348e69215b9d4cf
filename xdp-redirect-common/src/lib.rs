#![no_std]

// Redirect core shared between the XDP program and the userspace agent.
// Keep this crate `no_std` friendly so it can be used from eBPF code.

pub mod classify;
pub mod decision;
pub mod frame;
pub mod key;
pub mod target;

pub use classify::{Classification, classify};
pub use decision::{
    COUNTER_SLOTS, Counter, CounterSink, Decision, Outcome, TargetLookup, XdpAction, decide,
    process_frame,
};
pub use frame::{FrameView, SliceFrame};
pub use key::{KeyMode, RedirectKey};
pub use target::{RedirectTarget, TargetKind};

pub const MAP_REDIRECT_TARGETS: &str = "redir_targets";
pub const MAP_REDIRECT_COUNTERS: &str = "redir_counters";
pub const MAP_REDIRECT_CONTROL: &str = "redir_control";
pub const MAP_XSK_SOCKETS: &str = "xsk_sockets";
pub const XDP_PROGRAM: &str = "xdp_redirect";

pub const CONTROL_SLOT_RUNTIME: u32 = 0;
pub const DEFAULT_TABLE_CAPACITY: u32 = 4096;
pub const DEFAULT_SOCKET_SLOTS: u32 = 64;

/// License declared in the program's `license` section, NUL terminated.
///
/// The kernel only grants the redirect helpers to GPL-compatible programs, and
/// the loader refuses objects whose declaration differs from this one.
pub const PROGRAM_LICENSE: &[u8; 4] = b"GPL\0";

/// Runtime knobs written by the control plane into slot 0 of `redir_control`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ControlConfig {
    pub key_mode: u8,
    pub reserved: [u8; 7],
    pub table_capacity: u32,
    pub pad: u32,
}

impl ControlConfig {
    pub fn new(key_mode: KeyMode, table_capacity: u32) -> Self {
        Self {
            key_mode: key_mode as u8,
            reserved: [0; 7],
            table_capacity,
            pad: 0,
        }
    }

    pub fn key_mode(&self) -> KeyMode {
        KeyMode::from_raw(self.key_mode)
    }
}

// When compiled for userspace with the `user` feature enabled the crate
// exposes an implementation of `aya::Pod` for the map key and value types.
#[cfg(feature = "user")]
mod user_impls {
    extern crate aya;

    use super::{ControlConfig, RedirectKey, RedirectTarget};
    use aya::Pod;

    unsafe impl Pod for RedirectKey {}
    unsafe impl Pod for RedirectTarget {}
    unsafe impl Pod for ControlConfig {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::size_of;

    #[test]
    fn map_layouts_have_no_implicit_padding() {
        assert_eq!(size_of::<RedirectKey>(), 52);
        assert_eq!(size_of::<RedirectTarget>(), 8);
        assert_eq!(size_of::<ControlConfig>(), 16);
    }

    #[test]
    fn map_names_fit_kernel_object_names() {
        for name in [
            MAP_REDIRECT_TARGETS,
            MAP_REDIRECT_COUNTERS,
            MAP_REDIRECT_CONTROL,
            MAP_XSK_SOCKETS,
        ] {
            assert!(name.len() < 16, "{name} would be truncated");
        }
    }

    #[test]
    fn control_config_round_trips_key_mode() {
        let cfg = ControlConfig::new(KeyMode::Flow, 128);
        assert_eq!(cfg.key_mode(), KeyMode::Flow);
        assert_eq!(cfg.table_capacity, 128);
        assert_eq!(ControlConfig::default().key_mode(), KeyMode::Interface);
    }
}
