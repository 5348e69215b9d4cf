pub const TARGET_KIND_INTERFACE: u32 = 1;
pub const TARGET_KIND_SOCKET: u32 = 2;
pub const TARGET_KIND_BOUNCE: u32 = 3;
/// Reserved kind that turns a table entry into a block-list entry.
pub const TARGET_KIND_DENY: u32 = u32::MAX;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TargetKind {
    /// Egress interface, `index` is its ifindex.
    Interface,
    /// AF_XDP socket, `index` is its slot in `xsk_sockets`.
    Socket,
    /// Back out of the ingress interface.
    Bounce,
    Deny,
}

/// Where a redirected frame goes. Stored as the value of `redir_targets`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct RedirectTarget {
    pub kind: u32,
    pub index: u32,
}

impl RedirectTarget {
    pub const DENY: RedirectTarget = RedirectTarget {
        kind: TARGET_KIND_DENY,
        index: 0,
    };

    pub const fn interface(ifindex: u32) -> Self {
        Self {
            kind: TARGET_KIND_INTERFACE,
            index: ifindex,
        }
    }

    pub const fn socket(slot: u32) -> Self {
        Self {
            kind: TARGET_KIND_SOCKET,
            index: slot,
        }
    }

    pub const fn bounce() -> Self {
        Self {
            kind: TARGET_KIND_BOUNCE,
            index: 0,
        }
    }

    /// `None` for kinds this build does not know about.
    pub const fn kind(&self) -> Option<TargetKind> {
        match self.kind {
            TARGET_KIND_INTERFACE => Some(TargetKind::Interface),
            TARGET_KIND_SOCKET => Some(TargetKind::Socket),
            TARGET_KIND_BOUNCE => Some(TargetKind::Bounce),
            TARGET_KIND_DENY => Some(TargetKind::Deny),
            _ => None,
        }
    }

    pub const fn is_deny(&self) -> bool {
        self.kind == TARGET_KIND_DENY
    }
}

impl core::fmt::Display for RedirectTarget {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.kind() {
            Some(TargetKind::Interface) => write!(f, "interface:{}", self.index),
            Some(TargetKind::Socket) => write!(f, "socket:{}", self.index),
            Some(TargetKind::Bounce) => write!(f, "bounce"),
            Some(TargetKind::Deny) => write!(f, "deny"),
            None => write!(f, "unknown({}):{}", self.kind, self.index),
        }
    }
}
