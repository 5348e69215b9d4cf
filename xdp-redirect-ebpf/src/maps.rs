// Kernel-resident state shared with the userspace agent. Names and layouts
// come from `xdp_redirect_common`; the agent resolves the maps by name and
// pins them under /sys/fs/bpf/xdp_redirect.

use aya_ebpf::macros::map;
use aya_ebpf::maps::{Array, HashMap, PerCpuArray, XskMap};
use xdp_redirect_common::{
    COUNTER_SLOTS, CONTROL_SLOT_RUNTIME, ControlConfig, Counter, CounterSink,
    DEFAULT_SOCKET_SLOTS, DEFAULT_TABLE_CAPACITY, KeyMode, RedirectKey, RedirectTarget,
    TargetLookup,
};

// Capacity is overridden by the loader before the object is created.
#[map(name = "redir_targets")]
pub static REDIRECT_TARGETS: HashMap<RedirectKey, RedirectTarget> =
    HashMap::<RedirectKey, RedirectTarget>::with_max_entries(DEFAULT_TABLE_CAPACITY, 0);

#[map(name = "redir_counters")]
pub static REDIRECT_COUNTERS: PerCpuArray<u64> =
    PerCpuArray::<u64>::with_max_entries(COUNTER_SLOTS, 0);

#[map(name = "redir_control")]
pub static REDIRECT_CONTROL: Array<ControlConfig> = Array::<ControlConfig>::with_max_entries(1, 0);

// Slots are filled by whichever AF_XDP application owns the sockets.
#[map(name = "xsk_sockets")]
pub static XSK_SOCKETS: XskMap = XskMap::with_max_entries(DEFAULT_SOCKET_SLOTS, 0);

pub struct KernelTable;

impl TargetLookup for KernelTable {
    #[inline(always)]
    fn lookup(&self, key: &RedirectKey) -> Option<RedirectTarget> {
        // Hash map updates swap whole elements, so the copy is never torn.
        unsafe { REDIRECT_TARGETS.get(key) }.copied()
    }
}

pub struct PerCpuCounters;

impl CounterSink for PerCpuCounters {
    #[inline(always)]
    fn increment(&self, counter: Counter) {
        if let Some(ptr) = REDIRECT_COUNTERS.get_ptr_mut(counter.slot()) {
            unsafe {
                *ptr = (*ptr).wrapping_add(1);
            }
        }
    }
}

#[inline(always)]
pub fn key_mode() -> KeyMode {
    match REDIRECT_CONTROL.get_ptr(CONTROL_SLOT_RUNTIME) {
        Some(ptr) => unsafe { (*ptr).key_mode() },
        None => KeyMode::Interface,
    }
}
