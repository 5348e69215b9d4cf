#![no_std]
#![no_main]

use aya_ebpf::bindings::xdp_action;
use aya_ebpf::helpers::bpf_redirect;
use aya_ebpf::macros::xdp;
use aya_ebpf::programs::XdpContext;
use aya_log_ebpf::debug;
use xdp_redirect_common::{
    Counter, CounterSink, FrameView, Outcome, PROGRAM_LICENSE, RedirectTarget, TargetKind,
    process_frame,
};

mod maps;

use maps::{KernelTable, PerCpuCounters, XSK_SOCKETS};

#[unsafe(link_section = "license")]
#[unsafe(no_mangle)]
static LICENSE: [u8; 4] = *PROGRAM_LICENSE;

/// Frame view over the XDP receive buffer. Each load re-checks against
/// `data_end` right before dereferencing, which is what the verifier tracks.
struct XdpFrame<'a> {
    ctx: &'a XdpContext,
}

impl FrameView for XdpFrame<'_> {
    #[inline(always)]
    fn len(&self) -> usize {
        self.ctx.data_end().saturating_sub(self.ctx.data())
    }

    #[inline(always)]
    fn ingress_ifindex(&self) -> u32 {
        unsafe { (*self.ctx.ctx).ingress_ifindex }
    }

    #[inline(always)]
    fn load<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        let start = self.ctx.data();
        let end = self.ctx.data_end();
        if start + offset + N > end {
            return None;
        }
        let ptr = (start + offset) as *const [u8; N];
        Some(unsafe { core::ptr::read_unaligned(ptr) })
    }
}

#[xdp]
pub fn xdp_redirect(ctx: XdpContext) -> u32 {
    let frame = XdpFrame { ctx: &ctx };
    match process_frame(&frame, maps::key_mode(), &KernelTable, &PerCpuCounters) {
        Outcome::Pass => xdp_action::XDP_PASS,
        Outcome::Drop => xdp_action::XDP_DROP,
        Outcome::Redirect(target) => redirect(&ctx, target),
    }
}

#[inline(always)]
fn redirect(ctx: &XdpContext, target: RedirectTarget) -> u32 {
    match target.kind() {
        Some(TargetKind::Interface) => unsafe { bpf_redirect(target.index, 0) as u32 },
        Some(TargetKind::Socket) => {
            match XSK_SOCKETS.redirect(target.index, xdp_action::XDP_PASS as u64) {
                Ok(action) => action,
                Err(fallback) => {
                    PerCpuCounters.increment(Counter::RedirectFailed);
                    debug!(ctx, "xsk slot {} empty, passing frame", target.index);
                    fallback
                }
            }
        }
        Some(TargetKind::Bounce) => xdp_action::XDP_TX,
        Some(TargetKind::Deny) | None => xdp_action::XDP_PASS,
    }
}

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
