use crate::classify::{Classification, classify};
use crate::frame::FrameView;
use crate::key::{KeyMode, RedirectKey};
use crate::target::{RedirectTarget, TargetKind};

/// Read side of the redirect table, the only table operation the hot path uses.
pub trait TargetLookup {
    fn lookup(&self, key: &RedirectKey) -> Option<RedirectTarget>;
}

impl<T: TargetLookup + ?Sized> TargetLookup for &T {
    #[inline(always)]
    fn lookup(&self, key: &RedirectKey) -> Option<RedirectTarget> {
        (**self).lookup(key)
    }
}

/// Shared counter set updated once or twice per invocation.
pub trait CounterSink {
    fn increment(&self, counter: Counter);
}

impl<C: CounterSink + ?Sized> CounterSink for &C {
    #[inline(always)]
    fn increment(&self, counter: Counter) {
        (**self).increment(counter)
    }
}

pub const COUNTER_SLOTS: u32 = 7;

/// Slots of `redir_counters`.
///
/// `Redirected`, `Passed` and `Dropped` partition invocations; the rest are
/// diagnostics recorded next to one of them.
///
/// `Redirected` counts redirect attempts. An attempt the host could not
/// complete, such as an empty AF_XDP slot, hands the frame to the stack and is
/// also counted as `RedirectFailed`, never as `Passed`.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Counter {
    Redirected = 0,
    Passed = 1,
    Dropped = 2,
    Malformed = 3,
    LookupMiss = 4,
    InvalidTarget = 5,
    RedirectFailed = 6,
}

impl Counter {
    pub const ALL: [Counter; COUNTER_SLOTS as usize] = [
        Counter::Redirected,
        Counter::Passed,
        Counter::Dropped,
        Counter::Malformed,
        Counter::LookupMiss,
        Counter::InvalidTarget,
        Counter::RedirectFailed,
    ];

    #[inline(always)]
    pub const fn slot(self) -> u32 {
        self as u32
    }

    pub const fn name(self) -> &'static str {
        match self {
            Counter::Redirected => "redirected",
            Counter::Passed => "passed",
            Counter::Dropped => "dropped",
            Counter::Malformed => "malformed",
            Counter::LookupMiss => "lookup_miss",
            Counter::InvalidTarget => "invalid_target",
            Counter::RedirectFailed => "redirect_failed",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    Redirect(RedirectTarget),
    Pass,
    Drop,
}

impl Outcome {
    #[inline(always)]
    pub fn counter(&self) -> Counter {
        match self {
            Outcome::Redirect(_) => Counter::Redirected,
            Outcome::Pass => Counter::Passed,
            Outcome::Drop => Counter::Dropped,
        }
    }

    /// Host action for this outcome, assuming the redirect itself succeeds.
    #[inline(always)]
    pub fn action(&self) -> XdpAction {
        match self {
            Outcome::Pass => XdpAction::Pass,
            Outcome::Drop => XdpAction::Drop,
            Outcome::Redirect(target) => match target.kind() {
                Some(TargetKind::Bounce) => XdpAction::Tx,
                Some(TargetKind::Interface) | Some(TargetKind::Socket) => XdpAction::Redirect,
                // decide() never redirects to these
                Some(TargetKind::Deny) | None => XdpAction::Pass,
            },
        }
    }
}

/// XDP verdict codes, matching the kernel's `enum xdp_action`.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum XdpAction {
    Aborted = 0,
    Drop = 1,
    Pass = 2,
    Tx = 3,
    Redirect = 4,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Decision {
    pub outcome: Outcome,
    pub diagnostic: Option<Counter>,
}

impl Decision {
    const fn new(outcome: Outcome, diagnostic: Option<Counter>) -> Self {
        Self {
            outcome,
            diagnostic,
        }
    }
}

/// Maps a classification to an outcome. Never fails: anything the fast path
/// cannot understand is passed to the regular stack.
#[inline(always)]
pub fn decide<T: TargetLookup + ?Sized>(classification: &Classification, table: &T) -> Decision {
    let key = match classification {
        Classification::Key(key) => key,
        Classification::Malformed => {
            return Decision::new(Outcome::Pass, Some(Counter::Malformed));
        }
    };

    match table.lookup(key) {
        None => Decision::new(Outcome::Pass, Some(Counter::LookupMiss)),
        Some(target) => match target.kind() {
            Some(TargetKind::Deny) => Decision::new(Outcome::Drop, None),
            Some(_) => Decision::new(Outcome::Redirect(target), None),
            None => Decision::new(Outcome::Pass, Some(Counter::InvalidTarget)),
        },
    }
}

/// Per-frame entry shared by the XDP program and the host dataplane:
/// classify, decide, count.
#[inline(always)]
pub fn process_frame<F, T, C>(frame: &F, mode: KeyMode, table: &T, counters: &C) -> Outcome
where
    F: FrameView,
    T: TargetLookup + ?Sized,
    C: CounterSink + ?Sized,
{
    let classification = classify(frame, mode);
    let decision = decide(&classification, table);
    counters.increment(decision.outcome.counter());
    if let Some(diagnostic) = decision.diagnostic {
        counters.increment(diagnostic);
    }
    decision.outcome
}
