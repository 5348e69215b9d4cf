use std::sync::Arc;

use xdp_redirect_common::{KeyMode, Outcome, SliceFrame, TargetLookup, XdpAction, process_frame};

use crate::counters::SharedCounters;

/// Result of one host-side invocation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Verdict {
    pub outcome: Outcome,
    pub action: XdpAction,
}

/// Userspace counterpart of the XDP entry point: the same classifier and
/// decision engine, run against an in-memory table and atomic counters.
///
/// `process` is allocation-free and may be called from any number of threads.
pub struct Dataplane<T> {
    table: Arc<T>,
    counters: Arc<SharedCounters>,
    key_mode: KeyMode,
}

impl<T> Clone for Dataplane<T> {
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
            counters: self.counters.clone(),
            key_mode: self.key_mode,
        }
    }
}

impl<T: TargetLookup> Dataplane<T> {
    pub fn new(table: Arc<T>, counters: Arc<SharedCounters>, key_mode: KeyMode) -> Self {
        Self {
            table,
            counters,
            key_mode,
        }
    }

    pub fn process(&self, frame: &[u8], ingress_ifindex: u32) -> Verdict {
        let view = SliceFrame::new(frame, ingress_ifindex);
        let outcome = process_frame(&view, self.key_mode, &*self.table, &*self.counters);
        Verdict {
            outcome,
            action: outcome.action(),
        }
    }

    pub fn table(&self) -> &Arc<T> {
        &self.table
    }

    pub fn counters(&self) -> &Arc<SharedCounters> {
        &self.counters
    }

    pub fn key_mode(&self) -> KeyMode {
        self.key_mode
    }
}
