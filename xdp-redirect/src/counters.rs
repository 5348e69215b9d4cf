use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Map as JsonMap, Number as JsonNumber, Value};

use xdp_redirect_common::{COUNTER_SLOTS, Counter, CounterSink};

const SLOTS: usize = COUNTER_SLOTS as usize;

/// Host-side counter set. Increments are relaxed; totals observed while
/// invocations are running are approximate.
pub struct SharedCounters {
    slots: [AtomicU64; SLOTS],
}

impl SharedCounters {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.slots[counter.slot() as usize].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CounterReport {
        let mut report = CounterReport::default();
        for counter in Counter::ALL {
            report.totals[counter.slot() as usize] = self.get(counter) as u128;
        }
        report
    }

    pub fn reset(&self) {
        for slot in &self.slots {
            slot.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for SharedCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterSink for SharedCounters {
    #[inline(always)]
    fn increment(&self, counter: Counter) {
        self.slots[counter.slot() as usize].fetch_add(1, Ordering::Relaxed);
    }
}

/// Counter totals, summed across CPUs when read from the kernel.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CounterReport {
    totals: [u128; SLOTS],
}

impl CounterReport {
    /// Builds a report from per-CPU values, one slice per counter slot.
    pub fn from_per_cpu<'a, I>(slots: I) -> Self
    where
        I: IntoIterator<Item = (Counter, &'a [u64])>,
    {
        let mut report = Self::default();
        for (counter, per_cpu) in slots {
            report.totals[counter.slot() as usize] = sum_per_cpu(per_cpu.iter());
        }
        report
    }

    pub fn get(&self, counter: Counter) -> u128 {
        self.totals[counter.slot() as usize]
    }

    /// Frames seen: every invocation lands in exactly one outcome slot.
    pub fn invocations(&self) -> u128 {
        self.get(Counter::Redirected)
            .wrapping_add(self.get(Counter::Passed))
            .wrapping_add(self.get(Counter::Dropped))
    }

    /// Frames handed to the regular stack: plain passes plus redirect
    /// attempts that fell back to `XDP_PASS`.
    pub fn returned_to_stack(&self) -> u128 {
        self.get(Counter::Passed).wrapping_add(self.get(Counter::RedirectFailed))
    }

    pub fn to_json(&self) -> Value {
        let mut obj = JsonMap::new();
        for counter in Counter::ALL {
            obj.insert(counter.name().to_string(), value_from_u128(self.get(counter)));
        }
        obj.insert(
            "returned_to_stack".to_string(),
            value_from_u128(self.returned_to_stack()),
        );
        Value::Object(obj)
    }
}

pub(crate) fn sum_per_cpu<'a, I>(values: I) -> u128
where
    I: IntoIterator<Item = &'a u64>,
{
    let mut total: u128 = 0;
    for v in values {
        total = total.wrapping_add(*v as u128);
    }
    total
}

fn value_from_u128(n: u128) -> Value {
    if n <= u64::MAX as u128 {
        Value::Number(JsonNumber::from(n as u64))
    } else {
        Value::String(n.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_per_cpu_accumulates_multiple_cpus() {
        assert_eq!(sum_per_cpu([100u64, 50, 0].iter()), 150);
    }

    #[test]
    fn sum_per_cpu_handles_large_values() {
        assert_eq!(sum_per_cpu([u64::MAX, 1].iter()), (u64::MAX as u128) + 1);
    }

    #[test]
    fn value_from_u128_formats_numbers() {
        match value_from_u128(42) {
            Value::Number(n) => assert_eq!(n, JsonNumber::from(42)),
            other => panic!("unexpected value: {other:?}"),
        }

        let big = (u64::MAX as u128) + 5;
        match value_from_u128(big) {
            Value::String(s) => assert_eq!(s, big.to_string()),
            other => panic!("expected string, got {other:?}"),
        }
    }

    #[test]
    fn report_from_per_cpu_values() {
        let passed = [3u64, 4];
        let malformed = [1u64, 0];
        let report = CounterReport::from_per_cpu([
            (Counter::Passed, &passed[..]),
            (Counter::Malformed, &malformed[..]),
        ]);
        assert_eq!(report.get(Counter::Passed), 7);
        assert_eq!(report.get(Counter::Malformed), 1);
        assert_eq!(report.get(Counter::Redirected), 0);
        assert_eq!(report.invocations(), 7);

        let json = report.to_json();
        assert_eq!(json["passed"], Value::from(7u64));
        assert_eq!(json["redirect_failed"], Value::from(0u64));
    }

    #[test]
    fn failed_redirects_count_as_returned_to_stack() {
        let redirected = [5u64, 1];
        let passed = [2u64, 0];
        let failed = [1u64, 1];
        let report = CounterReport::from_per_cpu([
            (Counter::Redirected, &redirected[..]),
            (Counter::Passed, &passed[..]),
            (Counter::RedirectFailed, &failed[..]),
        ]);
        assert_eq!(report.invocations(), 8);
        assert_eq!(report.returned_to_stack(), 4);
        assert_eq!(report.to_json()["returned_to_stack"], Value::from(4u64));
    }

    #[test]
    fn shared_counters_snapshot_and_reset() {
        let counters = SharedCounters::new();
        counters.increment(Counter::Dropped);
        counters.increment(Counter::Dropped);
        counters.increment(Counter::LookupMiss);
        let report = counters.snapshot();
        assert_eq!(report.get(Counter::Dropped), 2);
        assert_eq!(report.get(Counter::LookupMiss), 1);

        counters.reset();
        assert_eq!(counters.snapshot(), CounterReport::default());
    }
}
