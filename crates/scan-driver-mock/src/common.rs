//! Failure scripting shared by the mock devices.

use std::collections::HashMap;
use std::hash::Hash;

/// Per-operation failure schedule.
///
/// Counts calls per operation and reports which ones should fail.
#[derive(Debug)]
pub struct FailurePlan<Op> {
    counts: HashMap<Op, usize>,
    fail_at: HashMap<Op, Vec<usize>>,
    always: Vec<Op>,
}

impl<Op> Default for FailurePlan<Op> {
    fn default() -> Self {
        Self {
            counts: HashMap::new(),
            fail_at: HashMap::new(),
            always: Vec::new(),
        }
    }
}

impl<Op: Copy + Eq + Hash> FailurePlan<Op> {
    /// Fail the `nth` (1-based) call of `op`, counted from now.
    pub fn fail_on(&mut self, op: Op, nth: usize) {
        let seen = self.counts.get(&op).copied().unwrap_or(0);
        self.fail_at.entry(op).or_default().push(seen + nth);
    }

    /// Fail every future call of `op`.
    pub fn fail_always(&mut self, op: Op) {
        self.always.push(op);
    }

    /// Register one call of `op` and report whether it fails.
    pub fn should_fail(&mut self, op: Op) -> bool {
        let count = self.counts.entry(op).or_insert(0);
        *count += 1;
        let count = *count;
        self.always.contains(&op)
            || self
                .fail_at
                .get(&op)
                .is_some_and(|scheduled| scheduled.contains(&count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nth_is_relative_to_calls_already_seen() {
        let mut plan = FailurePlan::default();
        assert!(!plan.should_fail('a'));
        plan.fail_on('a', 1);
        assert!(plan.should_fail('a'));
        assert!(!plan.should_fail('a'));
        assert!(!plan.should_fail('b'));
    }

    #[test]
    fn always_fails_every_call() {
        let mut plan = FailurePlan::default();
        plan.fail_always(1u8);
        assert!(plan.should_fail(1));
        assert!(plan.should_fail(1));
    }
}
