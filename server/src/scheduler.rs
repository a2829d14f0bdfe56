//! One-shot actions due at a later second.
//!
//! The scheduler only stores values; it never runs anything itself. The tracker
//! polls [`DeferredScheduler::tick`] on every loop iteration and executes what
//! comes back, so a scheduled action can never outlive the state it refers to
//! without the tracker noticing.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job<A> {
    /// Unix time in seconds at which the action becomes due
    pub due: u64,
    pub action: A,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredScheduler<A> {
    jobs: Vec<Job<A>>,
}

impl<A> Default for DeferredScheduler<A> {
    fn default() -> Self {
        Self { jobs: Vec::new() }
    }
}

impl<A> DeferredScheduler<A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, now: u64, delay_secs: u64, action: A) {
        self.schedule_at(now.saturating_add(delay_secs), action);
    }

    pub fn schedule_at(&mut self, due: u64, action: A) {
        self.jobs.push(Job { due, action });
    }

    /// Removes and returns every action due at `now`, in the order it was scheduled.
    pub fn tick(&mut self, now: u64) -> Vec<A> {
        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.jobs)
            .into_iter()
            .partition(|job| job.due <= now);
        self.jobs = pending;
        due.into_iter().map(|job| job.action).collect()
    }

    /// Drops pending actions for which `keep` returns false.
    pub fn retain(&mut self, mut keep: impl FnMut(&A) -> bool) {
        self.jobs.retain(|job| keep(&job.action));
    }

    pub fn jobs(&self) -> &[Job<A>] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_returns_only_due_actions() {
        let mut scheduler = DeferredScheduler::new();
        scheduler.schedule(100, 10, "later");
        scheduler.schedule(100, 0, "now");

        assert_eq!(scheduler.tick(100), vec!["now"]);
        assert_eq!(scheduler.len(), 1);
        assert!(scheduler.tick(109).is_empty());
        assert_eq!(scheduler.tick(110), vec!["later"]);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_due_actions_keep_insertion_order() {
        let mut scheduler = DeferredScheduler::new();
        scheduler.schedule(0, 5, 1);
        scheduler.schedule(0, 3, 2);
        scheduler.schedule(0, 5, 3);

        assert_eq!(scheduler.tick(10), vec![1, 2, 3]);
    }

    #[test]
    fn test_late_tick_runs_everything_once() {
        let mut scheduler = DeferredScheduler::new();
        scheduler.schedule(0, 1, 'a');
        scheduler.schedule(0, 2, 'b');

        assert_eq!(scheduler.tick(1000), vec!['a', 'b']);
        assert!(scheduler.tick(2000).is_empty());
    }

    #[test]
    fn test_retain_drops_cancelled_actions() {
        let mut scheduler = DeferredScheduler::new();
        for n in 0..6 {
            scheduler.schedule(0, n, n);
        }
        scheduler.retain(|n| n % 2 == 0);

        assert_eq!(scheduler.jobs().len(), 3);
        assert_eq!(scheduler.tick(10), vec![0, 2, 4]);
    }

    #[test]
    fn test_snapshot_serialization() {
        let mut scheduler = DeferredScheduler::new();
        scheduler.schedule(1_000, 180, "cleanup".to_string());

        let encoded = bincode::serialize(&scheduler).unwrap();
        let decoded: DeferredScheduler<String> = bincode::deserialize(&encoded).unwrap();

        assert_eq!(decoded, scheduler);
        assert_eq!(decoded.jobs()[0].due, 1_180);
    }
}
