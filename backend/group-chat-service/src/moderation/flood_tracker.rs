//! Sliding-window message rate tracking per (group, user)
//!
//! State is volatile: it lives for the lifetime of the tracker instance and
//! resets on restart. Flood detection only looks at the last minute, so
//! losing it costs at most one window of history.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Trailing window messages are counted in
pub const FLOOD_WINDOW: Duration = Duration::from_secs(60);

pub struct FloodTracker {
    windows: DashMap<(Uuid, Uuid), Vec<Instant>>,
    window: Duration,
}

impl Default for FloodTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl FloodTracker {
    pub fn new() -> Self {
        Self::with_window(FLOOD_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            window,
        }
    }

    /// Record a message now and return how many messages this user sent in
    /// this group within the window, the current one included
    pub fn track(&self, group_id: Uuid, user_id: Uuid) -> usize {
        self.track_at(group_id, user_id, Instant::now())
    }

    pub fn track_at(&self, group_id: Uuid, user_id: Uuid, now: Instant) -> usize {
        let window = self.window;
        let mut timestamps = self.windows.entry((group_id, user_id)).or_default();
        timestamps.retain(|t| now.saturating_duration_since(*t) < window);
        timestamps.push(now);
        timestamps.len()
    }

    /// Evict keys whose newest timestamp has left the window
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let window = self.window;
        let before = self.windows.len();
        self.windows.retain(|_, timestamps| {
            timestamps
                .last()
                .map(|t| now.saturating_duration_since(*t) < window)
                .unwrap_or(false)
        });
        before.saturating_sub(self.windows.len())
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Periodically evict stale keys until the returned handle is aborted
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = tracker.sweep();
                if evicted > 0 {
                    tracing::debug!(
                        evicted,
                        remaining = tracker.tracked_keys(),
                        "flood tracker sweep"
                    );
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_within_window() {
        let tracker = FloodTracker::new();
        let (group, user) = (Uuid::new_v4(), Uuid::new_v4());
        let start = Instant::now();

        let counts: Vec<usize> = (0..9)
            .map(|i| tracker.track_at(group, user, start + Duration::from_secs(i * 5)))
            .collect();

        assert_eq!(counts, vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_old_entries_roll_off() {
        let tracker = FloodTracker::new();
        let (group, user) = (Uuid::new_v4(), Uuid::new_v4());
        let start = Instant::now();

        tracker.track_at(group, user, start);
        tracker.track_at(group, user, start + Duration::from_secs(30));
        assert_eq!(
            tracker.track_at(group, user, start + Duration::from_secs(60)),
            2
        );
        assert_eq!(
            tracker.track_at(group, user, start + Duration::from_secs(200)),
            1
        );
    }

    #[test]
    fn test_keys_are_independent() {
        let tracker = FloodTracker::new();
        let group = Uuid::new_v4();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Instant::now();

        tracker.track_at(group, alice, now);
        tracker.track_at(group, alice, now);
        assert_eq!(tracker.track_at(group, bob, now), 1);
        assert_eq!(tracker.track_at(Uuid::new_v4(), alice, now), 1);
    }

    #[test]
    fn test_sweep_evicts_stale_keys() {
        let tracker = FloodTracker::new();
        let start = Instant::now();
        let (group, stale, fresh) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        tracker.track_at(group, stale, start);
        tracker.track_at(group, fresh, start + Duration::from_secs(50));
        assert_eq!(tracker.tracked_keys(), 2);

        assert_eq!(tracker.sweep_at(start + Duration::from_secs(70)), 1);
        assert_eq!(tracker.tracked_keys(), 1);
        assert_eq!(
            tracker.track_at(group, fresh, start + Duration::from_secs(71)),
            2
        );
    }

    #[tokio::test]
    async fn test_sweeper_task_runs() {
        let tracker = Arc::new(FloodTracker::with_window(Duration::from_millis(10)));
        tracker.track(Uuid::new_v4(), Uuid::new_v4());

        let handle = tracker.spawn_sweeper(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.abort();

        assert_eq!(tracker.tracked_keys(), 0);
    }
}
