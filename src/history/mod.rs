//! Tick-indexed snapshot store with run-length compression of idle spans,
//! a sparse keyframe index for seeking, and age/memory-bounded eviction.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::config::Config;
use crate::sim::{Simulation, Tick};
use crate::snapshot::{RestoreReport, TasSnapshot};

/// A compacted span of ticks whose state did not meaningfully change.
/// Every tick in `[start_tick, end_tick]` resolves to the snapshot stored
/// at `reference_tick`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleRange {
    pub start_tick: Tick,
    pub end_tick: Tick,
    pub reference_tick: Tick,
}

impl IdleRange {
    fn contains(&self, tick: Tick) -> bool {
        tick >= self.start_tick && tick <= self.end_tick
    }
}

/// Aggregate history counters for status surfaces
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct HistoryStats {
    pub stored_states: usize,
    pub keyframes: usize,
    pub idle_ranges: usize,
    pub oldest_tick: Option<Tick>,
    pub newest_tick: Option<Tick>,
    pub memory_usage: usize,
    pub memory_limit: usize,
}

/// History load errors
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("No stored state for tick {0}")]
    NoState(Tick),
}

/// Memory- and age-bounded store of snapshots keyed by tick
pub struct TasHistory {
    snapshots: BTreeMap<Tick, TasSnapshot>,
    keyframe_ticks: Vec<Tick>,
    idle_ranges: Vec<IdleRange>,

    max_history_ticks: i32,
    keyframe_interval: i32,
    max_memory_bytes: usize,
    min_retained_ticks: i32,

    memory_usage: usize,
    last_non_idle_tick: Option<Tick>,
    currently_idle: bool,
}

impl TasHistory {
    pub fn new(config: &Config) -> Self {
        Self {
            snapshots: BTreeMap::new(),
            keyframe_ticks: Vec::new(),
            idle_ranges: Vec::new(),
            max_history_ticks: config.max_history_ticks,
            keyframe_interval: config.keyframe_interval.max(1),
            max_memory_bytes: config.max_memory_bytes,
            min_retained_ticks: config.min_retained_ticks,
            memory_usage: 0,
            last_non_idle_tick: None,
            currently_idle: false,
        }
    }

    pub fn set_max_history_ticks(&mut self, ticks: i32) {
        self.max_history_ticks = ticks;
        self.trim_to_tick_limit();
    }

    pub fn set_keyframe_interval(&mut self, ticks: i32) {
        self.keyframe_interval = ticks.max(1);
    }

    pub fn set_max_memory_bytes(&mut self, bytes: usize) {
        self.max_memory_bytes = bytes;
        self.trim_to_memory_limit();
    }

    /// Capture the simulation at `tick` and store it, or fold the tick into
    /// an idle range when nothing meaningfully changed since the previous
    /// stored state.
    pub fn save_state<S: Simulation + ?Sized>(&mut self, sim: &S, tick: Tick) {
        let mut snapshot = TasSnapshot::capture(sim);
        snapshot.tick = tick;

        let is_idle = self
            .snapshots
            .values()
            .next_back()
            .is_some_and(|prev| snapshot.is_equivalent(prev));

        if is_idle {
            if self.currently_idle {
                // Extend the open idle range; the new capture is discarded.
                if let Some(range) = self.idle_ranges.last_mut() {
                    range.end_tick = tick;
                }
            } else if let Some(reference_tick) = self.last_non_idle_tick {
                self.currently_idle = true;
                self.idle_ranges.push(IdleRange {
                    start_tick: tick,
                    end_tick: tick,
                    reference_tick,
                });
            }
            return;
        }

        // State changed: close any open idle range and store for real.
        self.currently_idle = false;
        self.last_non_idle_tick = Some(tick);

        snapshot.is_keyframe = self.should_store_keyframe(tick);
        self.add_snapshot(tick, snapshot);

        self.trim_to_tick_limit();
        self.trim_to_memory_limit();
    }

    /// Restore the simulation to `tick`, resolving idle-range redirection.
    /// Returns the resolved tick and the restore report.
    pub fn load_state<S: Simulation + ?Sized>(
        &self,
        sim: &mut S,
        tick: Tick,
    ) -> Result<(Tick, RestoreReport), HistoryError> {
        let resolved = self.resolve_tick(tick).ok_or(HistoryError::NoState(tick))?;
        let snapshot = self
            .snapshots
            .get(&resolved)
            .ok_or(HistoryError::NoState(tick))?;
        Ok((resolved, snapshot.restore(sim)))
    }

    /// Whether `tick` can be restored, directly or via an idle range
    pub fn has_state(&self, tick: Tick) -> bool {
        self.resolve_tick(tick).is_some()
    }

    /// Read access to the stored snapshot backing `tick`, if any
    pub fn snapshot_at(&self, tick: Tick) -> Option<&TasSnapshot> {
        self.resolve_tick(tick)
            .and_then(|resolved| self.snapshots.get(&resolved))
    }

    /// The greatest keyframe tick at or before `tick`
    pub fn nearest_keyframe(&self, tick: Tick) -> Option<Tick> {
        let idx = self.keyframe_ticks.partition_point(|&kf| kf <= tick);
        idx.checked_sub(1).map(|i| self.keyframe_ticks[i])
    }

    /// The greatest keyframe tick strictly before `tick`
    pub fn nearest_keyframe_before(&self, tick: Tick) -> Option<Tick> {
        let idx = self.keyframe_ticks.partition_point(|&kf| kf < tick);
        idx.checked_sub(1).map(|i| self.keyframe_ticks[i])
    }

    pub fn oldest_tick(&self) -> Option<Tick> {
        self.snapshots.keys().next().copied()
    }

    /// Newest covered tick; an open idle range extends past the newest
    /// stored snapshot.
    pub fn newest_tick(&self) -> Option<Tick> {
        let stored = self.snapshots.keys().next_back().copied();
        let idle = self.idle_ranges.last().map(|r| r.end_tick);
        stored.max(idle)
    }

    pub fn stored_state_count(&self) -> usize {
        self.snapshots.len()
    }

    pub fn keyframe_count(&self) -> usize {
        self.keyframe_ticks.len()
    }

    pub fn memory_usage(&self) -> usize {
        self.memory_usage
    }

    pub fn stats(&self) -> HistoryStats {
        HistoryStats {
            stored_states: self.snapshots.len(),
            keyframes: self.keyframe_ticks.len(),
            idle_ranges: self.idle_ranges.len(),
            oldest_tick: self.oldest_tick(),
            newest_tick: self.newest_tick(),
            memory_usage: self.memory_usage,
            memory_limit: self.max_memory_bytes,
        }
    }

    /// Evict snapshots older than the history tick window
    pub fn trim_to_tick_limit(&mut self) {
        let Some(newest) = self.newest_tick() else {
            return;
        };
        let oldest_allowed = newest - self.max_history_ticks;

        loop {
            let Some(tick) = self.snapshots.keys().next().copied() else {
                break;
            };
            if tick >= oldest_allowed {
                break;
            }
            self.remove_snapshot(tick);
        }

        self.idle_ranges.retain(|r| r.end_tick >= oldest_allowed);
        self.drop_unresolvable_idle_ranges();
    }

    /// Evict oldest snapshots while over the memory budget, preferring
    /// non-keyframes and never touching the minimum recent window.
    pub fn trim_to_memory_limit(&mut self) {
        let Some(newest) = self.newest_tick() else {
            return;
        };

        while self.memory_usage > self.max_memory_bytes && self.snapshots.len() > 1 {
            let Some(oldest) = self.oldest_tick() else {
                break;
            };
            if newest - oldest < self.min_retained_ticks {
                // Over budget, but the whole store is inside the guaranteed
                // window. Memory pressure stays internal.
                debug!(
                    memory_usage = self.memory_usage,
                    memory_limit = self.max_memory_bytes,
                    "History over memory budget inside the retained window"
                );
                break;
            }

            let victim = self
                .snapshots
                .iter()
                .take_while(|(&tick, _)| newest - tick >= self.min_retained_ticks)
                .find(|(_, snapshot)| !snapshot.is_keyframe)
                .map(|(&tick, _)| tick)
                .unwrap_or(oldest);

            self.remove_snapshot(victim);
        }

        self.drop_unresolvable_idle_ranges();
    }

    /// Drop every stored snapshot, keyframe, and idle span strictly after
    /// `tick`, and reset idle tracking to the surviving newest state.
    ///
    /// Called after a rewind: the abandoned future branch must not shadow
    /// the states a divergent replay is about to store, and an idle range
    /// must never overlap a directly stored tick.
    pub fn truncate_after(&mut self, tick: Tick) {
        let removed = self.snapshots.split_off(&(tick + 1));
        for snapshot in removed.values() {
            self.memory_usage = self
                .memory_usage
                .saturating_sub(snapshot.approximate_size());
        }

        self.keyframe_ticks
            .truncate(self.keyframe_ticks.partition_point(|&kf| kf <= tick));

        self.idle_ranges.retain_mut(|range| {
            if range.start_tick > tick {
                return false;
            }
            if range.end_tick > tick {
                range.end_tick = tick;
            }
            true
        });
        self.drop_unresolvable_idle_ranges();

        self.currently_idle = false;
        self.last_non_idle_tick = self.snapshots.keys().next_back().copied();
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.keyframe_ticks.clear();
        self.idle_ranges.clear();
        self.memory_usage = 0;
        self.last_non_idle_tick = None;
        self.currently_idle = false;
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty() && self.idle_ranges.is_empty()
    }

    fn resolve_tick(&self, tick: Tick) -> Option<Tick> {
        if self.snapshots.contains_key(&tick) {
            return Some(tick);
        }
        self.idle_ranges
            .iter()
            .find(|r| r.contains(tick))
            .map(|r| r.reference_tick)
            .filter(|reference| self.snapshots.contains_key(reference))
    }

    fn should_store_keyframe(&self, tick: Tick) -> bool {
        match self.keyframe_ticks.last() {
            None => true,
            Some(&last) => tick - last >= self.keyframe_interval,
        }
    }

    fn add_snapshot(&mut self, tick: Tick, snapshot: TasSnapshot) {
        // Re-saving a tick after a rewind replaces the earlier snapshot.
        self.remove_snapshot(tick);
        if snapshot.is_keyframe {
            self.keyframe_ticks.push(tick);
        }
        self.memory_usage += snapshot.approximate_size();
        self.snapshots.insert(tick, snapshot);
    }

    fn remove_snapshot(&mut self, tick: Tick) {
        if let Some(snapshot) = self.snapshots.remove(&tick) {
            self.memory_usage = self
                .memory_usage
                .saturating_sub(snapshot.approximate_size());
            if snapshot.is_keyframe {
                if let Ok(idx) = self.keyframe_ticks.binary_search(&tick) {
                    self.keyframe_ticks.remove(idx);
                }
            }
        }
    }

    /// Idle ranges whose reference snapshot was evicted can no longer be
    /// resolved; drop them so redirection never dangles.
    fn drop_unresolvable_idle_ranges(&mut self) {
        let snapshots = &self.snapshots;
        self.idle_ranges
            .retain(|r| snapshots.contains_key(&r.reference_tick));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::testbed::TestbedSim;
    use crate::sim::{PlayerInput, Simulation};

    fn config() -> Config {
        Config::default()
    }

    /// Drive the world with changing state for `ticks` ticks, saving each one
    fn run_changing(history: &mut TasHistory, sim: &mut TestbedSim, ticks: i32) {
        for _ in 0..ticks {
            let input = PlayerInput {
                direction: 1,
                ..Default::default()
            };
            sim.apply_input(0, &input);
            history.save_state(sim, sim.current_tick());
            sim.step();
        }
    }

    #[test]
    fn nearest_keyframe_before_scenario() {
        let mut sim = TestbedSim::new(7, "Sunny Side Up");
        sim.connect(0);
        let mut history = TasHistory::new(&config());
        run_changing(&mut history, &mut sim, 200);

        assert_eq!(history.nearest_keyframe_before(175), Some(150));
        assert_eq!(history.nearest_keyframe(150), Some(150));
        assert_eq!(history.nearest_keyframe_before(0), None);
    }

    #[test]
    fn keyframe_spacing_respects_interval() {
        let mut sim = TestbedSim::new(7, "map");
        sim.connect(0);
        let mut history = TasHistory::new(&config());
        run_changing(&mut history, &mut sim, 300);

        let keyframes: Vec<_> = (0..300)
            .filter(|&t| history.snapshot_at(t).is_some_and(|s| s.is_keyframe))
            .collect();
        assert!(keyframes.len() >= 2);
        for pair in keyframes.windows(2) {
            assert!(pair[1] - pair[0] >= 50, "keyframes too close: {pair:?}");
        }
    }

    #[test]
    fn idle_ticks_do_not_grow_memory() {
        let mut sim = TestbedSim::new(7, "map");
        sim.connect(0);
        let mut history = TasHistory::new(&config());

        // Let the character settle on the floor, then keep saving a world
        // that no longer changes.
        for _ in 0..100 {
            history.save_state(&sim, sim.current_tick());
            sim.step();
        }
        let settled_usage = history.memory_usage();
        let settled_count = history.stored_state_count();

        for _ in 0..50 {
            history.save_state(&sim, sim.current_tick());
            sim.step();
        }
        assert_eq!(history.memory_usage(), settled_usage);
        assert_eq!(history.stored_state_count(), settled_count);

        // Every idle tick is still restorable through its reference.
        let newest = history.newest_tick().unwrap();
        assert!(history.has_state(newest));
        assert!(history.has_state(newest - 10));
    }

    #[test]
    fn idle_range_redirects_to_reference_snapshot() {
        let mut sim = TestbedSim::new(7, "map");
        sim.connect(0);
        let mut history = TasHistory::new(&config());

        for _ in 0..120 {
            history.save_state(&sim, sim.current_tick());
            sim.step();
        }

        let newest = history.newest_tick().unwrap();
        let direct = history.snapshot_at(newest).unwrap();
        // The newest covered tick lies inside an idle range once the world
        // settles; its backing snapshot is the reference tick's.
        assert!(direct.tick < newest);
        assert_eq!(direct.state_hash, history.snapshot_at(direct.tick).unwrap().state_hash);
    }

    #[test]
    fn memory_eviction_prefers_non_keyframes_and_keeps_recent_window() {
        let mut sim = TestbedSim::new(7, "map");
        sim.connect(0);
        let mut config = config();
        config.max_memory_bytes = 1024 * 1024;
        config.min_retained_ticks = 50;
        let mut history = TasHistory::new(&config);

        run_changing(&mut history, &mut sim, 500);

        let newest = history.newest_tick().unwrap();
        let oldest = history.oldest_tick().unwrap();
        assert!(
            history.memory_usage() <= config.max_memory_bytes
                || newest - oldest <= config.min_retained_ticks
        );

        // Ticks inside the recent window must have survived.
        for tick in (newest - 40)..=newest {
            assert!(history.has_state(tick), "tick {tick} evicted from window");
        }

        // Eviction took non-keyframes first: the oldest non-keyframe is gone
        // while keyframes outside the window survive.
        assert!(history.snapshot_at(1).is_none());
        let old_keyframes = (0..(newest - 50))
            .filter(|&t| history.snapshot_at(t).is_some_and(|s| s.is_keyframe))
            .count();
        assert!(old_keyframes > 0, "all old keyframes were evicted");
    }

    #[test]
    fn tick_limit_drops_oldest_states() {
        let mut sim = TestbedSim::new(7, "map");
        sim.connect(0);
        let mut config = config();
        config.max_history_ticks = 100;
        let mut history = TasHistory::new(&config);

        run_changing(&mut history, &mut sim, 400);

        let oldest = history.oldest_tick().unwrap();
        let newest = history.newest_tick().unwrap();
        assert!(newest - oldest <= 100);
        assert!(!history.has_state(10));
    }

    #[test]
    fn load_state_restores_matching_hash() {
        let mut sim = TestbedSim::new(7, "map");
        sim.connect(0);
        sim.connect(3);
        let mut history = TasHistory::new(&config());
        run_changing(&mut history, &mut sim, 60);

        let captured_hash = history.snapshot_at(30).unwrap().state_hash;
        let (resolved, report) = history.load_state(&mut sim, 30).expect("state exists");
        assert_eq!(resolved, 30);
        assert!(!report.is_partial());

        let recaptured = TasSnapshot::capture(&sim);
        assert_eq!(recaptured.state_hash, captured_hash);
    }

    #[test]
    fn load_state_fails_for_unknown_tick() {
        let mut sim = TestbedSim::new(7, "map");
        sim.connect(0);
        let mut history = TasHistory::new(&config());
        run_changing(&mut history, &mut sim, 10);

        assert!(matches!(
            history.load_state(&mut sim, 5000),
            Err(HistoryError::NoState(5000))
        ));
    }

    #[test]
    fn truncate_after_discards_future_states_and_idle_ranges() {
        let mut sim = TestbedSim::new(7, "map");
        sim.connect(0);
        let mut history = TasHistory::new(&config());

        // Settles partway through, leaving an idle tail behind the stored
        // falling phase.
        for _ in 0..120 {
            history.save_state(&sim, sim.current_tick());
            sim.step();
        }
        let usage_before = history.memory_usage();
        assert!(history.has_state(110));

        // Cut inside the idle tail: the range is clamped, not dropped.
        history.truncate_after(50);
        assert_eq!(history.newest_tick(), Some(50));
        assert!(history.has_state(45));
        assert!(!history.has_state(60));

        // Cut inside the stored phase: everything later disappears.
        history.truncate_after(20);
        assert_eq!(history.newest_tick(), Some(20));
        assert!(history.has_state(20));
        assert!(!history.has_state(35));
        assert!(history.memory_usage() < usage_before);
    }

    #[test]
    fn resaving_a_tick_replaces_the_old_snapshot() {
        let mut sim = TestbedSim::new(7, "map");
        sim.connect(0);
        let mut history = TasHistory::new(&config());
        run_changing(&mut history, &mut sim, 50);

        let count = history.stored_state_count();
        let usage = history.memory_usage();

        // A divergent replay writes a different state under an existing tick.
        sim.apply_input(
            0,
            &PlayerInput {
                direction: -1,
                ..Default::default()
            },
        );
        sim.step();
        history.save_state(&sim, 49);

        assert_eq!(history.stored_state_count(), count);
        assert_eq!(history.memory_usage(), usage);
    }

    #[test]
    fn clear_resets_everything() {
        let mut sim = TestbedSim::new(7, "map");
        sim.connect(0);
        let mut history = TasHistory::new(&config());
        run_changing(&mut history, &mut sim, 50);

        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.memory_usage(), 0);
        assert_eq!(history.keyframe_count(), 0);
        assert!(!history.has_state(10));
    }
}
