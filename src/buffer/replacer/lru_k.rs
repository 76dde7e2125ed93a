//! LRU-K (K-distance based) page replacement policy.
//!
//! Unlike plain LRU, LRU-K tracks the last `k` accesses per frame and
//! evicts based on "backward K-distance" — the gap since the K-th most
//! recent access — which better resists sequential-scan pollution than a
//! single most-recent-access timestamp.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::common::FrameId;

struct FrameState {
    history: VecDeque<u64>,
    evictable: bool,
}

impl FrameState {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            evictable: false,
        }
    }

    /// Backward K-distance, or `None` to represent +infinity (fewer than
    /// `k` recorded accesses).
    fn k_distance(&self, k: usize, now: u64) -> Option<u64> {
        if self.history.len() < k {
            None
        } else {
            // history is oldest-first; the k-th most recent is at the front
            // once the deque is capped at length k.
            Some(now - self.history.front().copied().unwrap_or(now))
        }
    }

    fn earliest_access(&self) -> u64 {
        self.history.front().copied().unwrap_or(u64::MAX)
    }
}

/// LRU-K replacer: chooses a victim among evictable frames using backward
/// K-distance, falling back to classic LRU (earliest-first-access) among
/// frames with fewer than `k` recorded accesses.
pub struct LruKReplacer {
    k: usize,
    current_timestamp: u64,
    frames: Mutex<HashMap<FrameId, FrameState>>,
    evictable_count: Mutex<usize>,
}

impl LruKReplacer {
    /// Create a replacer tracking up to `k` accesses per frame.
    ///
    /// # Panics
    /// Panics if `k` is 0.
    pub fn new(k: usize) -> Self {
        assert!(k > 0, "k must be > 0");
        Self {
            k,
            current_timestamp: 0,
            frames: Mutex::new(HashMap::new()),
            evictable_count: Mutex::new(0),
        }
    }

    /// Record that `frame_id` was accessed at the current logical
    /// timestamp, advancing the clock.
    pub fn record_access(&mut self, frame_id: FrameId) {
        self.current_timestamp += 1;
        let now = self.current_timestamp;
        let mut frames = self.frames.lock();
        let state = frames.entry(frame_id).or_insert_with(FrameState::new);
        if state.history.len() >= self.k {
            state.history.pop_front();
        }
        state.history.push_back(now);
    }

    /// Mark `frame_id` evictable or not. No-op if the frame has never been
    /// recorded with `record_access`.
    pub fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        let mut frames = self.frames.lock();
        let Some(state) = frames.get_mut(&frame_id) else {
            return;
        };
        if state.evictable != evictable {
            state.evictable = evictable;
            let mut count = self.evictable_count.lock();
            if evictable {
                *count += 1;
            } else {
                *count -= 1;
            }
        }
    }

    /// Choose the evictable frame with the largest backward K-distance
    /// (ties among +infinity frames broken by earliest first access),
    /// clear its history, and return it.
    pub fn evict(&mut self) -> Option<FrameId> {
        let now = self.current_timestamp;
        let mut frames = self.frames.lock();

        let mut best: Option<(FrameId, bool, u64)> = None; // (id, is_inf, distance_or_earliest)

        for (&frame_id, state) in frames.iter() {
            if !state.evictable {
                continue;
            }
            match state.k_distance(self.k, now) {
                None => {
                    let earliest = state.earliest_access();
                    match best {
                        Some((_, true, cur)) if cur <= earliest => {}
                        _ => best = Some((frame_id, true, earliest)),
                    }
                }
                Some(dist) => match best {
                    Some((_, true, _)) => {} // +inf frames always win over finite ones
                    Some((_, false, cur)) if cur >= dist => {}
                    _ => best = Some((frame_id, false, dist)),
                },
            }
        }

        let (victim, _, _) = best?;
        frames.remove(&victim);
        drop(frames);

        let mut count = self.evictable_count.lock();
        *count -= 1;

        Some(victim)
    }

    /// Remove a frame from the replacer entirely.
    ///
    /// # Errors
    /// Returns an error (via panic-free `Result`-style bool here: `false`)
    /// to signal `NotEvictable` when the frame is tracked and currently
    /// marked non-evictable — callers that need the typed error construct
    /// it themselves from this result.
    pub fn remove(&mut self, frame_id: FrameId) -> bool {
        let mut frames = self.frames.lock();
        let Some(state) = frames.get(&frame_id) else {
            return true;
        };
        if !state.evictable {
            return false;
        }
        frames.remove(&frame_id);
        drop(frames);
        let mut count = self.evictable_count.lock();
        *count -= 1;
        true
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        *self.evictable_count.lock()
    }
}
