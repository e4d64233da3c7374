//! Bounded, time-ordered spot storage with a scrollable view window.
//!
//! The list holds at most `capacity` spots, oldest first. A full list evicts
//! its oldest spot to make room, and refuses spots older than everything it
//! holds. A spot on (nearly) the same frequency for the same DX call as one
//! already stored is a duplicate and is dropped.

use serde::Serialize;

use crate::geo::LatLng;
use crate::spot::{DisplayHint, Endpoint, SpotRecord};

/// Frequencies closer than this (kHz) count as the same for duplicate checks.
pub const DUPLICATE_KHZ: f64 = 0.1;

/// What happened to a spot offered to [`SpotList::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertOutcome {
    Inserted,
    EvictedOldestAndInserted,
    RejectedDuplicate,
    RejectedTooOld,
    RejectedUnusable,
}

impl InsertOutcome {
    pub fn is_stored(self) -> bool {
        matches!(
            self,
            InsertOutcome::Inserted | InsertOutcome::EvictedOldestAndInserted
        )
    }
}

/// The slice of the list currently paged into view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScrollWindow {
    /// Index of the oldest visible spot.
    pub top: usize,
    /// Number of rows the view can show.
    pub rows: usize,
}

/// Fixed-capacity list of spots ordered oldest first.
#[derive(Debug, Clone)]
pub struct SpotList {
    capacity: usize,
    spots: Vec<SpotRecord>,
    window: ScrollWindow,
}

impl SpotList {
    /// Create an empty list. A zero capacity or row count is raised to one.
    pub fn new(capacity: usize, visible_rows: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            spots: Vec::with_capacity(capacity),
            window: ScrollWindow {
                top: 0,
                rows: visible_rows.max(1),
            },
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.spots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.spots.len() >= self.capacity
    }

    /// All spots, oldest first.
    pub fn spots(&self) -> &[SpotRecord] {
        &self.spots
    }

    pub fn oldest(&self) -> Option<&SpotRecord> {
        self.spots.first()
    }

    pub fn newest(&self) -> Option<&SpotRecord> {
        self.spots.last()
    }

    fn is_duplicate(&self, candidate: &SpotRecord) -> bool {
        self.spots.iter().any(|s| {
            s.target_call == candidate.target_call
                && (s.frequency_khz - candidate.frequency_khz).abs() < DUPLICATE_KHZ
        })
    }

    /// Offer a spot to the list.
    pub fn insert(&mut self, candidate: SpotRecord) -> InsertOutcome {
        if !candidate.is_usable() {
            return InsertOutcome::RejectedUnusable;
        }
        if self.is_full()
            && self
                .oldest()
                .is_some_and(|oldest| candidate.spotted_at < oldest.spotted_at)
        {
            return InsertOutcome::RejectedTooOld;
        }
        if self.is_duplicate(&candidate) {
            return InsertOutcome::RejectedDuplicate;
        }

        let following = self.is_at_newest();

        // Equal timestamps keep arrival order.
        let at = self
            .spots
            .partition_point(|s| s.spotted_at <= candidate.spotted_at);
        self.spots.insert(at, candidate);
        if at < self.window.top {
            self.window.top += 1;
        }

        let outcome = if self.spots.len() > self.capacity {
            self.spots.remove(0);
            self.window.top = self.window.top.saturating_sub(1);
            InsertOutcome::EvictedOldestAndInserted
        } else {
            InsertOutcome::Inserted
        };

        if following {
            self.jump_to_newest();
        } else {
            self.clamp_window();
        }
        outcome
    }

    /// Drop every spot and reset the view.
    pub fn clear(&mut self) {
        self.spots.clear();
        self.window.top = 0;
    }

    pub fn window(&self) -> ScrollWindow {
        self.window
    }

    /// Spots currently in view, oldest first.
    pub fn visible(&self) -> &[SpotRecord] {
        let start = self.window.top.min(self.spots.len());
        let end = (start + self.window.rows).min(self.spots.len());
        &self.spots[start..end]
    }

    /// Whether the view includes the newest spot.
    pub fn is_at_newest(&self) -> bool {
        self.window.top + self.window.rows >= self.spots.len()
    }

    /// Change the number of visible rows, keeping the newest spots in view.
    pub fn set_visible_rows(&mut self, rows: usize) {
        self.window.rows = rows.max(1);
        self.jump_to_newest();
    }

    /// Show one older spot. Returns false at the oldest end.
    pub fn scroll_up(&mut self) -> bool {
        if self.window.top == 0 {
            return false;
        }
        self.window.top -= 1;
        true
    }

    /// Show one newer spot. Returns false at the newest end.
    pub fn scroll_down(&mut self) -> bool {
        if self.is_at_newest() {
            return false;
        }
        self.window.top += 1;
        true
    }

    /// Show the most recent spots.
    pub fn jump_to_newest(&mut self) {
        self.window.top = self.spots.len().saturating_sub(self.window.rows);
    }

    fn clamp_window(&mut self) {
        let max_top = self.spots.len().saturating_sub(self.window.rows);
        self.window.top = self.window.top.min(max_top);
    }

    /// The spot endpoint closest to `point`, if within `max_distance` radians.
    ///
    /// Ties go to the older spot, and to the origin over the target.
    pub fn nearest(&self, point: LatLng, max_distance: f64) -> Option<(&SpotRecord, Endpoint)> {
        let mut best: Option<(&SpotRecord, Endpoint, f64)> = None;

        for spot in &self.spots {
            for end in [Endpoint::Origin, Endpoint::Target] {
                let d = spot.location(end).angular_distance(&point);
                if best.is_none_or(|(_, _, best_d)| d < best_d) {
                    best = Some((spot, end, d));
                }
            }
        }

        best.filter(|(_, _, d)| *d <= max_distance)
            .map(|(spot, end, _)| (spot, end))
    }

    /// Cache renderer geometry on the spot at `index`.
    pub fn set_display_hint(&mut self, index: usize, hint: DisplayHint) -> bool {
        match self.spots.get_mut(index) {
            Some(spot) => {
                spot.display_hint = Some(hint);
                true
            }
            None => false,
        }
    }
}
