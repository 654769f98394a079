//! Per-round viewer state shared between the adapter callbacks and loads.
//!
//! Everything sits behind one mutex and every transition is a single
//! critical section, so the load guard is checked and claimed atomically.

use foundation::GeoPoint;
use parking_lot::Mutex;
use tracing::debug;

use crate::imagery::StitchedTiles;
use crate::record::{PanoramaKey, PanoramaRecord};

/// Proof that the caller owns the in-progress slot for one load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    pub key: PanoramaKey,
    round: u64,
}

impl LoadTicket {
    pub fn round(&self) -> u64 {
        self.round
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Tiles were stored for the key; `loaded` of the four quadrants succeeded.
    Committed { loaded: usize },
    /// Already loaded, or another load was in progress.
    Skipped,
    /// A new round began while the load was in flight; the tiles were dropped.
    Stale,
}

#[derive(Debug, Default)]
struct Inner {
    round: u64,
    new_round: bool,
    loading: Option<PanoramaKey>,
    current: Option<PanoramaKey>,
    tiles: StitchedTiles,
    tracked_pano: Option<String>,
    origin: Option<PanoramaRecord>,
    heading: f64,
    neighbors: Vec<PanoramaRecord>,
}

#[derive(Debug, Default)]
pub struct RoundState {
    inner: Mutex<Inner>,
}

impl RoundState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new viewer round: nothing loaded, no neighbors, no location.
    ///
    /// A load still in flight from the previous round keeps running but its
    /// ticket no longer matches, so it cannot commit or release the new guard.
    pub fn begin_round(&self) -> u64 {
        let mut s = self.inner.lock();
        let round = s.round + 1;
        *s = Inner {
            round,
            new_round: true,
            ..Inner::default()
        };
        debug!("round {round} started");
        round
    }

    pub fn round(&self) -> u64 {
        self.inner.lock().round
    }

    pub fn is_new_round(&self) -> bool {
        self.inner.lock().new_round
    }

    /// Claim the load guard for `key`.
    ///
    /// Returns `None` if `key` is already loaded or any load is in progress.
    pub fn begin_load(&self, key: &PanoramaKey) -> Option<LoadTicket> {
        let mut s = self.inner.lock();
        if s.current.as_ref() == Some(key) || s.loading.is_some() {
            return None;
        }
        s.loading = Some(key.clone());
        Some(LoadTicket {
            key: key.clone(),
            round: s.round,
        })
    }

    /// Store the result of a load and release its guard.
    pub fn commit(&self, ticket: LoadTicket, tiles: StitchedTiles) -> LoadOutcome {
        let mut s = self.inner.lock();
        if ticket.round != s.round {
            debug!("dropping stale tiles for {} (round {})", ticket.key, ticket.round);
            return LoadOutcome::Stale;
        }

        let loaded = tiles.loaded_count();
        s.loading = None;
        s.current = Some(ticket.key);
        s.tiles = tiles;
        s.new_round = false;
        LoadOutcome::Committed { loaded }
    }

    pub fn is_loading(&self) -> bool {
        self.inner.lock().loading.is_some()
    }

    pub fn current(&self) -> Option<PanoramaKey> {
        self.inner.lock().current.clone()
    }

    /// Stitched image for one column of the current panorama.
    pub fn tile(&self, column: usize) -> Option<String> {
        self.inner.lock().tiles.get(column).map(str::to_string)
    }

    /// Record the host panorama id being reacted to. Returns `false` if it
    /// was already tracked.
    pub fn track_pano(&self, id: &str) -> bool {
        let mut s = self.inner.lock();
        if s.tracked_pano.as_deref() == Some(id) {
            return false;
        }
        s.tracked_pano = Some(id.to_string());
        true
    }

    pub fn is_tracked(&self, id: &str) -> bool {
        self.inner.lock().tracked_pano.as_deref() == Some(id)
    }

    /// Panorama the viewer stands on, with its calibrated heading.
    pub fn set_origin(&self, origin: PanoramaRecord, heading: f64) {
        let mut s = self.inner.lock();
        s.origin = Some(origin);
        s.heading = heading;
    }

    pub fn origin(&self) -> Option<PanoramaRecord> {
        self.inner.lock().origin.clone()
    }

    pub fn location(&self) -> Option<GeoPoint> {
        self.inner.lock().origin.as_ref().map(PanoramaRecord::position)
    }

    pub fn heading(&self) -> f64 {
        self.inner.lock().heading
    }

    pub fn set_neighbors(&self, neighbors: Vec<PanoramaRecord>) {
        self.inner.lock().neighbors = neighbors;
    }

    pub fn neighbors(&self) -> Vec<PanoramaRecord> {
        self.inner.lock().neighbors.clone()
    }

    /// Pending neighbor with the given composite id.
    pub fn neighbor(&self, key: &PanoramaKey) -> Option<PanoramaRecord> {
        self.inner
            .lock()
            .neighbors
            .iter()
            .find(|n| n.pano_id == key.pano_id && n.region_id == key.region_id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::{LoadOutcome, RoundState};
    use crate::imagery::StitchedTiles;
    use crate::record::PanoramaKey;

    fn tiles(n: usize) -> StitchedTiles {
        let mut slots: [Option<String>; 4] = Default::default();
        for (i, slot) in slots.iter_mut().enumerate().take(n) {
            *slot = Some(format!("img{i}"));
        }
        StitchedTiles::new(slots)
    }

    #[test]
    fn guard_blocks_overlapping_loads() {
        let state = RoundState::new();
        state.begin_round();
        let a = PanoramaKey::new("1", "1");
        let b = PanoramaKey::new("2", "1");

        let ticket = state.begin_load(&a).expect("first load");
        assert!(state.is_loading());
        assert!(state.begin_load(&a).is_none());
        assert!(state.begin_load(&b).is_none());

        assert_eq!(state.commit(ticket, tiles(4)), LoadOutcome::Committed { loaded: 4 });
        assert!(!state.is_loading());
        assert!(!state.is_new_round());
        assert_eq!(state.current(), Some(a.clone()));

        // Already loaded.
        assert!(state.begin_load(&a).is_none());
        assert!(state.begin_load(&b).is_some());
    }

    #[test]
    fn tiles_always_belong_to_current() {
        let state = RoundState::new();
        state.begin_round();
        assert_eq!(state.tile(0), None);

        let ticket = state.begin_load(&PanoramaKey::new("1", "1")).unwrap();
        state.commit(ticket, tiles(2));
        assert_eq!(state.tile(1).as_deref(), Some("img1"));
        assert_eq!(state.tile(2), None);
        assert_eq!(state.tile(9), None);
    }

    #[test]
    fn new_round_resets_and_stale_commit_is_dropped() {
        let state = RoundState::new();
        state.begin_round();
        let old = state.begin_load(&PanoramaKey::new("1", "1")).unwrap();

        state.begin_round();
        assert!(state.is_new_round());
        assert!(!state.is_loading());
        assert_eq!(state.current(), None);

        let fresh = state.begin_load(&PanoramaKey::new("2", "1")).unwrap();
        assert_eq!(state.commit(old, tiles(4)), LoadOutcome::Stale);
        // The stale commit must not release the fresh guard.
        assert!(state.is_loading());
        assert_eq!(state.current(), None);

        assert_eq!(state.commit(fresh, tiles(4)), LoadOutcome::Committed { loaded: 4 });
        assert_eq!(state.current(), Some(PanoramaKey::new("2", "1")));
    }

    #[test]
    fn track_pano_reports_changes_only() {
        let state = RoundState::new();
        assert!(!state.is_tracked("r1/1"));
        assert!(state.track_pano("r1/1"));
        assert!(state.is_tracked("r1/1"));
        assert!(!state.track_pano("r1/1"));
        assert!(state.track_pano("r2/1"));
    }
}
