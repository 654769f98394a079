//! Nearest-panorama and neighbor selection on top of a coverage source.

use std::collections::HashSet;
use std::sync::Arc;

use foundation::{GeoPoint, great_circle_distance, tile_index, tile_neighborhood};
use futures_util::future::join_all;
use tracing::debug;

use crate::config::PanoramaConfig;
use crate::coverage::{CoverageError, CoverageSource};
use crate::record::PanoramaRecord;

#[derive(Clone)]
pub struct PanoramaResolver {
    coverage: Arc<dyn CoverageSource>,
    zoom: u8,
    neighbor_limit: usize,
    min_separation_km: f64,
}

impl PanoramaResolver {
    pub fn new(coverage: Arc<dyn CoverageSource>, config: &PanoramaConfig) -> Self {
        Self {
            coverage,
            zoom: config.coverage_zoom,
            neighbor_limit: config.neighbor_limit,
            min_separation_km: config.min_neighbor_separation_km,
        }
    }

    /// Closest panorama in the map tile containing `(lat, lon)`.
    ///
    /// `Ok(None)` means the tile has no coverage; `Err` means the lookup failed.
    pub async fn closest_panorama(
        &self,
        lat: f64,
        lon: f64,
    ) -> Result<Option<PanoramaRecord>, CoverageError> {
        let tile = tile_index(lat, lon, self.zoom);
        let records = self.coverage.coverage(tile).await?;
        Ok(closest_in(&records, GeoPoint::new(lat, lon)).cloned())
    }

    /// Up to `neighbor_limit` panoramas around `panorama`, nearest first.
    ///
    /// Searches the 3x3 block of map tiles around the panorama. Tiles whose
    /// lookup fails contribute nothing; the rest are still used.
    pub async fn neighbors(&self, panorama: &PanoramaRecord) -> Vec<PanoramaRecord> {
        let center = tile_index(panorama.lat, panorama.lon, self.zoom);
        let tiles = tile_neighborhood(center, self.zoom);

        let results = join_all(tiles.iter().map(|&tile| self.coverage.coverage(tile))).await;

        let mut candidates = Vec::new();
        for (tile, result) in tiles.iter().zip(results) {
            match result {
                Ok(records) => candidates.extend(records),
                Err(err) => debug!("neighbor search skipping tile {tile}: {err}"),
            }
        }

        select_neighbors(
            panorama,
            candidates,
            self.neighbor_limit,
            self.min_separation_km,
        )
    }
}

/// Linear scan for the record nearest to `point`; the first of equals wins.
pub fn closest_in(records: &[PanoramaRecord], point: GeoPoint) -> Option<&PanoramaRecord> {
    let mut best: Option<(&PanoramaRecord, f64)> = None;
    for record in records {
        let d = great_circle_distance(point, record.position());
        if best.is_none_or(|(_, best_d)| d < best_d) {
            best = Some((record, d));
        }
    }
    best.map(|(record, _)| record)
}

/// Sort `candidates` by distance to `origin`, drop `origin` itself, repeats,
/// and anything within `min_separation_km`, then keep the first `limit`.
pub fn select_neighbors(
    origin: &PanoramaRecord,
    candidates: Vec<PanoramaRecord>,
    limit: usize,
    min_separation_km: f64,
) -> Vec<PanoramaRecord> {
    let from = origin.position();
    let origin_id = origin.composite_id();

    let mut ranked: Vec<(f64, PanoramaRecord)> = candidates
        .into_iter()
        .map(|r| (great_circle_distance(from, r.position()), r))
        .collect();
    // Stable: equal distances keep arrival order.
    ranked.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut seen = HashSet::new();
    ranked
        .into_iter()
        .filter(|(d, r)| {
            let id = r.composite_id();
            id != origin_id && *d > min_separation_km && seen.insert(id)
        })
        .take(limit)
        .map(|(_, r)| r)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use foundation::{GeoPoint, TileCoordinate, great_circle_distance, tile_index};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::BoxFuture;

    fn record(pano: &str, region: &str, lat: f64, lon: f64) -> PanoramaRecord {
        PanoramaRecord {
            date: None,
            pano_id: pano.to_string(),
            region_id: region.to_string(),
            heading: 0.0,
            lat,
            lon,
        }
    }

    /// Coverage keyed by tile; unknown tiles are empty, `failing` tiles error.
    #[derive(Default)]
    struct FakeCoverage {
        tiles: HashMap<TileCoordinate, Vec<PanoramaRecord>>,
        failing: Vec<TileCoordinate>,
        queried: Mutex<Vec<TileCoordinate>>,
    }

    impl FakeCoverage {
        fn with_records(records: Vec<PanoramaRecord>) -> Self {
            let mut tiles: HashMap<TileCoordinate, Vec<PanoramaRecord>> = HashMap::new();
            for r in records {
                tiles
                    .entry(tile_index(r.lat, r.lon, 17))
                    .or_default()
                    .push(r);
            }
            Self {
                tiles,
                ..Self::default()
            }
        }
    }

    impl CoverageSource for FakeCoverage {
        fn coverage(
            &self,
            tile: TileCoordinate,
        ) -> BoxFuture<'_, Result<Vec<PanoramaRecord>, CoverageError>> {
            self.queried.lock().push(tile);
            let result = if self.failing.contains(&tile) {
                Err(CoverageError::Status { tile, status: 503 })
            } else {
                Ok(self.tiles.get(&tile).cloned().unwrap_or_default())
            };
            Box::pin(async move { result })
        }
    }

    fn resolver(coverage: FakeCoverage) -> (PanoramaResolver, Arc<FakeCoverage>) {
        let coverage = Arc::new(coverage);
        let r = PanoramaResolver::new(coverage.clone(), &PanoramaConfig::default());
        (r, coverage)
    }

    #[tokio::test]
    async fn closest_picks_the_nearer_record() {
        let a = record("A", "1", 10.0, 20.0);
        let b = record("B", "1", 10.0001, 20.0);
        let query = GeoPoint::new(10.00005, 20.0);

        let d_a = great_circle_distance(query, a.position());
        let d_b = great_circle_distance(query, b.position());
        let expected = if d_a < d_b { &a } else { &b };

        let tile = tile_index(query.lat, query.lon, 17);
        let mut coverage = FakeCoverage::default();
        coverage.tiles.insert(tile, vec![a.clone(), b.clone()]);
        let (r, _) = resolver(coverage);

        let got = r.closest_panorama(query.lat, query.lon).await.unwrap();
        assert_eq!(got.as_ref(), Some(expected));
    }

    #[test]
    fn closest_scenario_on_fixed_tile() {
        // Records as served for tile (1000, 1500), scanned directly.
        let records = vec![record("A", "1", 10.0, 20.0), record("B", "1", 10.0001, 20.0)];
        let query = GeoPoint::new(10.00005, 20.0);
        let d: Vec<f64> = records
            .iter()
            .map(|r| great_circle_distance(query, r.position()))
            .collect();

        let got = closest_in(&records, query).unwrap();
        let nearer = if d[0] < d[1] { &records[0] } else { &records[1] };
        assert_eq!(got, nearer);
        assert!(records.contains(got));
    }

    #[test]
    fn closest_tie_keeps_first_arrival() {
        let records = vec![record("A", "1", 10.0, 20.0), record("B", "1", 10.0, 20.0)];
        let got = closest_in(&records, GeoPoint::new(10.0, 20.0)).unwrap();
        assert_eq!(got.pano_id, "A");
    }

    #[tokio::test]
    async fn closest_on_empty_tile_is_none() {
        let (r, _) = resolver(FakeCoverage::default());
        assert_eq!(r.closest_panorama(1.0, 2.0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn closest_propagates_lookup_failure() {
        let tile = tile_index(1.0, 2.0, 17);
        let coverage = FakeCoverage {
            failing: vec![tile],
            ..FakeCoverage::default()
        };
        let (r, _) = resolver(coverage);
        assert!(r.closest_panorama(1.0, 2.0).await.is_err());
    }

    #[test]
    fn neighbor_selection_filters_and_orders() {
        let origin = record("O", "1", 10.0, 20.0);
        let candidates = vec![
            record("far", "1", 10.0010, 20.0),
            origin.clone(),
            record("dup", "1", 10.0001, 20.0), // ~11 m, inside the separation radius
            record("near", "1", 10.0004, 20.0),
            record("mid", "1", 10.0007, 20.0),
        ];

        let got = select_neighbors(&origin, candidates, 6, 0.025);
        let ids: Vec<&str> = got.iter().map(|r| r.pano_id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid", "far"]);
    }

    #[test]
    fn neighbor_selection_caps_at_limit() {
        let origin = record("O", "1", 10.0, 20.0);
        let candidates: Vec<PanoramaRecord> = (1..=10)
            .map(|i| record(&format!("P{i}"), "1", 10.0 + 0.0005 * i as f64, 20.0))
            .collect();

        let got = select_neighbors(&origin, candidates, 6, 0.025);
        assert_eq!(got.len(), 6);
        let dists: Vec<f64> = got
            .iter()
            .map(|r| great_circle_distance(origin.position(), r.position()))
            .collect();
        assert!(dists.windows(2).all(|w| w[0] <= w[1]));
        assert!(dists.iter().all(|d| *d > 0.025));
    }

    #[test]
    fn same_pano_in_other_region_is_kept() {
        let origin = record("O", "1", 10.0, 20.0);
        let other_region = record("O", "2", 10.0005, 20.0);
        let got = select_neighbors(&origin, vec![other_region.clone()], 6, 0.025);
        assert_eq!(got, vec![other_region]);
    }

    #[tokio::test]
    async fn neighbors_query_the_full_block_and_survive_failures() {
        let origin = record("O", "1", 10.0, 20.0);
        let center = tile_index(origin.lat, origin.lon, 17);
        let east = TileCoordinate::new(center.x + 1, center.y);
        let west = TileCoordinate::new(center.x - 1, center.y);

        let mut coverage = FakeCoverage::default();
        coverage.tiles.insert(center, vec![origin.clone()]);
        coverage
            .tiles
            .insert(east, vec![record("E", "1", 10.0, 20.003)]);
        coverage.failing.push(west);
        let (r, coverage) = resolver(coverage);

        let got = r.neighbors(&origin).await;
        assert_eq!(coverage.queried.lock().len(), 9);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].pano_id, "E");
    }

    #[tokio::test]
    async fn neighbors_never_include_origin() {
        let origin = record("O", "1", 10.0, 20.0);
        let coverage = FakeCoverage::with_records(vec![
            origin.clone(),
            record("O", "1", 10.0, 20.0),
            record("N", "1", 10.0005, 20.0),
        ]);
        let (r, _) = resolver(coverage);

        let got = r.neighbors(&origin).await;
        assert!(got.iter().all(|n| n.composite_id() != origin.composite_id()));
        assert_eq!(got.len(), 1);
    }
}
