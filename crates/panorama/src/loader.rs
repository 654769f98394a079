use std::sync::Arc;

use tracing::{debug, info};

use crate::imagery::ImageryPipeline;
use crate::record::PanoramaKey;
use crate::round::{LoadOutcome, LoadTicket, RoundState};

/// Guarded panorama loads: at most one at a time, never the same one twice.
#[derive(Clone)]
pub struct PanoramaLoader {
    state: Arc<RoundState>,
    pipeline: ImageryPipeline,
}

impl PanoramaLoader {
    pub fn new(state: Arc<RoundState>, pipeline: ImageryPipeline) -> Self {
        Self { state, pipeline }
    }

    pub fn state(&self) -> &Arc<RoundState> {
        &self.state
    }

    pub fn pipeline(&self) -> &ImageryPipeline {
        &self.pipeline
    }

    pub async fn load(&self, key: PanoramaKey) -> LoadOutcome {
        let Some(ticket) = self.try_begin(&key) else {
            debug!("load of {key} skipped (already loaded or busy)");
            return LoadOutcome::Skipped;
        };
        self.finish(ticket).await
    }

    /// Claim the load guard without fetching anything yet.
    pub fn try_begin(&self, key: &PanoramaKey) -> Option<LoadTicket> {
        self.state.begin_load(key)
    }

    /// Fetch and commit the panorama a ticket was issued for.
    pub async fn finish(&self, ticket: LoadTicket) -> LoadOutcome {
        let key = ticket.key.clone();
        info!("loading panorama {key}");
        let tiles = self.pipeline.fetch_panorama(&key).await;
        let outcome = self.state.commit(ticket, tiles);
        info!("panorama {key}: {outcome:?}");
        outcome
    }
}
