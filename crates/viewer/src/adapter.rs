//! Feeds provider panoramas into a [`PanoramaHost`].
//!
//! The host drives everything through three events:
//!
//! * `position_changed` starts a round: the closest panorama is resolved and
//!   the host is pointed at its loading id (`r{pano}/{region}`).
//! * `pano_changed` on a loading id fetches and stitches the imagery, then
//!   points the host at the plain composite id so it re-renders.
//! * `links_changed` on a loaded panorama adds the neighbors as arrows.
//!
//! Every reaction first checks the persisted toggle and swallows its own
//! failures after logging them.

use std::sync::{Arc, Weak};

use foundation::{initial_bearing, normalize_degrees};
use panorama::{
    JPEG_DATA_URL_PREFIX, LoadOutcome, PanoramaKey, PanoramaRecord, PanoramaServices,
    is_loading_id, strip_loading_prefix,
};
use settings::FeatureToggle;
use tracing::{debug, info, warn};

use crate::descriptor::{PanoramaDescriptor, TileUrlCallback, build_descriptor};
use crate::host::{HostEvent, NavigationLink, PanoramaHost, PanoramaProvider};

pub struct LookAroundAdapter {
    host: Weak<dyn PanoramaHost>,
    toggle: FeatureToggle,
    services: PanoramaServices,
}

impl LookAroundAdapter {
    /// Register as the host's panorama provider and subscribe to its events.
    ///
    /// Returns `None` and leaves the host untouched when the toggle is off
    /// or no tokio runtime is available to run the reactions on.
    pub fn install(
        host: &Arc<dyn PanoramaHost>,
        toggle: FeatureToggle,
        services: PanoramaServices,
    ) -> Option<Arc<Self>> {
        if !toggle.is_enabled() {
            info!("{} is off, leaving the viewer untouched", toggle.key());
            return None;
        }
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(err) => {
                warn!("cannot install panorama adapter: {err}");
                return None;
            }
        };

        let adapter = Arc::new(Self::new(host, toggle, services));
        host.register_panorama_provider(adapter.clone());

        for event in HostEvent::ALL {
            let adapter = adapter.clone();
            let runtime = runtime.clone();
            host.add_listener(
                event,
                Box::new(move || {
                    let adapter = adapter.clone();
                    runtime.spawn(async move { adapter.handle(event).await });
                }),
            );
        }
        info!("panorama adapter installed");
        Some(adapter)
    }

    /// An adapter that is not attached to the host's events.
    pub fn new(
        host: &Arc<dyn PanoramaHost>,
        toggle: FeatureToggle,
        services: PanoramaServices,
    ) -> Self {
        Self {
            host: Arc::downgrade(host),
            toggle,
            services,
        }
    }

    pub fn services(&self) -> &PanoramaServices {
        &self.services
    }

    pub async fn handle(&self, event: HostEvent) {
        debug!("host event {event}");
        match event {
            HostEvent::PositionChanged => self.on_position_changed().await,
            HostEvent::PanoChanged => self.on_pano_changed().await,
            HostEvent::LinksChanged => self.on_links_changed(),
        }
    }

    fn active_host(&self) -> Option<Arc<dyn PanoramaHost>> {
        if !self.toggle.is_enabled() {
            return None;
        }
        self.host.upgrade()
    }

    fn calibrated_heading(&self, record: &PanoramaRecord) -> f64 {
        normalize_degrees(record.heading + self.services.config.heading_calibration)
    }

    pub async fn on_position_changed(&self) {
        let Some(host) = self.active_host() else {
            return;
        };
        let state = self.services.state();
        let round = state.begin_round();

        let Some(position) = host.position() else {
            debug!("round {round}: host has no position yet");
            return;
        };

        let closest = match self
            .services
            .resolver
            .closest_panorama(position.lat, position.lon)
            .await
        {
            Ok(Some(record)) => record,
            Ok(None) => {
                info!(
                    "round {round}: no coverage at {:.6},{:.6}",
                    position.lat, position.lon
                );
                return;
            }
            Err(err) => {
                warn!("round {round}: coverage lookup failed: {err}");
                return;
            }
        };
        if state.round() != round {
            return;
        }
        state.set_origin(closest.clone(), self.calibrated_heading(&closest));

        let key = closest.key();
        info!("round {round}: starting at {key}");
        host.set_pano(&key.loading_id());

        let neighbors = self.services.resolver.neighbors(&closest).await;
        // A link may have been followed meanwhile; its load refreshes the list.
        if state.round() == round && state.origin().is_some_and(|o| o.key() == key) {
            state.set_neighbors(neighbors);
        }
    }

    pub async fn on_pano_changed(&self) {
        let Some(host) = self.active_host() else {
            return;
        };
        let mut requested = host.pano();
        while let Some(id) = requested.take() {
            requested = self.load_requested(host.as_ref(), &id).await;
        }
    }

    /// Load the panorama behind loading id `id`.
    ///
    /// Returns the loading id the host moved to while the load ran, if any;
    /// that request found the guard taken and still has to be served.
    async fn load_requested(&self, host: &dyn PanoramaHost, id: &str) -> Option<String> {
        let composite = strip_loading_prefix(id)?;
        let state = self.services.state();
        if state.is_tracked(id) {
            return None;
        }
        let Some(key) = PanoramaKey::parse(composite) else {
            warn!("ignoring malformed panorama id {id:?}");
            return None;
        };
        let Some(ticket) = self.services.loader.try_begin(&key) else {
            debug!("{key}: another load is in flight");
            return None;
        };
        state.track_pano(id);

        // Arrived by following a link.
        if let Some(neighbor) = state.neighbor(&key) {
            let heading = self.calibrated_heading(&neighbor);
            state.set_origin(neighbor, heading);
        }

        let round = ticket.round();
        match self.services.loader.finish(ticket).await {
            LoadOutcome::Committed { loaded } => {
                if loaded == 0 {
                    warn!("{key}: no imagery could be loaded");
                }
                if let Some(origin) = state.origin() {
                    let neighbors = self.services.resolver.neighbors(&origin).await;
                    if state.round() == round {
                        state.set_neighbors(neighbors);
                    }
                }

                let now = host.pano();
                if now.as_deref() == Some(id) {
                    host.set_pano(&key.composite_id());
                    return None;
                }
                debug!("host moved to {now:?} while {key} loaded");
                now.filter(|next| is_loading_id(next))
            }
            LoadOutcome::Skipped => {
                debug!("{key}: load skipped");
                None
            }
            LoadOutcome::Stale => {
                debug!("{key}: load outlived its round");
                None
            }
        }
    }

    pub fn on_links_changed(&self) {
        let Some(host) = self.active_host() else {
            return;
        };
        let Some(id) = host.pano() else {
            return;
        };
        if is_loading_id(&id) {
            return;
        }

        let existing: Vec<String> = host.links().into_iter().map(|l| l.pano).collect();
        for link in self.neighbor_links() {
            if !existing.contains(&link.pano) {
                host.push_link(link);
            }
        }
    }

    /// Arrows towards the pending neighbors, pointing at their loading ids.
    pub fn neighbor_links(&self) -> Vec<NavigationLink> {
        let state = self.services.state();
        let Some(from) = state.location() else {
            return Vec::new();
        };
        state
            .neighbors()
            .into_iter()
            .filter(|n| !n.pano_id.is_empty())
            .map(|n| NavigationLink {
                pano: n.key().loading_id(),
                heading: initial_bearing(from, n.position()),
                description: self.services.config.description.clone(),
            })
            .collect()
    }
}

impl PanoramaProvider for LookAroundAdapter {
    fn tile_url(&self, id: &str, _zoom: u32, tile_x: u32, _tile_y: u32) -> String {
        if is_loading_id(id) {
            return JPEG_DATA_URL_PREFIX.to_string();
        }
        self.services
            .state()
            .tile(tile_x as usize)
            .unwrap_or_else(|| JPEG_DATA_URL_PREFIX.to_string())
    }

    fn descriptor(&self, id: &str) -> Option<PanoramaDescriptor> {
        let state = self.services.state().clone();
        let position = state.location().map(|p| (p.lat, p.lon));
        let tile_url = TileUrlCallback::new(move |id, _zoom, tile_x, _tile_y| {
            if is_loading_id(id) {
                return JPEG_DATA_URL_PREFIX.to_string();
            }
            state
                .tile(tile_x as usize)
                .unwrap_or_else(|| JPEG_DATA_URL_PREFIX.to_string())
        });
        Some(build_descriptor(
            id,
            &self.services.config,
            self.services.state().heading(),
            position,
            tile_url,
        ))
    }
}
