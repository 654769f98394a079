//! The surface a street-level viewer exposes to a custom panorama source.

use std::sync::Arc;

use foundation::GeoPoint;
use serde::Serialize;

use crate::descriptor::PanoramaDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostEvent {
    PositionChanged,
    PanoChanged,
    LinksChanged,
}

impl HostEvent {
    pub const ALL: [HostEvent; 3] = [
        HostEvent::PositionChanged,
        HostEvent::PanoChanged,
        HostEvent::LinksChanged,
    ];

    pub fn name(self) -> &'static str {
        match self {
            HostEvent::PositionChanged => "position_changed",
            HostEvent::PanoChanged => "pano_changed",
            HostEvent::LinksChanged => "links_changed",
        }
    }
}

impl std::fmt::Display for HostEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A navigation arrow shown in the viewer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NavigationLink {
    pub pano: String,
    /// Compass bearing of the arrow, degrees clockwise from north.
    pub heading: f64,
    pub description: String,
}

pub type HostListener = Box<dyn Fn() + Send + Sync>;

/// What the viewer asks of a registered panorama source.
pub trait PanoramaProvider: Send + Sync {
    /// Image URL for one tile of panorama `id`.
    fn tile_url(&self, id: &str, zoom: u32, tile_x: u32, tile_y: u32) -> String;

    /// Metadata for panorama `id`, or `None` if the source does not serve it.
    fn descriptor(&self, id: &str) -> Option<PanoramaDescriptor>;
}

/// A street-level viewer that accepts custom panorama sources.
///
/// `push_link` appends to the current link list without raising
/// [`HostEvent::LinksChanged`].
pub trait PanoramaHost: Send + Sync {
    fn register_panorama_provider(&self, provider: Arc<dyn PanoramaProvider>);
    fn add_listener(&self, event: HostEvent, listener: HostListener);
    fn pano(&self) -> Option<String>;
    fn set_pano(&self, id: &str);
    fn position(&self) -> Option<GeoPoint>;
    fn links(&self) -> Vec<NavigationLink>;
    fn push_link(&self, link: NavigationLink);
}
