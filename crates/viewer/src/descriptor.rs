use std::sync::Arc;

use panorama::{PanoramaConfig, ResolutionProfile};
use serde::Serialize;

use crate::host::NavigationLink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DescriptorLocation {
    pub pano: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
}

/// `(id, zoom, tile_x, tile_y) -> url`
#[derive(Clone)]
pub struct TileUrlCallback(Arc<dyn Fn(&str, u32, u32, u32) -> String + Send + Sync>);

impl TileUrlCallback {
    pub fn new(f: impl Fn(&str, u32, u32, u32) -> String + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn call(&self, id: &str, zoom: u32, tile_x: u32, tile_y: u32) -> String {
        (self.0)(id, zoom, tile_x, tile_y)
    }
}

impl std::fmt::Debug for TileUrlCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TileUrlCallback")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TileSet {
    pub tile_size: Size,
    pub world_size: Size,
    pub center_heading: f64,
    #[serde(skip)]
    pub tile_url: TileUrlCallback,
}

/// Everything the viewer needs to display one panorama.
#[derive(Debug, Clone, Serialize)]
pub struct PanoramaDescriptor {
    pub location: DescriptorLocation,
    pub links: Vec<NavigationLink>,
    pub copyright: String,
    pub tiles: TileSet,
}

/// Equirectangular frame size for a profile: the four cropped faces side by
/// side, padded vertically by `extension_factor`.
pub fn world_size(profile: &ResolutionProfile, extension_factor: f64) -> Size {
    Size::new(
        profile.full_width(),
        profile.canvas_height(extension_factor),
    )
}

/// One of the four columns of the frame.
pub fn tile_size(profile: &ResolutionProfile, extension_factor: f64) -> Size {
    let world = world_size(profile, extension_factor);
    Size::new(
        (f64::from(world.width) / 4.0).round() as u32,
        world.height,
    )
}

pub fn build_descriptor(
    id: &str,
    config: &PanoramaConfig,
    center_heading: f64,
    position: Option<(f64, f64)>,
    tile_url: TileUrlCallback,
) -> PanoramaDescriptor {
    let profile = &config.resolution;
    PanoramaDescriptor {
        location: DescriptorLocation {
            pano: id.to_string(),
            description: config.description.clone(),
            lat: position.map(|(lat, _)| lat),
            lon: position.map(|(_, lon)| lon),
        },
        links: Vec::new(),
        copyright: config.copyright.clone(),
        tiles: TileSet {
            tile_size: tile_size(profile, config.extension_factor),
            world_size: world_size(profile, config.extension_factor),
            center_heading,
            tile_url,
        },
    }
}

#[cfg(test)]
mod tests {
    use panorama::{PanoramaConfig, RESOLUTION_PROFILES};
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn sizes_for_default_tier() {
        let config = PanoramaConfig::default();
        let world = world_size(&config.resolution, config.extension_factor);
        // 2*2816 + 2*1536 - 4*128
        assert_eq!(world.width, 8192);
        assert_eq!(world.height, 4096);
        assert_eq!(
            tile_size(&config.resolution, config.extension_factor),
            Size::new(2048, 4096)
        );
    }

    #[test]
    fn every_tier_is_two_to_one() {
        for profile in RESOLUTION_PROFILES.iter() {
            let world = world_size(profile, panorama::DEFAULT_EXTENSION_FACTOR);
            assert_eq!(world.width, 2 * world.height, "{profile:?}");
        }
    }

    #[test]
    fn descriptor_carries_heading_and_callback() {
        let config = PanoramaConfig::default();
        let descriptor = build_descriptor(
            "42/7",
            &config,
            135.0,
            Some((1.0, 2.0)),
            TileUrlCallback::new(|id, _, x, _| format!("{id}#{x}")),
        );

        assert_eq!(descriptor.copyright, "(C) Apple");
        assert_eq!(descriptor.location.description, "Apple Look Around");
        assert_eq!(descriptor.tiles.center_heading, 135.0);
        assert_eq!(descriptor.tiles.tile_url.call("42/7", 0, 3, 0), "42/7#3");

        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["tiles"]["world_size"]["width"], 8192);
        assert_eq!(json["location"]["lat"], 1.0);
        assert!(json["tiles"].get("tile_url").is_none());
    }
}
