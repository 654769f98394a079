//! Panorama records as reported by the coverage service.

use foundation::GeoPoint;
use serde::{Deserialize, Deserializer, Serialize};

/// Prefix the viewer sees on a composite id whose imagery is still loading.
pub const LOADING_PREFIX: char = 'r';

/// Addressable key of a panorama: `"{pano_id}/{region_id}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PanoramaKey {
    pub pano_id: String,
    pub region_id: String,
}

impl PanoramaKey {
    pub fn new(pano_id: impl Into<String>, region_id: impl Into<String>) -> Self {
        Self {
            pano_id: pano_id.into(),
            region_id: region_id.into(),
        }
    }

    /// Parse a composite id. Both halves must be present and non-empty.
    pub fn parse(composite: &str) -> Option<Self> {
        let (pano_id, region_id) = composite.split_once('/')?;
        if pano_id.is_empty() || region_id.is_empty() || region_id.contains('/') {
            return None;
        }
        Some(Self::new(pano_id, region_id))
    }

    pub fn composite_id(&self) -> String {
        format!("{}/{}", self.pano_id, self.region_id)
    }

    /// Composite id with the loading prefix, as handed to the viewer.
    pub fn loading_id(&self) -> String {
        format!("{LOADING_PREFIX}{}", self.composite_id())
    }
}

impl std::fmt::Display for PanoramaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.pano_id, self.region_id)
    }
}

pub fn is_loading_id(id: &str) -> bool {
    id.starts_with(LOADING_PREFIX)
}

/// Strip the loading prefix, or `None` if `id` is not a loading id.
pub fn strip_loading_prefix(id: &str) -> Option<&str> {
    id.strip_prefix(LOADING_PREFIX)
}

/// One discoverable panorama.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanoramaRecord {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(rename = "panoid", deserialize_with = "id_string")]
    pub pano_id: String,
    #[serde(deserialize_with = "id_string")]
    pub region_id: String,
    /// Compass heading in degrees.
    pub heading: f64,
    pub lat: f64,
    pub lon: f64,
}

impl PanoramaRecord {
    pub fn key(&self) -> PanoramaKey {
        PanoramaKey::new(self.pano_id.clone(), self.region_id.clone())
    }

    pub fn composite_id(&self) -> String {
        format!("{}/{}", self.pano_id, self.region_id)
    }

    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }
}

/// Panorama and region ids exceed 2^53, so the service may send them either
/// as strings or as bare integers. Both end up as decimal strings.
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Unsigned(u64),
        Signed(i64),
    }

    Ok(match Repr::deserialize(deserializer)? {
        Repr::Text(s) => s,
        Repr::Unsigned(n) => n.to_string(),
        Repr::Signed(n) => n.to_string(),
    })
}
