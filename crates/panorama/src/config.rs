//! Static configuration for coverage lookup and tile stitching.
//!
//! Every field has a default, so a config file only needs the values it
//! changes. `PanoramaConfig::from_env` layers `LOOKAROUND_*` environment
//! variables on top of the defaults.

use std::env;

use serde::{Deserialize, Serialize};

/// Pixel size of one provider face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceSize {
    pub width: u32,
    pub height: u32,
}

impl FaceSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Tile dimensions for one resolution tier.
///
/// Quadrants 0 and 2 use the `big` face, quadrants 1 and 3 the `small` one.
/// Every face overlaps its right-hand neighbor by `overlap` pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionProfile {
    pub big: FaceSize,
    pub small: FaceSize,
    pub overlap: u32,
}

impl ResolutionProfile {
    pub const fn new(big: FaceSize, small: FaceSize, overlap: u32) -> Self {
        Self {
            big,
            small,
            overlap,
        }
    }

    pub fn face(&self, quadrant: u8) -> FaceSize {
        if is_narrow_quadrant(quadrant) {
            self.small
        } else {
            self.big
        }
    }

    /// Face width with the overlap cut off.
    pub fn cropped_width(&self, quadrant: u8) -> u32 {
        self.face(quadrant).width.saturating_sub(self.overlap)
    }

    /// Width of the stitched equirectangular frame.
    pub fn full_width(&self) -> u32 {
        (2 * self.big.width + 2 * self.small.width).saturating_sub(4 * self.overlap)
    }

    /// Height of the padded frame for a given vertical extension factor.
    pub fn canvas_height(&self, extension_factor: f64) -> u32 {
        (extension_factor * self.big.height as f64).round() as u32
    }
}

pub fn is_narrow_quadrant(quadrant: u8) -> bool {
    quadrant == 1 || quadrant == 3
}

/// Provider resolution tiers, 0 is the sharpest.
pub const RESOLUTION_PROFILES: [ResolutionProfile; 8] = [
    ResolutionProfile::new(FaceSize::new(5632, 4352), FaceSize::new(3072, 4352), 256),
    ResolutionProfile::new(FaceSize::new(4224, 3264), FaceSize::new(2304, 3264), 192),
    ResolutionProfile::new(FaceSize::new(2816, 2176), FaceSize::new(1536, 2176), 128),
    ResolutionProfile::new(FaceSize::new(2112, 1632), FaceSize::new(1152, 1632), 96),
    ResolutionProfile::new(FaceSize::new(1408, 1088), FaceSize::new(768, 1088), 64),
    ResolutionProfile::new(FaceSize::new(1056, 816), FaceSize::new(576, 816), 48),
    ResolutionProfile::new(FaceSize::new(704, 544), FaceSize::new(384, 544), 32),
    ResolutionProfile::new(FaceSize::new(528, 408), FaceSize::new(288, 408), 24),
];

/// Faces cover less than the full vertical field of view. Scaling the face
/// height by 32/17 pads every tier to a 2:1 equirectangular frame.
pub const DEFAULT_EXTENSION_FACTOR: f64 = 32.0 / 17.0;

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    UnknownResolutionTier(u8),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::UnknownResolutionTier(t) => {
                write!(
                    f,
                    "unknown resolution tier {t} (expected 0..={})",
                    RESOLUTION_PROFILES.len() - 1
                )
            }
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanoramaConfig {
    /// Tier requested from the tile endpoint.
    pub resolution_tier: u8,
    /// Pixel profile used for stitching; normally `RESOLUTION_PROFILES[resolution_tier]`.
    pub resolution: ResolutionProfile,
    pub extension_factor: f64,
    /// Degrees added to the provider heading before handing it to the viewer.
    pub heading_calibration: f64,
    /// Coverage service root, with trailing slash.
    pub base_url: String,
    /// Prepended to authorized tile URLs.
    pub cors_proxy: String,
    pub tile_endpoint: String,
    pub coverage_zoom: u8,
    pub neighbor_limit: usize,
    /// Neighbors at or below this distance (km) are treated as duplicates.
    pub min_neighbor_separation_km: f64,
    pub jpeg_quality: u8,
    pub copyright: String,
    pub description: String,
}

impl Default for PanoramaConfig {
    fn default() -> Self {
        let resolution_tier = 2;
        Self {
            resolution_tier,
            resolution: RESOLUTION_PROFILES[resolution_tier as usize],
            extension_factor: DEFAULT_EXTENSION_FACTOR,
            heading_calibration: 0.0,
            base_url: "https://lookaround-map.herokuapp.com/".to_string(),
            cors_proxy: String::new(),
            tile_endpoint: "https://gspe72-ssl.ls.apple.com/mnn_us/".to_string(),
            coverage_zoom: 17,
            neighbor_limit: 6,
            min_neighbor_separation_km: 0.025,
            jpeg_quality: 85,
            copyright: "(C) Apple".to_string(),
            description: "Apple Look Around".to_string(),
        }
    }
}

impl PanoramaConfig {
    /// Select a tier from the built-in profile table.
    pub fn with_resolution_tier(mut self, tier: u8) -> Result<Self, ConfigError> {
        let profile = RESOLUTION_PROFILES
            .get(tier as usize)
            .ok_or(ConfigError::UnknownResolutionTier(tier))?;
        self.resolution_tier = tier;
        self.resolution = *profile;
        Ok(self)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let cfg: Self =
            serde_json::from_str(raw).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let tier = env_var_u8("LOOKAROUND_RESOLUTION_TIER", defaults.resolution_tier);
        let mut cfg = defaults.with_resolution_tier(tier)?;

        cfg.extension_factor = env_var_f64("LOOKAROUND_EXTENSION_FACTOR", cfg.extension_factor);
        cfg.heading_calibration =
            env_var_f64("LOOKAROUND_HEADING_CALIBRATION", cfg.heading_calibration);
        cfg.base_url = env::var("LOOKAROUND_BASE_URL").unwrap_or(cfg.base_url);
        cfg.cors_proxy = env::var("LOOKAROUND_CORS_PROXY").unwrap_or(cfg.cors_proxy);
        cfg.tile_endpoint = env::var("LOOKAROUND_TILE_ENDPOINT").unwrap_or(cfg.tile_endpoint);
        cfg.jpeg_quality = env_var_u8("LOOKAROUND_JPEG_QUALITY", cfg.jpeg_quality);

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.extension_factor >= 1.0 && self.extension_factor.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "extension_factor must be >= 1.0, got {}",
                self.extension_factor
            )));
        }
        if self.coverage_zoom > 24 {
            return Err(ConfigError::Invalid(format!(
                "coverage_zoom {} out of range",
                self.coverage_zoom
            )));
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(ConfigError::Invalid(format!(
                "jpeg_quality must be 1..=100, got {}",
                self.jpeg_quality
            )));
        }
        if self.resolution.overlap >= self.resolution.small.width {
            return Err(ConfigError::Invalid(
                "overlap must be narrower than the small face".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_var_u8(key: &str, default: u8) -> u8 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
