//! Quadrant tile fetching, format conversion and compositing.
//!
//! A panorama is served as four faces. Each face is fetched through the
//! capability provider, decoded from the provider's encoding, cropped by the
//! profile overlap, padded vertically onto a black canvas, and handed back as
//! a base64 JPEG data URL.

use std::sync::Arc;

use base64::Engine as _;
use futures_util::future::join_all;
use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use tracing::{debug, warn};

use crate::BoxFuture;
use crate::capability::{CapabilityError, UrlAuthorizer};
use crate::config::{PanoramaConfig, ResolutionProfile};
use crate::record::PanoramaKey;

pub const QUADRANTS: [u8; 4] = [0, 1, 2, 3];

/// Data URL prefix for stitched faces; on its own it is the blank placeholder.
pub const JPEG_DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

#[derive(Debug)]
pub enum TileError {
    InvalidId(String),
    Authorization(CapabilityError),
    Request(reqwest::Error),
    Status(u16),
    Decode(String),
    Encode(image::ImageError),
    Worker(tokio::task::JoinError),
}

impl std::fmt::Display for TileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TileError::InvalidId(id) => write!(f, "panorama id not addressable: {id}"),
            TileError::Authorization(err) => write!(f, "{err}"),
            TileError::Request(err) => write!(f, "tile request failed: {err}"),
            TileError::Status(status) => write!(f, "tile endpoint returned HTTP {status}"),
            TileError::Decode(msg) => write!(f, "tile decode failed: {msg}"),
            TileError::Encode(err) => write!(f, "tile encode failed: {err}"),
            TileError::Worker(err) => write!(f, "tile worker failed: {err}"),
        }
    }
}

impl std::error::Error for TileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TileError::Authorization(err) => Some(err),
            TileError::Request(err) => Some(err),
            TileError::Encode(err) => Some(err),
            TileError::Worker(err) => Some(err),
            _ => None,
        }
    }
}

/// Unsigned tile path for one quadrant.
///
/// The panorama id is zero-padded to 20 digits and split into five groups of
/// four; the region id is zero-padded to 10 digits.
pub fn tile_url(
    endpoint: &str,
    key: &PanoramaKey,
    quadrant: u8,
    tier: u8,
) -> Result<String, TileError> {
    let digits = |s: &str, width: usize| !s.is_empty() && s.len() <= width && s.bytes().all(|b| b.is_ascii_digit());
    if !digits(&key.pano_id, 20) || !digits(&key.region_id, 10) {
        return Err(TileError::InvalidId(key.composite_id()));
    }

    let pano = format!("{:0>20}", key.pano_id);
    let groups: Vec<&str> = (0..5).map(|i| &pano[i * 4..i * 4 + 4]).collect();

    Ok(format!(
        "{endpoint}{}/{:0>10}/t/{quadrant}/{tier}",
        groups.join("/"),
        key.region_id
    ))
}

/// Raw byte transport for tile requests.
pub trait TileTransport: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, TileError>>;
}

pub struct HttpTileTransport {
    client: reqwest::Client,
}

impl HttpTileTransport {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpTileTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TileTransport for HttpTileTransport {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, TileError>> {
        Box::pin(async move {
            let resp = self
                .client
                .get(url)
                .send()
                .await
                .map_err(TileError::Request)?;
            if !resp.status().is_success() {
                return Err(TileError::Status(resp.status().as_u16()));
            }
            let bytes = resp.bytes().await.map_err(TileError::Request)?;
            Ok(bytes.to_vec())
        })
    }
}

/// Converts a fetched tile into an RGB raster. Runs on the blocking pool.
pub trait TileDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<RgbImage, TileError>;
}

/// Any format the `image` crate was built with (JPEG, PNG).
#[derive(Debug, Default, Clone, Copy)]
pub struct RasterDecoder;

impl TileDecoder for RasterDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<RgbImage, TileError> {
        image::load_from_memory(bytes)
            .map(|img| img.to_rgb8())
            .map_err(|e| TileError::Decode(e.to_string()))
    }
}

#[cfg(feature = "heif")]
pub use heif::HeifDecoder;

#[cfg(feature = "heif")]
mod heif {
    use image::RgbImage;
    use libheif_rs::{ColorSpace, HeifContext, LibHeif, RgbChroma};

    use super::{TileDecoder, TileError};

    /// HEIC/HEIF tiles via libheif.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct HeifDecoder;

    impl TileDecoder for HeifDecoder {
        fn decode(&self, bytes: &[u8]) -> Result<RgbImage, TileError> {
            let err = |e: libheif_rs::HeifError| TileError::Decode(e.to_string());

            let lib = LibHeif::new();
            let ctx = HeifContext::read_from_bytes(bytes).map_err(err)?;
            let handle = ctx.primary_image_handle().map_err(err)?;
            let decoded = lib
                .decode(&handle, ColorSpace::Rgb(RgbChroma::Rgb), None)
                .map_err(err)?;

            let planes = decoded.planes();
            let plane = planes
                .interleaved
                .ok_or_else(|| TileError::Decode("no interleaved RGB plane".to_string()))?;

            let row_bytes = plane.width as usize * 3;
            let mut out = RgbImage::new(plane.width, plane.height);
            for (dst, src) in out
                .chunks_exact_mut(row_bytes)
                .zip(plane.data.chunks(plane.stride))
            {
                dst.copy_from_slice(&src[..row_bytes]);
            }
            Ok(out)
        }
    }
}

/// HEIF/ISO-BMFF containers carry an `ftyp` box at offset 4.
pub fn is_heif(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[4..8] == b"ftyp"
}

/// Picks the decoder by sniffing the payload.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoDecoder;

impl TileDecoder for AutoDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<RgbImage, TileError> {
        if is_heif(bytes) {
            #[cfg(feature = "heif")]
            return HeifDecoder.decode(bytes);
            #[cfg(not(feature = "heif"))]
            return Err(TileError::Decode(
                "HEIC tile received but HEIF support is not compiled in (enable the `heif` feature)"
                    .to_string(),
            ));
        }
        RasterDecoder.decode(bytes)
    }
}

/// Crop the overlap off a face and center it vertically on a black canvas.
///
/// The canvas is `cropped_width(quadrant)` wide and
/// `round(extension_factor * big.height)` tall; anything of the face beyond
/// the canvas is cut off.
pub fn composite(
    face: &RgbImage,
    quadrant: u8,
    profile: &ResolutionProfile,
    extension_factor: f64,
) -> RgbImage {
    let width = profile.cropped_width(quadrant);
    let height = profile.canvas_height(extension_factor);
    let mut canvas = RgbImage::new(width, height);

    let top = (height as i64 - profile.big.height as i64) / 2;
    image::imageops::overlay(&mut canvas, face, 0, top);
    canvas
}

pub fn encode_data_url(canvas: &RgbImage, quality: u8) -> Result<String, TileError> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality)
        .encode_image(canvas)
        .map_err(TileError::Encode)?;
    Ok(format!(
        "{JPEG_DATA_URL_PREFIX}{}",
        base64::engine::general_purpose::STANDARD.encode(&jpeg)
    ))
}

/// Decode a data URL produced by [`encode_data_url`] back into pixels.
pub fn decode_data_url(data_url: &str) -> Result<RgbImage, TileError> {
    let payload = data_url
        .strip_prefix(JPEG_DATA_URL_PREFIX)
        .ok_or_else(|| TileError::Decode("not a JPEG data URL".to_string()))?;
    let jpeg = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| TileError::Decode(e.to_string()))?;
    RasterDecoder.decode(&jpeg)
}

/// The four stitched faces of one panorama, by quadrant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StitchedTiles {
    slots: [Option<String>; 4],
}

impl StitchedTiles {
    pub fn new(slots: [Option<String>; 4]) -> Self {
        Self { slots }
    }

    pub fn get(&self, column: usize) -> Option<&str> {
        self.slots.get(column)?.as_deref()
    }

    pub fn loaded_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.loaded_count() == self.slots.len()
    }

    pub fn into_slots(self) -> [Option<String>; 4] {
        self.slots
    }
}

/// Fetch, convert and stitch the four quadrant tiles of a panorama.
#[derive(Clone)]
pub struct ImageryPipeline {
    authorizer: Arc<dyn UrlAuthorizer>,
    transport: Arc<dyn TileTransport>,
    decoder: Arc<dyn TileDecoder>,
    config: Arc<PanoramaConfig>,
}

impl ImageryPipeline {
    pub fn new(
        authorizer: Arc<dyn UrlAuthorizer>,
        transport: Arc<dyn TileTransport>,
        decoder: Arc<dyn TileDecoder>,
        config: Arc<PanoramaConfig>,
    ) -> Self {
        Self {
            authorizer,
            transport,
            decoder,
            config,
        }
    }

    pub fn config(&self) -> &PanoramaConfig {
        &self.config
    }

    pub async fn fetch_quadrant(&self, key: &PanoramaKey, quadrant: u8) -> Result<String, TileError> {
        let raw = tile_url(
            &self.config.tile_endpoint,
            key,
            quadrant,
            self.config.resolution_tier,
        )?;
        let signed = self
            .authorizer
            .authorize(&raw)
            .await
            .map_err(TileError::Authorization)?;
        let url = format!("{}{}", self.config.cors_proxy, signed);

        let bytes = self.transport.fetch(&url).await?;
        debug!("fetched {key} quadrant {quadrant}: {} bytes", bytes.len());

        let decoder = self.decoder.clone();
        let profile = self.config.resolution;
        let extension = self.config.extension_factor;
        let quality = self.config.jpeg_quality;

        // Completion of the join handle is the signal that drawing finished.
        tokio::task::spawn_blocking(move || {
            let face = decoder.decode(&bytes)?;
            let canvas = composite(&face, quadrant, &profile, extension);
            encode_data_url(&canvas, quality)
        })
        .await
        .map_err(TileError::Worker)?
    }

    /// All four quadrants concurrently. Failed quadrants are logged and left
    /// empty; they never abort the others.
    pub async fn fetch_panorama(&self, key: &PanoramaKey) -> StitchedTiles {
        let results = join_all(QUADRANTS.iter().map(|&q| self.fetch_quadrant(key, q))).await;

        let mut slots: [Option<String>; 4] = Default::default();
        for ((slot, quadrant), result) in slots.iter_mut().zip(QUADRANTS).zip(results) {
            match result {
                Ok(url) => *slot = Some(url),
                Err(err) => warn!("{key} quadrant {quadrant} unavailable: {err}"),
            }
        }
        StitchedTiles::new(slots)
    }
}
