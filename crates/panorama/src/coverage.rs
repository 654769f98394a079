//! Coverage index client: which panoramas exist inside a map tile.

use foundation::TileCoordinate;
use tracing::{debug, warn};

use crate::BoxFuture;
use crate::record::PanoramaRecord;

/// Why a coverage query produced no answer.
///
/// An empty tile is not an error: sources return `Ok(vec![])` for it.
#[derive(Debug)]
pub enum CoverageError {
    Request {
        tile: TileCoordinate,
        source: reqwest::Error,
    },
    Status {
        tile: TileCoordinate,
        status: u16,
    },
    Parse {
        tile: TileCoordinate,
        source: serde_json::Error,
    },
}

impl CoverageError {
    pub fn tile(&self) -> TileCoordinate {
        match self {
            CoverageError::Request { tile, .. }
            | CoverageError::Status { tile, .. }
            | CoverageError::Parse { tile, .. } => *tile,
        }
    }
}

impl std::fmt::Display for CoverageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoverageError::Request { tile, source } => {
                write!(f, "coverage request for tile {tile} failed: {source}")
            }
            CoverageError::Status { tile, status } => {
                write!(f, "coverage service returned HTTP {status} for tile {tile}")
            }
            CoverageError::Parse { tile, source } => {
                write!(f, "coverage response for tile {tile} is malformed: {source}")
            }
        }
    }
}

impl std::error::Error for CoverageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CoverageError::Request { source, .. } => Some(source),
            CoverageError::Parse { source, .. } => Some(source),
            CoverageError::Status { .. } => None,
        }
    }
}

pub trait CoverageSource: Send + Sync {
    fn coverage(&self, tile: TileCoordinate)
    -> BoxFuture<'_, Result<Vec<PanoramaRecord>, CoverageError>>;
}

/// Coverage service reached over HTTP: `GET <base>/tiles/coverage/{x}/{y}/`.
pub struct HttpCoverageClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpCoverageClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    pub fn coverage_url(&self, tile: TileCoordinate) -> String {
        format!(
            "{}/tiles/coverage/{}/{}/",
            self.base_url.trim_end_matches('/'),
            tile.x,
            tile.y
        )
    }
}

impl CoverageSource for HttpCoverageClient {
    fn coverage(
        &self,
        tile: TileCoordinate,
    ) -> BoxFuture<'_, Result<Vec<PanoramaRecord>, CoverageError>> {
        let url = self.coverage_url(tile);
        Box::pin(async move {
            let result = fetch_coverage(&self.client, &url, tile).await;
            match &result {
                Ok(records) => debug!("coverage {tile}: {} panoramas", records.len()),
                Err(err) => warn!("{err}"),
            }
            result
        })
    }
}

async fn fetch_coverage(
    client: &reqwest::Client,
    url: &str,
    tile: TileCoordinate,
) -> Result<Vec<PanoramaRecord>, CoverageError> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|source| CoverageError::Request { tile, source })?;

    if !resp.status().is_success() {
        return Err(CoverageError::Status {
            tile,
            status: resp.status().as_u16(),
        });
    }

    let body = resp
        .bytes()
        .await
        .map_err(|source| CoverageError::Request { tile, source })?;

    parse_coverage(&body, tile)
}

/// Parse a coverage response body (a JSON array of panorama objects).
pub fn parse_coverage(
    body: &[u8],
    tile: TileCoordinate,
) -> Result<Vec<PanoramaRecord>, CoverageError> {
    serde_json::from_slice(body).map_err(|source| CoverageError::Parse { tile, source })
}
