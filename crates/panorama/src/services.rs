use std::sync::Arc;

use crate::capability::{CapabilityProvider, SessionHandshake};
use crate::config::PanoramaConfig;
use crate::coverage::HttpCoverageClient;
use crate::imagery::{AutoDecoder, HttpTileTransport, ImageryPipeline};
use crate::loader::PanoramaLoader;
use crate::resolver::PanoramaResolver;
use crate::round::RoundState;

/// Resolver and loader wired against the live coverage and tile services,
/// sharing one HTTP client and one round state.
#[derive(Clone)]
pub struct PanoramaServices {
    pub config: Arc<PanoramaConfig>,
    pub resolver: PanoramaResolver,
    pub loader: PanoramaLoader,
}

impl PanoramaServices {
    pub fn http<H>(config: PanoramaConfig, handshake: H) -> Self
    where
        H: SessionHandshake + 'static,
    {
        let config = Arc::new(config);
        let client = reqwest::Client::new();

        let coverage = Arc::new(HttpCoverageClient::with_client(
            config.base_url.clone(),
            client.clone(),
        ));
        let resolver = PanoramaResolver::new(coverage, &config);

        let pipeline = ImageryPipeline::new(
            Arc::new(CapabilityProvider::new(handshake)),
            Arc::new(HttpTileTransport::with_client(client)),
            Arc::new(AutoDecoder),
            config.clone(),
        );
        let loader = PanoramaLoader::new(Arc::new(RoundState::new()), pipeline);

        Self {
            config,
            resolver,
            loader,
        }
    }

    pub fn state(&self) -> &Arc<RoundState> {
        self.loader.state()
    }
}
