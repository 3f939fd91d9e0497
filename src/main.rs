use anyhow::{Context, Error};
use apsbid::app::adapter::{AdLoadRequest, Adapter, PreBidRequest};
use apsbid::core::auction::SimulatedAuctionClient;
use apsbid::core::config_manager::ConfigManager;
use apsbid::core::observability;
use mimalloc::MiMalloc;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const DEFAULT_CONFIG_PATH: &str = "apsbid.yaml";

/// Runs one setup, pre-bid and load round for every configured
/// placement against the simulated auction SDK
#[tokio::main]
async fn main() -> Result<(), Error> {
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    let manager = ConfigManager::new(path);
    manager
        .start()
        .with_context(|| format!("failed to load config {}", manager.path().display()))?;

    let cfg = manager.get()?.clone();
    let telemetry = observability::init(&cfg.logging)?;

    let client = Arc::new(SimulatedAuctionClient::new(cfg.simulator.clone())?);
    let adapter = Adapter::new(client, cfg.adapter.clone());

    adapter.setup(&cfg.partner).await?;

    for placement in adapter.registry().placements() {
        let Some(bidder) = adapter.registry().bidder(&placement) else {
            continue;
        };
        let format = bidder.slot().format();

        let request = PreBidRequest {
            placement: placement.clone(),
            format,
        };

        match adapter.fetch_bidder_info(&request).await {
            Ok(info) => info!("Pre-bid for {}: {:?}", placement, info),
            Err(e) => {
                warn!("No pre-bid for {}: {}", placement, e);
                continue;
            }
        }

        let load = AdLoadRequest { placement, format };
        match adapter.make_ad(&load) {
            Ok(ad) => info!(
                "Loaded {} {} at {} with {} hints",
                ad.format,
                ad.placement,
                ad.price_point,
                ad.payload.len()
            ),
            Err(e) => warn!("Load failed for {}: {}", load.placement, e),
        }
    }

    observability::shutdown(telemetry)
}
