use crate::app::config::SimulatorConfig;
use crate::core::auction::client::{
    AuctionClient, AuctionCompletion, AuctionRequest, GdprConsent, US_PRIVACY_KEY,
};
use crate::core::models::bid::Payload;
use crate::core::models::slot::AdSize;
use crate::core::spec::errors::partner_codes;
use anyhow::{Error, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::Handle;
use tracing::debug;
use uuid::Uuid;

fn size_tag(size: &AdSize) -> String {
    match size {
        AdSize::Banner { width, height } => format!("{}x{}", width, height),
        AdSize::Video { width, height } => format!("v{}x{}", width, height),
        AdSize::Interstitial => "i".to_string(),
        AdSize::InterstitialVideo => "iv".to_string(),
    }
}

/// Builds a fake price point and hints shaped like the partner's
fn generate_bid(request: &AuctionRequest, price_buckets: u32, test_mode: bool) -> (String, Payload) {
    let bucket = rand::random_range(1..=price_buckets.max(1));
    let price_point = format!("amzn_{}p{}", size_tag(&request.size), bucket);

    let mut hints = Payload::new();
    hints.insert("amzn_b".into(), Uuid::new_v4().to_string().into());
    hints.insert("amzn_h".into(), "aax-us-east.amazon-adsystem.com".into());
    hints.insert("amznslots".into(), price_point.clone().into());
    hints.insert("slot".into(), request.partner_placement.clone().into());
    if let Some(us_privacy) = request.custom_targeting.get(US_PRIVACY_KEY) {
        hints.insert(US_PRIVACY_KEY.into(), us_privacy.clone().into());
    }
    if test_mode {
        hints.insert("amzn_test".into(), "1".into());
    }

    (price_point, hints)
}

/// Stand-in for the partner SDK used by the demo binary. Answers
/// every request from the tokio runtime after a fixed latency.
pub struct SimulatedAuctionClient {
    config: SimulatorConfig,
    runtime: Handle,
    ready: AtomicBool,
    test_mode: AtomicBool,
    verbose_logging: AtomicBool,
    gdpr: Mutex<Option<GdprConsent>>,
}

impl SimulatedAuctionClient {
    /// Must be created from within a tokio runtime
    pub fn new(config: SimulatorConfig) -> Result<Self, Error> {
        config.validate()?;

        Ok(Self {
            config,
            runtime: Handle::try_current()?,
            ready: AtomicBool::new(false),
            test_mode: AtomicBool::new(false),
            verbose_logging: AtomicBool::new(false),
            gdpr: Mutex::new(None),
        })
    }

    pub fn gdpr_consent(&self) -> Option<GdprConsent> {
        *self.gdpr.lock()
    }

    pub fn test_mode(&self) -> bool {
        self.test_mode.load(Ordering::Acquire)
    }

    pub fn verbose_logging(&self) -> bool {
        self.verbose_logging.load(Ordering::Acquire)
    }
}

#[async_trait]
impl AuctionClient for SimulatedAuctionClient {
    async fn start(&self, app_id: &str) -> Result<(), Error> {
        if app_id.trim().is_empty() {
            bail!("Simulated auction SDK needs an application id");
        }

        debug!("Simulated auction SDK started for app {}", app_id);
        self.ready.store(true, Ordering::Release);

        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn load_ad(&self, request: AuctionRequest, completion: AuctionCompletion) {
        let latency = self.config.latency;
        let no_fill_rate = self.config.no_fill_rate;
        let price_buckets = self.config.price_buckets;
        let test_mode = self.test_mode();

        self.runtime.spawn(async move {
            tokio::time::sleep(latency).await;

            if rand::random::<f32>() < no_fill_rate {
                debug!("Simulated no fill for {}", request.placement);
                completion.fail(partner_codes::NO_FILL);
                return;
            }

            let (price_point, hints) = generate_bid(&request, price_buckets, test_mode);
            debug!("Simulated bid {} for {}", price_point, request.placement);
            completion.succeed(price_point, hints);
        });
    }

    fn set_gdpr_consent(&self, consent: GdprConsent) {
        *self.gdpr.lock() = Some(consent);
    }

    fn set_test_mode(&self, enabled: bool) {
        self.test_mode.store(enabled, Ordering::Release);
    }

    fn set_verbose_logging(&self, enabled: bool) {
        debug!("Simulated auction SDK verbose logging {}", enabled);
        self.verbose_logging.store(enabled, Ordering::Release);
    }
}
