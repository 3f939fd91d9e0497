use crate::app::config::AdapterSettings;
use crate::core::auction::{AuctionClient, GdprConsent};
use crate::core::managers::{PreBidRegistry, RegistryOptions};
use crate::core::models::bid::Payload;
use crate::core::models::slot::{AdFormat, PrebidRecord};
use crate::core::spec::errors::PreBidError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{Instrument, error, info, info_span, warn};

pub const PARTNER_IDENTIFIER: &str = "amazon_aps";
pub const PARTNER_DISPLAY_NAME: &str = "Amazon Publisher Services";
pub const ADAPTER_VERSION: &str = "4.4.4.2.0";

const APP_ID_KEY: &str = "application_id";
const PREBIDS_KEY: &str = "prebids";
const LEGACY_PREBIDS_KEY: &str = "prebid_settings";

/// IAB US privacy strings used when the host only tells us
/// whether consent was given
const CCPA_CONSENT_GIVEN: &str = "1YN-";
const CCPA_CONSENT_DENIED: &str = "1YY-";

/// Setup payload handed over by the mediation host. Kept untyped
/// only up to here, records are validated one by one on setup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartnerConfiguration {
    #[serde(default)]
    pub credentials: serde_json::Map<String, serde_json::Value>,
}

impl PartnerConfiguration {
    fn app_id(&self) -> Option<&str> {
        self.credentials
            .get(APP_ID_KEY)
            .and_then(|v| v.as_str())
            .filter(|id| !id.trim().is_empty())
    }

    fn prebid_values(&self) -> Option<&Vec<serde_json::Value>> {
        self.credentials
            .get(PREBIDS_KEY)
            .or_else(|| self.credentials.get(LEGACY_PREBIDS_KEY))
            .and_then(|v| v.as_array())
            .filter(|records| !records.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreBidRequest {
    pub placement: String,
    pub format: AdFormat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdLoadRequest {
    pub placement: String,
    pub format: AdFormat,
}

/// What the ad-loading code receives: the cached payload, unchanged
#[derive(Debug, Clone, PartialEq)]
pub struct PartnerAd {
    pub placement: String,
    pub format: AdFormat,
    pub price_point: String,
    pub payload: Payload,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GdprConsentStatus {
    #[default]
    Unknown,
    Granted,
    Denied,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("missing setup parameter '{0}'")]
    MissingSetUpParameter(&'static str),
    #[error("auction SDK failed to start: {0}")]
    SetUpFailure(String),
    #[error("auction SDK not ready within {0:?}")]
    SetUpTimeout(Duration),
    #[error("bidder info fetch failed for {placement}: {source}")]
    FetchBidderInfoFailure {
        placement: String,
        #[source]
        source: PreBidError,
    },
    #[error("bidder info fetch for {placement} timed out after {timeout:?}")]
    FetchTimeout { placement: String, timeout: Duration },
    #[error("price point value not supplied for {0}")]
    PricePointMissing(String),
    #[error("loading has been disabled due to COPPA restrictions")]
    LoadFailurePrivacyOptIn,
    #[error("no bid available for {0}")]
    LoadFailureAuctionNoBid(String),
}

#[derive(Debug, Default)]
struct GdprState {
    applies: bool,
    status: GdprConsentStatus,
}

/// Host-facing side of the adapter. Translates mediation lifecycle
/// calls into registry operations and registry outcomes into the
/// host's result shapes.
pub struct Adapter {
    client: Arc<dyn AuctionClient>,
    registry: PreBidRegistry,
    settings: AdapterSettings,
    gdpr: Mutex<GdprState>,
}

impl Adapter {
    pub fn new(client: Arc<dyn AuctionClient>, settings: AdapterSettings) -> Self {
        let registry = PreBidRegistry::new(
            client.clone(),
            RegistryOptions {
                watchdog: settings.watchdog,
            },
        );

        Self {
            client,
            registry,
            settings,
            gdpr: Mutex::new(GdprState::default()),
        }
    }

    pub fn registry(&self) -> &PreBidRegistry {
        &self.registry
    }

    /// Configures the pre-bidders and starts the auction SDK.
    ///
    /// # Behavior
    /// Fails on a missing app id or an empty pre-bid list. Individual
    /// records that don't validate are skipped with a warning.
    pub async fn setup(&self, configuration: &PartnerConfiguration) -> Result<(), AdapterError> {
        info!("Setup started for {} {}", PARTNER_DISPLAY_NAME, ADAPTER_VERSION);

        match self.setup0(configuration).await {
            Ok(configured) => {
                info!("Setup succeeded with {} pre-bid placements", configured);
                Ok(())
            }
            Err(e) => {
                error!("Setup failed: {}", e);
                Err(e)
            }
        }
    }

    async fn setup0(&self, configuration: &PartnerConfiguration) -> Result<usize, AdapterError> {
        let app_id = configuration
            .app_id()
            .ok_or(AdapterError::MissingSetUpParameter(APP_ID_KEY))?;

        let values = configuration
            .prebid_values()
            .ok_or(AdapterError::MissingSetUpParameter(PREBIDS_KEY))?;

        let records: Vec<PrebidRecord> = values
            .iter()
            .filter_map(|value| match PrebidRecord::from_value(value) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping pre-bid record: {}", e);
                    None
                }
            })
            .collect();

        let configured = self.registry.configure_records(&records);

        self.client.set_test_mode(self.settings.test_mode);
        self.client.set_verbose_logging(self.settings.verbose_logging);
        if self.settings.test_mode {
            warn!("Auction SDK running in test mode, bids are not billable");
        }

        self.client
            .start(app_id)
            .await
            .map_err(|e| AdapterError::SetUpFailure(format!("{:#}", e)))?;

        // the SDK takes a moment to report ready
        tokio::time::sleep(self.settings.ready_delay).await;

        if !self.client.is_ready() {
            return Err(AdapterError::SetUpTimeout(self.settings.ready_delay));
        }

        Ok(configured)
    }

    /// Fetches the price point the host slots this partner into its
    /// auction with, as `{placement: price_point}`
    pub async fn fetch_bidder_info(
        &self,
        request: &PreBidRequest,
    ) -> Result<HashMap<String, String>, AdapterError> {
        let span = info_span!("fetch_bidder_info", placement = %request.placement, format = %request.format);

        let result = self.fetch_bidder_info0(request).instrument(span).await;
        if let Err(e) = &result {
            warn!("Bidder info fetch failed: {}", e);
        }

        result
    }

    async fn fetch_bidder_info0(
        &self,
        request: &PreBidRequest,
    ) -> Result<HashMap<String, String>, AdapterError> {
        let placement = request.placement.clone();

        if self.registry.is_coppa_gated() {
            return Err(AdapterError::FetchBidderInfoFailure {
                placement,
                source: PreBidError::DisabledByPrivacy,
            });
        }

        let ticket = self.registry.fetch(&placement);

        let result = match self.settings.fetch_timeout {
            Some(timeout) => tokio::time::timeout(timeout, ticket)
                .await
                .map_err(|_| AdapterError::FetchTimeout {
                    placement: placement.clone(),
                    timeout,
                })?,
            None => ticket.await,
        };

        let info = result.map_err(|source| AdapterError::FetchBidderInfoFailure {
            placement: placement.clone(),
            source,
        })?;

        if info.price_point.trim().is_empty() {
            return Err(AdapterError::PricePointMissing(placement));
        }

        info!("Bidder info fetched");
        Ok(HashMap::from([(placement, info.price_point)]))
    }

    /// Hands the cached bid payload for a placement to the ad-loading
    /// code. The bid is consumed, a second call finds nothing.
    pub fn make_ad(&self, request: &AdLoadRequest) -> Result<PartnerAd, AdapterError> {
        if self.registry.is_coppa_gated() {
            warn!("Load for {} blocked by COPPA", request.placement);
            return Err(AdapterError::LoadFailurePrivacyOptIn);
        }

        let info = self
            .registry
            .pop_result(&request.placement)
            .ok_or_else(|| AdapterError::LoadFailureAuctionNoBid(request.placement.clone()))?;

        Ok(PartnerAd {
            placement: request.placement.clone(),
            format: request.format,
            price_point: info.price_point,
            payload: info.payload,
        })
    }

    pub fn set_ccpa_consent(&self, has_given_consent: bool, privacy_string: Option<&str>) {
        let privacy_string = privacy_string.unwrap_or(if has_given_consent {
            CCPA_CONSENT_GIVEN
        } else {
            CCPA_CONSENT_DENIED
        });

        info!("Privacy updated: ccpa {}", privacy_string);
        self.registry.set_consent(privacy_string);
    }

    /// Children may not be shown ads from this partner at all
    pub fn set_user_subject_to_coppa(&self, is_subject: bool) {
        info!("Privacy updated: coppa {}", is_subject);
        self.registry.set_coppa_gate(is_subject);
    }

    pub fn set_gdpr_applies(&self, applies: bool) {
        self.gdpr.lock().applies = applies;
        self.update_gdpr_consent();
    }

    pub fn set_gdpr_consent_status(&self, status: GdprConsentStatus) {
        self.gdpr.lock().status = status;
        self.update_gdpr_consent();
    }

    /// Consent only reaches the SDK while GDPR applies. Either call
    /// may come first, so both re-evaluate.
    fn update_gdpr_consent(&self) {
        let consent = {
            let gdpr = self.gdpr.lock();
            if !gdpr.applies {
                return;
            }

            match gdpr.status {
                GdprConsentStatus::Granted => GdprConsent::ExplicitYes,
                _ => GdprConsent::ExplicitNo,
            }
        };

        info!("Privacy updated: gdpr consent {:?}", consent);
        self.client.set_gdpr_consent(consent);
    }
}
