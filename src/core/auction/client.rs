use crate::core::models::bid::{AdInfo, Payload};
use crate::core::models::slot::AdSize;
use crate::core::spec::errors::AuctionError;
use async_trait::async_trait;
use derive_builder::Builder;
use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

/// Custom targeting key the IAB US privacy string is sent under
pub const US_PRIVACY_KEY: &str = "us_privacy";

/// GDPR consent as understood by the partner SDK
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GdprConsent {
    ExplicitYes,
    ExplicitNo,
}

/// One auction request, built under the bidder lock and
/// immutable once handed to the client
#[derive(Debug, Clone, PartialEq, Serialize, Builder)]
#[builder(setter(into))]
pub struct AuctionRequest {
    pub request_id: String,
    pub placement: String,
    pub partner_placement: String,
    pub size: AdSize,
    #[builder(default)]
    pub custom_targeting: HashMap<String, String>,
}

impl AuctionRequest {
    pub fn us_privacy(&self) -> Option<&str> {
        self.custom_targeting.get(US_PRIVACY_KEY).map(String::as_str)
    }
}

type CompletionFn = Box<dyn FnOnce(Result<AdInfo, AuctionError>) + Send + 'static>;

/// Single-use completion handle for one dispatched request.
///
/// Consuming methods make a second delivery impossible. A handle
/// dropped without being completed reports the request as an
/// unexpected failure, so a client bug can't wedge its placement.
pub struct AuctionCompletion {
    request_id: String,
    callback: Option<CompletionFn>,
}

impl AuctionCompletion {
    pub(crate) fn new(
        request_id: impl Into<String>,
        callback: impl FnOnce(Result<AdInfo, AuctionError>) + Send + 'static,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            callback: Some(Box::new(callback)),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// The auction returned a bid
    pub fn succeed(mut self, price_point: impl Into<String>, mediation_hints: Payload) {
        self.finish(Ok(AdInfo::new(price_point, mediation_hints)));
    }

    /// The auction failed with a partner error code
    pub fn fail(mut self, partner_code: i64) {
        self.finish(Err(AuctionError::from_partner_code(partner_code)));
    }

    fn finish(&mut self, result: Result<AdInfo, AuctionError>) {
        if let Some(callback) = self.callback.take() {
            callback(result);
        }
    }
}

impl Drop for AuctionCompletion {
    fn drop(&mut self) {
        if self.callback.is_some() {
            warn!(
                "Auction completion for request {} dropped without an answer",
                self.request_id
            );
            self.finish(Err(AuctionError::Unexpected));
        }
    }
}

impl std::fmt::Debug for AuctionCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuctionCompletion")
            .field("request_id", &self.request_id)
            .field("completed", &self.callback.is_none())
            .finish()
    }
}

/// The external ad-auction SDK. Injected into the registry so
/// it can be swapped for a simulator or a scripted test double.
#[async_trait]
pub trait AuctionClient: Send + Sync {
    /// Initializes the SDK with the publisher's application key
    async fn start(&self, app_id: &str) -> Result<(), anyhow::Error>;

    /// Whether the SDK finished initializing
    fn is_ready(&self) -> bool;

    /// Dispatches one request. Must not block. The completion may be
    /// consumed on any thread, before or after this call returns.
    fn load_ad(&self, request: AuctionRequest, completion: AuctionCompletion);

    fn set_gdpr_consent(&self, _consent: GdprConsent) {}

    /// Test bids only, never billed
    fn set_test_mode(&self, _enabled: bool) {}

    fn set_verbose_logging(&self, _enabled: bool) {}
}
