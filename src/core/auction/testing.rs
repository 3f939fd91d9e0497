use crate::core::auction::client::{AuctionClient, AuctionCompletion, AuctionRequest, GdprConsent};
use crate::core::models::bid::Payload;
use anyhow::Error;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// How the scripted client answers a dispatch
#[derive(Debug, Clone)]
pub enum Script {
    /// Hold the completion until the test answers it
    Hold,
    /// Succeed synchronously from inside `load_ad`
    Succeed(String, Payload),
    /// Fail synchronously from inside `load_ad`
    Fail(i64),
}

/// Auction client double that records every request and lets the
/// test decide when, where and how each one completes
pub struct ScriptedClient {
    script: Mutex<Script>,
    requests: Mutex<Vec<AuctionRequest>>,
    held: Mutex<Vec<Option<AuctionCompletion>>>,
    ready: AtomicBool,
    started_with: Mutex<Option<String>>,
    gdpr: Mutex<Vec<GdprConsent>>,
    test_mode: Mutex<Option<bool>>,
    verbose_logging: Mutex<Option<bool>>,
}

impl Default for ScriptedClient {
    fn default() -> Self {
        Self {
            script: Mutex::new(Script::Hold),
            requests: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
            ready: AtomicBool::new(true),
            started_with: Mutex::new(None),
            gdpr: Mutex::new(Vec::new()),
            test_mode: Mutex::new(None),
            verbose_logging: Mutex::new(None),
        }
    }
}

impl ScriptedClient {
    pub fn set_script(&self, script: Script) {
        *self.script.lock() = script;
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    pub fn dispatched(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn request(&self, idx: usize) -> AuctionRequest {
        self.requests.lock()[idx].clone()
    }

    pub fn started_with(&self) -> Option<String> {
        self.started_with.lock().clone()
    }

    pub fn gdpr(&self) -> Vec<GdprConsent> {
        self.gdpr.lock().clone()
    }

    /// Last test mode pushed to the client, None if never set
    pub fn test_mode(&self) -> Option<bool> {
        *self.test_mode.lock()
    }

    pub fn verbose_logging(&self) -> Option<bool> {
        *self.verbose_logging.lock()
    }

    /// Takes the held completion of the idx-th dispatch
    pub fn take(&self, idx: usize) -> AuctionCompletion {
        self.held.lock()[idx]
            .take()
            .expect("completion already taken or answered synchronously")
    }

    pub fn succeed(&self, idx: usize, price_point: &str, hints: Payload) {
        self.take(idx).succeed(price_point, hints);
    }

    pub fn fail(&self, idx: usize, code: i64) {
        self.take(idx).fail(code);
    }
}

#[async_trait]
impl AuctionClient for ScriptedClient {
    async fn start(&self, app_id: &str) -> Result<(), Error> {
        *self.started_with.lock() = Some(app_id.to_string());
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn load_ad(&self, request: AuctionRequest, completion: AuctionCompletion) {
        let script = self.script.lock().clone();

        // held before recorded, a test seeing the dispatch can always take it
        if let Script::Hold = script {
            self.held.lock().push(Some(completion));
            self.requests.lock().push(request);
            return;
        }

        self.held.lock().push(None);
        self.requests.lock().push(request);

        match script {
            Script::Succeed(price_point, hints) => completion.succeed(price_point, hints),
            Script::Fail(code) => completion.fail(code),
            Script::Hold => {}
        }
    }

    fn set_gdpr_consent(&self, consent: GdprConsent) {
        self.gdpr.lock().push(consent);
    }

    fn set_test_mode(&self, enabled: bool) {
        *self.test_mode.lock() = Some(enabled);
    }

    fn set_verbose_logging(&self, enabled: bool) {
        *self.verbose_logging.lock() = Some(enabled);
    }
}
