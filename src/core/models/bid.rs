use crate::core::spec::errors::PreBidError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

/// Opaque mediation hints returned with a bid, needed later to render the creative
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// A successful pre-bid: the encoded price point the mediation
/// auction slots against, plus the hints the renderer needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdInfo {
    pub price_point: String,
    pub payload: Payload,
}

impl AdInfo {
    pub fn new(price_point: impl Into<String>, payload: Payload) -> Self {
        Self {
            price_point: price_point.into(),
            payload,
        }
    }
}

pub type BidResult = Result<AdInfo, PreBidError>;

enum TicketState {
    Ready(Option<BidResult>),
    Pending(oneshot::Receiver<BidResult>),
}

/// Single-use handle on the outcome of one fetch.
///
/// Resolves exactly once, either immediately (rejected before
/// dispatch) or when the auction SDK answers. Await it, or poll
/// it without blocking through [`BidTicket::try_result`].
pub struct BidTicket {
    placement: String,
    state: TicketState,
}

impl BidTicket {
    pub(crate) fn ready(placement: impl Into<String>, result: BidResult) -> Self {
        Self {
            placement: placement.into(),
            state: TicketState::Ready(Some(result)),
        }
    }

    pub(crate) fn pending(placement: impl Into<String>) -> (Self, oneshot::Sender<BidResult>) {
        let (tx, rx) = oneshot::channel();
        let ticket = Self {
            placement: placement.into(),
            state: TicketState::Pending(rx),
        };

        (ticket, tx)
    }

    pub fn placement(&self) -> &str {
        &self.placement
    }

    /// Takes the result if the fetch has completed, None while it is
    /// still outstanding or once the result has already been taken
    pub fn try_result(&mut self) -> Option<BidResult> {
        let result = match &mut self.state {
            TicketState::Ready(result) => result.take(),
            TicketState::Pending(rx) => match rx.try_recv() {
                Ok(result) => Some(result),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Closed) => Some(Err(PreBidError::Abandoned)),
            },
        };

        if result.is_some() {
            self.state = TicketState::Ready(None);
        }

        result
    }
}

impl Future for BidTicket {
    type Output = BidResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let ticket = self.get_mut();

        let result = match &mut ticket.state {
            TicketState::Ready(result) => result.take().unwrap_or(Err(PreBidError::Abandoned)),
            TicketState::Pending(rx) => match Pin::new(rx).poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Ok(result)) => result,
                // sender dropped with its bidder
                Poll::Ready(Err(_)) => Err(PreBidError::Abandoned),
            },
        };

        ticket.state = TicketState::Ready(None);
        Poll::Ready(result)
    }
}

impl std::fmt::Debug for BidTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            TicketState::Ready(Some(_)) => "ready",
            TicketState::Ready(None) => "consumed",
            TicketState::Pending(_) => "pending",
        };

        f.debug_struct("BidTicket")
            .field("placement", &self.placement)
            .field("state", &state)
            .finish()
    }
}
