//! Event source capabilities consumed by the SLA engine
//!
//! Chain connectivity lives outside this crate. A source hands the engine already-decoded
//! records through three restartable feeds plus request-response capabilities:
//!
//! ```text
//! HeaderFeed       -> Subscription<Header>            (new block heights)
//! RequestFeed      -> Subscription<RequestEvent>      (oracle requests)
//! FulfillmentFeed  -> Subscription<FulfillmentEvent>  (one per aggregator contract)
//! ContractProbe    -> is_aggregator / is_oracle
//! BalanceReader    -> account balances for auxiliary gauges
//! ```
//!
//! Feeds deliver at-least-once and may end with an error at any time. Resubscribing is the
//! caller's job (see `crate::supervisor`).

pub mod balances;
pub mod jsonl;
pub mod memory;
pub mod probe;

use crate::types::{Address, FulfillmentEvent, Header, Payment, RequestEvent};
use async_trait::async_trait;
use tokio::sync::mpsc;

pub use balances::{BalanceBook, BalanceKey};
pub use jsonl::JsonlEventSource;
pub use memory::MemorySource;
pub use probe::AllowlistProbe;

#[derive(Debug)]
pub enum SourceError {
    Transport(String),
    Io(std::io::Error),
    Decode(String),
    Lagged(u64),
    Closed,
    /// Nothing recorded yet for the requested value
    Unavailable(String),
}

impl From<std::io::Error> for SourceError {
    fn from(err: std::io::Error) -> Self {
        SourceError::Io(err)
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Decode(err.to_string())
    }
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Transport(msg) => write!(f, "Transport error: {}", msg),
            SourceError::Io(e) => write!(f, "IO error: {}", e),
            SourceError::Decode(msg) => write!(f, "Decode error: {}", msg),
            SourceError::Lagged(n) => write!(f, "Subscriber lagged, {} events dropped", n),
            SourceError::Closed => write!(f, "Source closed"),
            SourceError::Unavailable(what) => write!(f, "No value recorded for {}", what),
        }
    }
}

impl std::error::Error for SourceError {}

pub type FeedItem<T> = Result<T, SourceError>;

/// Receiving end of one live subscription
///
/// `next()` yields `None` once the producer side is gone; an `Err` item means the
/// subscription failed and must be re-established.
pub struct Subscription<T> {
    rx: mpsc::Receiver<FeedItem<T>>,
}

impl<T> Subscription<T> {
    pub fn new(rx: mpsc::Receiver<FeedItem<T>>) -> Self {
        Self { rx }
    }

    /// Creates a connected sender/subscription pair
    pub fn channel(buffer: usize) -> (mpsc::Sender<FeedItem<T>>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self::new(rx))
    }

    pub async fn next(&mut self) -> Option<FeedItem<T>> {
        self.rx.recv().await
    }
}

#[async_trait]
pub trait HeaderFeed: Send + Sync {
    async fn subscribe_headers(&self) -> Result<Subscription<Header>, SourceError>;
}

#[async_trait]
pub trait RequestFeed: Send + Sync {
    /// Requests emitted by the given oracle contract
    async fn subscribe_requests(
        &self,
        oracle: Address,
    ) -> Result<Subscription<RequestEvent>, SourceError>;
}

#[async_trait]
pub trait FulfillmentFeed: Send + Sync {
    /// Fulfillments emitted by the given aggregator contract
    async fn subscribe_fulfillments(
        &self,
        aggregator: Address,
    ) -> Result<Subscription<FulfillmentEvent>, SourceError>;
}

/// Contract capability checks (e.g. "does it expose an owner")
#[async_trait]
pub trait ContractProbe: Send + Sync {
    async fn is_aggregator(&self, address: Address) -> Result<bool, SourceError>;

    async fn is_oracle(&self, address: Address) -> Result<bool, SourceError>;
}

/// Balance lookups backing the auxiliary balance gauges
#[async_trait]
pub trait BalanceReader: Send + Sync {
    /// Native coin balance of an account, in wei
    async fn native_balance(&self, account: Address) -> Result<Payment, SourceError>;

    /// LINK the oracle owner may withdraw
    async fn withdrawable(&self, oracle: Address) -> Result<Payment, SourceError>;

    /// LINK token balance held by `holder`
    async fn token_balance(&self, token: Address, holder: Address) -> Result<Payment, SourceError>;
}
