//! In-process event source backed by broadcast channels
//!
//! Embedders that already decode chain events push them in with the `publish_*` methods;
//! every live subscription receives its own copy, filtered by contract address.

use super::{FeedItem, FulfillmentFeed, HeaderFeed, RequestFeed, SourceError, Subscription};
use crate::types::{Address, FulfillmentEvent, Header, RequestEvent};
use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};

pub struct MemorySource {
    headers: broadcast::Sender<Header>,
    requests: broadcast::Sender<(Address, RequestEvent)>,
    fulfillments: broadcast::Sender<(Address, FulfillmentEvent)>,
    buffer: usize,
}

impl MemorySource {
    /// `capacity` bounds how far a subscriber may fall behind before it is cut off
    pub fn new(capacity: usize) -> Self {
        let (headers, _) = broadcast::channel(capacity);
        let (requests, _) = broadcast::channel(capacity);
        let (fulfillments, _) = broadcast::channel(capacity);

        Self {
            headers,
            requests,
            fulfillments,
            buffer: capacity,
        }
    }

    /// Returns how many subscriptions received the header
    pub fn publish_header(&self, header: Header) -> usize {
        self.headers.send(header).unwrap_or(0)
    }

    pub fn publish_request(&self, oracle: Address, event: RequestEvent) -> usize {
        self.requests.send((oracle, event)).unwrap_or(0)
    }

    pub fn publish_fulfillment(&self, aggregator: Address, event: FulfillmentEvent) -> usize {
        self.fulfillments.send((aggregator, event)).unwrap_or(0)
    }

    pub fn header_subscribers(&self) -> usize {
        self.headers.receiver_count()
    }

    pub fn request_subscribers(&self) -> usize {
        self.requests.receiver_count()
    }

    pub fn fulfillment_subscribers(&self) -> usize {
        self.fulfillments.receiver_count()
    }
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Pumps a broadcast receiver into a dedicated subscription until either side goes away
fn forward<T, U, F>(mut rx: broadcast::Receiver<T>, buffer: usize, filter: F) -> Subscription<U>
where
    T: Clone + Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Option<U> + Send + 'static,
{
    let (tx, subscription) = Subscription::channel(buffer);

    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                _ = tx.closed() => break,
                received = rx.recv() => received,
            };

            let item: FeedItem<U> = match received {
                Ok(value) => match filter(value) {
                    Some(event) => Ok(event),
                    None => continue,
                },
                Err(RecvError::Lagged(skipped)) => Err(SourceError::Lagged(skipped)),
                Err(RecvError::Closed) => break,
            };

            let failed = item.is_err();
            if tx.send(item).await.is_err() || failed {
                break;
            }
        }
    });

    subscription
}

#[async_trait]
impl HeaderFeed for MemorySource {
    async fn subscribe_headers(&self) -> Result<Subscription<Header>, SourceError> {
        Ok(forward(self.headers.subscribe(), self.buffer, Some))
    }
}

#[async_trait]
impl RequestFeed for MemorySource {
    async fn subscribe_requests(
        &self,
        oracle: Address,
    ) -> Result<Subscription<RequestEvent>, SourceError> {
        Ok(forward(self.requests.subscribe(), self.buffer, move |(emitter, event)| {
            (emitter == oracle).then_some(event)
        }))
    }
}

#[async_trait]
impl FulfillmentFeed for MemorySource {
    async fn subscribe_fulfillments(
        &self,
        aggregator: Address,
    ) -> Result<Subscription<FulfillmentEvent>, SourceError> {
        Ok(forward(self.fulfillments.subscribe(), self.buffer, move |(emitter, event)| {
            (emitter == aggregator).then_some(event)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Bytes32;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_fulfillments_filtered_by_aggregator() {
        let source = MemorySource::new(16);
        let agg_a = Address::from([0xa1; 20]);
        let agg_b = Address::from([0xb2; 20]);

        let mut sub = source.subscribe_fulfillments(agg_a).await.unwrap();
        assert_eq!(source.fulfillment_subscribers(), 1);

        let other = FulfillmentEvent { request_id: Bytes32::from([1; 32]), block_number: 5 };
        let ours = FulfillmentEvent { request_id: Bytes32::from([2; 32]), block_number: 6 };
        source.publish_fulfillment(agg_b, other);
        source.publish_fulfillment(agg_a, ours);

        let got = timeout(Duration::from_secs(1), sub.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(got, ours);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_gets_error() {
        let source = MemorySource::new(2);
        let mut sub = source.subscribe_headers().await.unwrap();

        // forwarder has not run yet on the current-thread runtime, so the ring overflows
        for number in 0..10 {
            source.publish_header(Header { number });
        }

        let mut saw_lag = false;
        while let Ok(Some(item)) = timeout(Duration::from_secs(1), sub.next()).await {
            if let Err(SourceError::Lagged(_)) = item {
                saw_lag = true;
            }
        }
        assert!(saw_lag);
    }

    #[tokio::test]
    async fn test_dropped_subscription_releases_receiver() {
        let source = MemorySource::new(4);
        let sub = source.subscribe_headers().await.unwrap();
        assert_eq!(source.header_subscribers(), 1);

        drop(sub);
        for _ in 0..50 {
            if source.header_subscribers() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(source.header_subscribers(), 0);
    }
}
