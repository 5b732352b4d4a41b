//! Supervised feed tasks
//!
//! A feed task runs one subscription until it fails (`run_until_error`); `supervise` wraps
//! it in a restart loop with a fixed delay that never gives up.

use crate::source::{SourceError, Subscription};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};

#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Fixed wait before resubscribing
    pub restart_delay: Duration,
    /// Bound on establishing the subscription
    pub setup_timeout: Duration,
    /// Silence after which a live subscription is considered stale
    pub liveness_timeout: Option<Duration>,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            restart_delay: Duration::from_secs(5),
            setup_timeout: Duration::from_secs(10),
            liveness_timeout: Some(Duration::from_secs(120)),
        }
    }
}

/// Why a feed task stopped
#[derive(Debug)]
pub enum FeedError {
    SetupTimeout(Duration),
    Setup(SourceError),
    Stream(SourceError),
    Closed,
    Stale(Duration),
}

impl std::fmt::Display for FeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedError::SetupTimeout(t) => write!(f, "subscription setup timed out after {:?}", t),
            FeedError::Setup(e) => write!(f, "failed to subscribe: {}", e),
            FeedError::Stream(e) => write!(f, "subscription errored: {}", e),
            FeedError::Closed => write!(f, "subscription closed"),
            FeedError::Stale(t) => write!(f, "no events for {:?}", t),
        }
    }
}

impl std::error::Error for FeedError {}

/// Subscribes once and feeds every event to `handle` until the subscription fails
pub async fn run_until_error<T, S, SFut, H, HFut>(
    policy: &RestartPolicy,
    subscribe: &S,
    handle: &H,
) -> FeedError
where
    S: Fn() -> SFut,
    SFut: Future<Output = Result<Subscription<T>, SourceError>>,
    H: Fn(T) -> HFut,
    HFut: Future<Output = ()>,
{
    let mut subscription = match timeout(policy.setup_timeout, subscribe()).await {
        Err(_) => return FeedError::SetupTimeout(policy.setup_timeout),
        Ok(Err(e)) => return FeedError::Setup(e),
        Ok(Ok(subscription)) => subscription,
    };

    loop {
        let next = match policy.liveness_timeout {
            Some(limit) => match timeout(limit, subscription.next()).await {
                Ok(next) => next,
                Err(_) => return FeedError::Stale(limit),
            },
            None => subscription.next().await,
        };

        match next {
            Some(Ok(event)) => handle(event).await,
            Some(Err(e)) => return FeedError::Stream(e),
            None => return FeedError::Closed,
        }
    }
}

/// Runs a feed forever, resubscribing after `policy.restart_delay` on every failure
pub async fn supervise<T, S, SFut, H, HFut>(name: String, policy: RestartPolicy, subscribe: S, handle: H)
where
    S: Fn() -> SFut,
    SFut: Future<Output = Result<Subscription<T>, SourceError>>,
    H: Fn(T) -> HFut,
    HFut: Future<Output = ()>,
{
    let mut restarts: u64 = 0;

    loop {
        log::debug!("▶️  Starting {} routine (restarts so far: {})", name, restarts);

        let err = run_until_error(&policy, &subscribe, &handle).await;
        match err {
            FeedError::Setup(_) | FeedError::SetupTimeout(_) | FeedError::Stream(_) => {
                log::error!("❌ {}: {}", name, err)
            }
            FeedError::Closed | FeedError::Stale(_) => log::warn!("⚠️  {}: {}", name, err),
        }

        restarts += 1;
        log::warn!(
            "⏳ {} routine died. restarting in {}s",
            name,
            policy.restart_delay.as_secs_f64()
        );
        sleep(policy.restart_delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn policy() -> RestartPolicy {
        RestartPolicy {
            restart_delay: Duration::from_secs(5),
            setup_timeout: Duration::from_secs(1),
            liveness_timeout: None,
        }
    }

    #[tokio::test]
    async fn test_handles_events_until_closed() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let subscribe = || async {
            let (tx, sub) = Subscription::channel(8);
            for i in 0..3u64 {
                tx.send(Ok(i)).await.unwrap();
            }
            Ok(sub)
        };
        let handle = |v: u64| {
            let seen = seen.clone();
            async move { seen.lock().unwrap().push(v) }
        };

        let err = run_until_error(&policy(), &subscribe, &handle).await;
        assert!(matches!(err, FeedError::Closed));
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_stream_error_stops_feed() {
        let subscribe = || async {
            let (tx, sub) = Subscription::<u64>::channel(8);
            tx.send(Err(SourceError::Transport("reset".into()))).await.unwrap();
            tx.send(Ok(7)).await.unwrap();
            Ok(sub)
        };
        let handle = |_v: u64| async {};

        let err = run_until_error(&policy(), &subscribe, &handle).await;
        assert!(matches!(err, FeedError::Stream(SourceError::Transport(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_timeout() {
        let subscribe = || async {
            sleep(Duration::from_secs(60)).await;
            Ok(Subscription::<u64>::channel(1).1)
        };
        let handle = |_v: u64| async {};

        let err = run_until_error(&policy(), &subscribe, &handle).await;
        assert!(matches!(err, FeedError::SetupTimeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_feed_is_stale() {
        let senders = Arc::new(Mutex::new(Vec::new()));
        let subscribe = || {
            let senders = senders.clone();
            async move {
                let (tx, sub) = Subscription::<u64>::channel(1);
                senders.lock().unwrap().push(tx);
                Ok(sub)
            }
        };
        let handle = |_v: u64| async {};
        let policy = RestartPolicy {
            liveness_timeout: Some(Duration::from_secs(30)),
            ..policy()
        };

        let err = run_until_error(&policy, &subscribe, &handle).await;
        assert!(matches!(err, FeedError::Stale(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervise_resubscribes_after_fixed_delay() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let handled = Arc::new(AtomicUsize::new(0));

        let attempts_task = attempts.clone();
        let handled_task = handled.clone();
        let task = tokio::spawn(supervise(
            "test".to_string(),
            policy(),
            move || {
                let attempts = attempts_task.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    let (tx, sub) = Subscription::channel(4);
                    tx.send(Ok(1u64)).await.unwrap();
                    Ok(sub)
                }
            },
            move |_v: u64| {
                let handled = handled_task.clone();
                async move {
                    handled.fetch_add(1, Ordering::SeqCst);
                }
            },
        ));

        // first run ends immediately (sender dropped), then waits 5s
        sleep(Duration::from_millis(100)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(handled.load(Ordering::SeqCst), 2);

        task.abort();
    }
}
