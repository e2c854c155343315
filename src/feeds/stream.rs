use std::future::Future;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::engine::types::ConnectionState;
use crate::error::MarketResult;
use crate::feeds::failover::{FailoverController, Recovery, StreamLifecycle};
use crate::feeds::StateTx;
use crate::market_data::adapters::{StreamEvent, StreamTransport, ABNORMAL_CLOSURE, NORMAL_CLOSURE};
use crate::telemetry::STREAM_MESSAGES;

/// Why a subscription ended.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SubscriptionExit {
    Shutdown,
    Closed,
    Recover(Recovery),
}

/// Resolves once `stop()` has been requested (or the owner went away).
pub(crate) async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Run `fut` unless shutdown comes first; a dropped future is a cancelled request.
pub(crate) async fn until_shutdown<F: Future>(
    shutdown: &mut watch::Receiver<bool>,
    fut: F,
) -> Option<F::Output> {
    tokio::select! {
        _ = shutdown_signalled(shutdown) => None,
        out = fut => Some(out),
    }
}

/// Switch the feed to REST-only and flag the re-fetch as in flight.
pub(crate) fn enter_degraded<T>(state: &StateTx<T>, recovery: &Recovery) {
    let message = recovery.message();
    state.send_modify(|s| {
        s.connection = ConnectionState::Degraded;
        s.error = Some(message);
        s.loading = true;
    });
}

/// Open one subscription and fold its messages into the feed state until it
/// ends. `apply` returns whether the message changed anything; an `Err` means
/// the message was malformed and is skipped.
pub(crate) async fn run_subscription<T, F>(
    transport: &dyn StreamTransport,
    url: &str,
    state: &StateTx<T>,
    shutdown: &mut watch::Receiver<bool>,
    mut apply: F,
) -> SubscriptionExit
where
    F: FnMut(&mut T, &str) -> MarketResult<bool>,
{
    let mut failover = FailoverController::new();

    let connected = match until_shutdown(shutdown, transport.connect(url)).await {
        Some(res) => res,
        None => return SubscriptionExit::Shutdown,
    };
    let mut session = match connected {
        Ok(session) => session,
        Err(e) => {
            return match failover.observe(StreamLifecycle::TransportError(e.to_string())) {
                Some(recovery) => SubscriptionExit::Recover(recovery),
                None => SubscriptionExit::Closed,
            };
        }
    };

    failover.observe(StreamLifecycle::Opened);
    state.send_modify(|s| s.connection = ConnectionState::Live);
    info!(url = %url, "Stream open");

    loop {
        let event = tokio::select! {
            _ = shutdown_signalled(shutdown) => {
                failover.shutdown();
                session.close(NORMAL_CLOSURE).await;
                debug!(url = %url, "Stream closed on shutdown");
                return SubscriptionExit::Shutdown;
            }
            event = session.next_event() => event,
        };

        let lifecycle = match event {
            Some(StreamEvent::Text(text)) => {
                metrics::counter!(STREAM_MESSAGES).increment(1);
                let mut rejected = None;
                state.send_if_modified(|s| match apply(&mut s.data, &text) {
                    Ok(changed) => changed,
                    Err(e) => {
                        rejected = Some(e);
                        false
                    }
                });
                if let Some(e) = rejected {
                    warn!(error = %e, "Skipping malformed stream message");
                }
                continue;
            }
            Some(StreamEvent::Error(reason)) => StreamLifecycle::TransportError(reason),
            Some(StreamEvent::Closed { code }) => StreamLifecycle::Closed { code },
            None => StreamLifecycle::Closed { code: ABNORMAL_CLOSURE },
        };

        if let Some(recovery) = failover.observe(lifecycle) {
            return SubscriptionExit::Recover(recovery);
        }
        if failover.state() == ConnectionState::Closed {
            state.send_modify(|s| s.connection = ConnectionState::Closed);
            return SubscriptionExit::Closed;
        }
    }
}
