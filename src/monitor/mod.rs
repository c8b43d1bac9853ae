//! Redirect/Callback Monitor
//!
//! Runs on the client side of checkout. `RedirectMonitor` is the pure
//! classifier; `observe_checkout` drives it from a stream of navigation
//! signals with a real load timer.

pub mod redirect;

pub use redirect::{ErrorReason, MonitorConfig, Outcome, RedirectMonitor};

use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationSignal {
    Started(String),
    Loaded(String),
}

/// Feed `signals` into `monitor` until it reports an outcome.
///
/// Returns `None` when observation is cancelled (checkout closed) or the
/// signal source goes away with no load in flight. Cancellation ends the
/// observation only; the server-side intent is left for reconciliation.
pub async fn observe_checkout(
    mut monitor: RedirectMonitor,
    mut signals: mpsc::Receiver<NavigationSignal>,
    mut cancel: watch::Receiver<bool>,
) -> Option<Outcome> {
    let mut signals_open = true;

    loop {
        let deadline = monitor.deadline();
        if !signals_open && deadline.is_none() {
            debug!(intent_id = %monitor.intent_id(), "Navigation source closed, nothing pending");
            return None;
        }

        let timer = async move {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    info!(intent_id = %monitor.intent_id(), "Checkout observation cancelled");
                    return None;
                }
            }
            signal = signals.recv(), if signals_open => match signal {
                Some(NavigationSignal::Started(url)) => {
                    if let Some(outcome) = monitor.on_navigation(&url, Instant::now()) {
                        return Some(outcome);
                    }
                }
                Some(NavigationSignal::Loaded(url)) => monitor.on_load_finished(&url),
                None => signals_open = false,
            },
            _ = timer => {
                if let Some(outcome) = monitor.check_timeout(Instant::now()) {
                    return Some(outcome);
                }
            }
        }
    }
}
