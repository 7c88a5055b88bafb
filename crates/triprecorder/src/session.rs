//! Event loop that drives one engine.
//!
//! Location samples and control signals arrive on separate channels. The loop
//! polls the signal channel first, so when a pause and a sample are both
//! ready the pause is applied before the sample is looked at.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::engine::{Lifecycle, TripEngine};
use crate::error::Result;
use crate::sample::Subscription;
use crate::trip::Trip;

/// Control signals for a running session.
#[derive(Debug)]
pub enum Signal {
    /// Begin a trip.
    Start,
    /// Pause the open trip.
    Pause,
    /// Resume the open trip.
    Resume,
    /// Finish the open trip; the outcome is sent back on `reply`.
    Finish {
        /// Optional display name.
        name: Option<String>,
        /// Receives the sealed trip or the error.
        reply: oneshot::Sender<Result<Trip>>,
    },
    /// Drop the open trip.
    Discard,
    /// App lifecycle transition.
    Lifecycle(Lifecycle),
    /// End the session.
    Stop,
}

/// Why [`run_session`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// A [`Signal::Stop`] was received.
    Stopped,
    /// Every signal sender was dropped.
    SignalsClosed,
}

/// Drive `engine` until stopped.
///
/// The location stream may end before the session does; the session then
/// keeps serving signals.
pub async fn run_session(
    engine: &mut TripEngine,
    location: &mut Subscription,
    signals: &mut mpsc::Receiver<Signal>,
) -> SessionEnd {
    let mut location_open = true;
    info!("Session started");

    let end = loop {
        tokio::select! {
            biased;

            signal = signals.recv() => match signal {
                None => break SessionEnd::SignalsClosed,
                Some(Signal::Stop) => break SessionEnd::Stopped,
                Some(signal) => handle_signal(engine, signal).await,
            },

            sample = location.next(), if location_open => match sample {
                Some(sample) => {
                    engine.on_sample(&sample);
                }
                None => {
                    debug!("Location stream ended");
                    location_open = false;
                }
            },
        }
    };

    engine.flush().await;
    info!(?end, "Session ended");
    end
}

async fn handle_signal(engine: &mut TripEngine, signal: Signal) {
    let outcome = match signal {
        Signal::Start => engine.start().map(drop),
        Signal::Pause => engine.pause(),
        Signal::Resume => engine.resume(),
        Signal::Discard => engine.discard(),
        Signal::Lifecycle(transition) => {
            engine.on_lifecycle(transition);
            Ok(())
        }
        Signal::Finish { name, reply } => {
            let result = engine.finish(name.as_deref()).await;
            if reply.send(result).is_err() {
                debug!("Finish requester went away");
            }
            Ok(())
        }
        Signal::Stop => Ok(()),
    };

    if let Err(e) = outcome {
        warn!(error = %e, "Signal rejected");
    }
}
