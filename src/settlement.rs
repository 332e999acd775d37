//! Settlement signals and their classification
//!
//! An engine reports the terminal state of a navigation through a single
//! channel of [`Settlement`] values. The dispatcher honors only the first one
//! it receives (or injects [`Settlement::TimedOut`] when its timer fires
//! first) and classifies it with [`classify`].

use crate::{NetError, RenderError};
use std::time::Duration;
use tokio::sync::mpsc;

/// Buffer for one navigation's signals; engines may emit a few before the
/// dispatcher drops the receiver.
const SETTLEMENT_BUFFER: usize = 8;

/// Terminal lifecycle notification for one navigation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// The page and its subresources finished loading
    LoadSucceeded,
    /// The main document failed to load
    LoadFailed { code: i64, description: String },
    /// The renderer process died
    Crashed,
    /// The DOM was parsed
    DomReady,
    /// Injected by the dispatcher's timer, never by an engine
    TimedOut,
    /// Anything else an engine chose to forward
    Unrecognized(String),
}

impl Settlement {
    pub fn name(&self) -> &str {
        match self {
            Settlement::LoadSucceeded => "load-succeeded",
            Settlement::LoadFailed { .. } => "load-failed",
            Settlement::Crashed => "crashed",
            Settlement::DomReady => "dom-ready",
            Settlement::TimedOut => "timed-out",
            Settlement::Unrecognized(name) => name,
        }
    }
}

pub type SettlementSender = mpsc::Sender<Settlement>;
pub type SettlementReceiver = mpsc::Receiver<Settlement>;

pub fn settlement_channel() -> (SettlementSender, SettlementReceiver) {
    mpsc::channel(SETTLEMENT_BUFFER)
}

/// Map a settlement signal to success or a typed failure.
///
/// `timeout` is only used to describe a [`Settlement::TimedOut`] failure.
pub fn classify(signal: Settlement, timeout: Duration) -> Result<(), RenderError> {
    match signal {
        Settlement::LoadSucceeded | Settlement::DomReady => Ok(()),
        Settlement::LoadFailed { code, description } => {
            Err(RenderError::Network(NetError::from_code(code, description)))
        }
        Settlement::Crashed => Err(RenderError::RendererCrash),
        Settlement::TimedOut => Err(RenderError::RendererTimeout(timeout)),
        Settlement::Unrecognized(name) => Err(RenderError::UnhandledEvent(name)),
    }
}
