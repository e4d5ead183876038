//! Shutdown signal handling.
//!
//! The signal future is polled once at startup so a handler that cannot be
//! registered fails the service before any ingestion work begins.
//!
//! # Example
//!
//! ```ignore
//! let signal = ShutdownSignal::install(tokio::signal::ctrl_c()).await?;
//! // Start work
//! signal.recv().await?;
//! ```

use std::future::Future;
use std::io;
use std::pin::Pin;

use casefeed_core::{CasefeedError, CasefeedResult};

/// A registered shutdown signal that has not been awaited yet.
pub struct ShutdownSignal<F> {
    /// `None` once the signal fired during installation.
    pending: Option<Pin<Box<F>>>,
}

impl<F> ShutdownSignal<F>
where
    F: Future<Output = io::Result<()>>,
{
    /// Poll `signal` once, surfacing registration errors immediately.
    pub async fn install(signal: F) -> CasefeedResult<Self> {
        let mut signal = Box::pin(signal);
        let first_poll = tokio::select! {
            biased;
            result = &mut signal => Some(result),
            _ = std::future::ready(()) => None,
        };

        match first_poll {
            Some(result) => {
                result.map_err(signal_error)?;
                Ok(Self { pending: None })
            }
            None => Ok(Self {
                pending: Some(signal),
            }),
        }
    }

    /// Wait until the signal arrives.
    pub async fn recv(self) -> CasefeedResult<()> {
        match self.pending {
            Some(signal) => signal.await.map_err(signal_error),
            None => Ok(()),
        }
    }
}

impl<F> std::fmt::Debug for ShutdownSignal<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("fired", &self.pending.is_none())
            .finish()
    }
}

fn signal_error(e: io::Error) -> CasefeedError {
    CasefeedError::Signal {
        reason: e.to_string(),
    }
}
