//! Host-side relays for the network and control channels.
//!
//! Each relay runs as its own task against the host end of a channel. A
//! relay stops when its peer closes the stream, when its cancellation
//! token fires, or on the first protocol or I/O error.

mod control;
mod frame;
mod network;
mod packet;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use guest_harness_core::error::{HarnessError, Result};
use guest_harness_core::RelayConfig;
use tokio_util::sync::CancellationToken;

use crate::channel::ChannelKind;

pub use control::run_control_relay;
pub use frame::{read_frame, write_frame};
pub use network::run_network_relay;
pub use packet::{describe_packet, synthesize_reply};

/// Runtime knobs shared by both relays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOptions {
    /// Longest wait for the next inbound frame or message. `None` waits
    /// indefinitely.
    pub idle_timeout: Option<Duration>,

    /// Text sent back for every control message, without the newline.
    pub control_reply: String,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            idle_timeout: None,
            control_reply: "yay".to_string(),
        }
    }
}

impl From<&RelayConfig> for RelayOptions {
    fn from(config: &RelayConfig) -> Self {
        Self {
            idle_timeout: config.idle_timeout(),
            control_reply: config.control_reply.clone(),
        }
    }
}

/// Live traffic counters of one relay.
///
/// Shared with the task that owns the relay so counts survive a relay that
/// ends in an error.
#[derive(Debug, Default)]
pub struct RelayStats {
    received: AtomicU64,
    sent: AtomicU64,
}

impl RelayStats {
    pub fn snapshot(&self) -> RelayCounts {
        RelayCounts {
            received: self.received.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
        }
    }

    fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayCounts {
    /// Frames or messages received from the guest.
    pub received: u64,
    /// Replies written back.
    pub sent: u64,
}

/// Await one inbound read under the relay's idle timeout and cancellation.
///
/// Yields `Ok(None)` when cancelled.
async fn next_inbound<F, T>(
    channel: ChannelKind,
    options: &RelayOptions,
    cancel: &CancellationToken,
    read: F,
) -> Result<Option<T>>
where
    F: Future<Output = Result<T>>,
{
    let bounded = async {
        match options.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, read).await.map_err(|_| {
                HarnessError::RelayTimeout {
                    channel: channel.to_string(),
                    secs: limit.as_secs(),
                }
            })?,
            None => read.await,
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Ok(None),
        result = bounded => result.map(Some),
    }
}
