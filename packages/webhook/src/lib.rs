#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Outbound webhook delivery.
//!
//! A [`DeliveryWorker`] drains a [`geocore_queue::WorkQueue`] and hands each
//! payload to its own task, which POSTs it to a [`WebhookSink`] under a
//! [`RetryPolicy`]. Consumption never waits on delivery. Events that
//! exhaust their attempts are dropped with a log record, or pushed onto a
//! dead-letter queue when one is configured.

pub mod retry;
pub mod sink;
pub mod worker;

pub use retry::RetryPolicy;
pub use sink::{HttpWebhookSink, WebhookSink};
pub use worker::{DeliveryWorker, WorkerConfig, WorkerState};

use std::time::Duration;

/// A single failed delivery attempt.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The request never produced a response.
    #[error("Webhook transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The endpoint answered with a status of 400 or above.
    #[error("Webhook rejected delivery with HTTP {status}")]
    Status {
        /// HTTP status code returned by the endpoint.
        status: u16,
    },

    /// The attempt did not finish within the per-attempt timeout.
    #[error("Webhook attempt timed out after {timeout:?}")]
    Timeout {
        /// The timeout that elapsed.
        timeout: Duration,
    },
}

/// Final result of delivering one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The sink accepted the payload.
    Delivered {
        /// Attempts used, including the successful one.
        attempts: u32,
    },

    /// Every attempt failed and the payload was dropped.
    Abandoned {
        /// Attempts made.
        attempts: u32,
        /// The last attempt's error message.
        last_error: String,
    },

    /// Every attempt failed and the payload was moved to a dead-letter
    /// queue.
    DeadLettered {
        /// Attempts made.
        attempts: u32,
        /// Name of the queue the payload was pushed to.
        queue: String,
    },
}

impl DeliveryOutcome {
    /// Returns `true` for [`DeliveryOutcome::Delivered`].
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    /// Number of attempts made.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Delivered { attempts }
            | Self::Abandoned { attempts, .. }
            | Self::DeadLettered { attempts, .. } => *attempts,
        }
    }
}
