//! Throttled image-generation client for restyle.
//!
//! Outbound calls to the generation provider go through a [`Throttler`]
//! that spaces dispatches and retries rate-limited calls, and asynchronous
//! jobs are awaited with a [`Poller`].

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]

pub mod config;
pub mod error;
pub mod poll;
pub mod replicate;
pub mod throttle;
pub mod transfer;

pub use config::Config;
pub use error::{GenError, GenResult};
pub use poll::{Poller, StatusSource};
pub use replicate::{PredictionApi, PredictionInput, ReplicateClient};
pub use throttle::{RateLimit, Throttled, Throttler};
pub use transfer::{StyleTransfer, Stylized};
