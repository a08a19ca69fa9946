//! Core domain model for restyle.
//!
//! This crate defines the request side (style metadata, image sources) and
//! the response side (predictions and their job status) of a style
//! transfer, independent of any particular HTTP provider.

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]

pub mod error;
pub mod model;

pub use error::{Error, Result};
