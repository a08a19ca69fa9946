pub mod config;
pub mod status;
pub mod transfer;

pub use status::{show_status, wait_for};
pub use transfer::run_transfer;
