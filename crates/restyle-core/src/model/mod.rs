pub mod image;
pub mod prediction;
pub mod style;

pub use image::ImageSource;
pub use prediction::{JobStatus, Prediction};
pub use style::{Style, StyleRequest};
