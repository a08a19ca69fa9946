use std::fmt;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Where the source photo comes from.
///
/// The provider accepts either a fetchable URL or an inline data URI, so a
/// local file is always shipped as a data URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ImageSource {
    /// A URL the provider fetches itself.
    Url(String),
    /// An image inlined as `data:<mime>;base64,...`.
    DataUri(String),
}

impl From<String> for ImageSource {
    fn from(value: String) -> Self {
        if value.starts_with("data:") {
            Self::DataUri(value)
        } else {
            Self::Url(value)
        }
    }
}

impl From<ImageSource> for String {
    fn from(source: ImageSource) -> Self {
        match source {
            ImageSource::Url(s) | ImageSource::DataUri(s) => s,
        }
    }
}

impl ImageSource {
    /// Interpret a CLI argument. URLs and data URIs pass through and
    /// anything else is read as a local file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or its type is unknown.
    pub fn from_arg(arg: &str) -> Result<Self> {
        if arg.trim().is_empty() {
            return Err(Error::InvalidRequest("image is required".into()));
        }
        if arg.starts_with("http://") || arg.starts_with("https://") || arg.starts_with("data:") {
            return Ok(Self::from(arg.to_string()));
        }
        Self::from_file(Path::new(arg))
    }

    /// Read a local image and encode it as a data URI.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or its extension is not
    /// a supported image type.
    pub fn from_file(path: &Path) -> Result<Self> {
        let mime = mime_for(path)?;
        let bytes = std::fs::read(path)?;
        Ok(Self::DataUri(format!(
            "data:{mime};base64,{}",
            STANDARD.encode(bytes)
        )))
    }

    /// The value placed in the provider's `control_image` field.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Url(s) | Self::DataUri(s) => s,
        }
    }
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => f.write_str(url),
            Self::DataUri(uri) => write!(f, "<data uri, {} bytes>", uri.len()),
        }
    }
}

fn mime_for(path: &Path) -> Result<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => Ok("image/jpeg"),
        "png" => Ok("image/png"),
        "webp" => Ok("image/webp"),
        "gif" => Ok("image/gif"),
        _ => Err(Error::UnsupportedImage(path.display().to_string())),
    }
}
