use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::image::ImageSource;

/// Art style metadata selected by the user.
///
/// Only `prompt` and `description` feed the generation request; the
/// remaining fields describe the style for downstream consumers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Style {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub era: Option<String>,
    #[serde(default)]
    pub movement: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

impl Style {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// One style-transfer request: a photo plus what to turn it into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleRequest {
    pub image: ImageSource,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub style: Option<Style>,
}

impl StyleRequest {
    #[must_use]
    pub fn new(image: ImageSource) -> Self {
        Self {
            image,
            prompt: None,
            style: None,
        }
    }

    #[must_use]
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    #[must_use]
    pub fn with_style(mut self, style: Style) -> Self {
        self.style = Some(style);
        self
    }

    /// The prompt sent to the provider.
    ///
    /// The explicit prompt wins, then the style's prompt, then its
    /// description. Blank strings count as absent.
    ///
    /// # Errors
    /// Returns [`Error::InvalidRequest`] when no prompt can be derived.
    pub fn resolve_prompt(&self) -> Result<String> {
        let style = self.style.as_ref();
        [
            self.prompt.as_deref(),
            style.and_then(|s| s.prompt.as_deref()),
            style.and_then(|s| s.description.as_deref()),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|p| !p.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidRequest("no prompt or style description given".into()))
    }
}
