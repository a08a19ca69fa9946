use anyhow::{Context, Result};
use restyle_core::model::{ImageSource, Style, StyleRequest};
use restyle_gen::{Config, GenError, StyleTransfer};
use std::path::{Path, PathBuf};

/// Run one style transfer and print the result as JSON.
pub async fn run_transfer(
    config: &Config,
    image: &str,
    prompt: Option<String>,
    style: Option<PathBuf>,
) -> Result<()> {
    let request = build_request(image, prompt, style.as_deref())?;
    let transfer = StyleTransfer::from_config(config)?;

    log::info!("stylizing with model {}", config.model);
    let stylized = transfer.stylize(&request).await?;

    println!("{}", serde_json::to_string_pretty(&stylized)?);
    Ok(())
}

fn build_request(
    image: &str,
    prompt: Option<String>,
    style: Option<&Path>,
) -> Result<StyleRequest> {
    let image = ImageSource::from_arg(image).map_err(GenError::from)?;
    let mut request = StyleRequest::new(image);

    if let Some(path) = style {
        request = request.with_style(load_style(path)?);
    }
    if let Some(prompt) = prompt {
        request = request.with_prompt(prompt);
    }

    Ok(request)
}

fn load_style(path: &Path) -> Result<Style> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read style file {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse style file {}", path.display()))
}
