use anyhow::Result;
use restyle_gen::{config, Config};

/// Show the current effective configuration.
pub fn show_config() -> Result<()> {
    let config = Config::load()?;
    let config_path = config::config_file_path();

    println!("Current Configuration");
    println!("=====================\n");

    println!("Config file: {}", config_path.display());
    let exists = config_path.exists();
    println!("File exists: {}\n", if exists { "yes" } else { "no (using defaults)" });

    println!("Settings:");
    println!("  replicate_api_token: {}", mask_token(config.replicate_api_token.as_deref()));
    println!("  api_base: {}", config.api_base);
    println!("  model: {}", config.model);
    println!("  request_timeout_secs: {}", config.request_timeout_secs);
    println!("  throttle.min_interval_ms: {}", config.throttle.min_interval_ms);
    println!("  throttle.default_retry_after_ms: {}", config.throttle.default_retry_after_ms);
    println!(
        "  throttle.max_rate_limit_retries: {}",
        config
            .throttle
            .max_rate_limit_retries
            .map_or_else(|| "<unlimited>".to_string(), |n| n.to_string())
    );
    println!("  poll.interval_ms: {}", config.poll.interval_ms);
    println!("  poll.max_attempts: {}", config.poll.max_attempts);
    println!("  generation.num_inference_steps: {}", config.generation.num_inference_steps);
    println!("  generation.guidance: {}", config.generation.guidance);
    println!("  generation.control_strength: {}", config.generation.control_strength);
    println!("  generation.output_format: {}", config.generation.output_format);
    println!("  generation.output_quality: {}", config.generation.output_quality);

    println!("\nPriority: --token > REPLICATE_API_TOKEN > ENV vars (RESTYLE_*) > Config file > Defaults");

    Ok(())
}

/// Show the config file path.
pub fn show_path() -> Result<()> {
    println!("{}", config::config_file_path().display());
    Ok(())
}

/// Initialize config file with defaults.
pub fn init_config() -> Result<()> {
    let created = config::ensure_config_file()?;
    let config_path = config::config_file_path();

    if created {
        println!("✓ Created config file: {}", config_path.display());
        println!("\nEdit this file to set your Replicate API token.");
    } else {
        println!("Config file already exists: {}", config_path.display());
    }

    Ok(())
}

/// Keep only enough of the token to tell which one is configured.
fn mask_token(token: Option<&str>) -> String {
    match token {
        None => "<not set>".to_string(),
        Some(t) if t.chars().count() <= 8 => "****".to_string(),
        Some(t) => {
            let prefix: String = t.chars().take(4).collect();
            format!("{prefix}****")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_token() {
        assert_eq!(mask_token(None), "<not set>");
        assert_eq!(mask_token(Some("short")), "****");
        assert_eq!(mask_token(Some("r8_abcdefghijk")), "r8_a****");
    }
}
