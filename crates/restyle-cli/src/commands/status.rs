use anyhow::Result;
use restyle_gen::{Config, Poller, ReplicateClient};

/// Fetch a prediction once and print it as JSON.
pub async fn show_status(config: &Config, id: &str) -> Result<()> {
    let client = ReplicateClient::new(config)?;
    let prediction = client.get_prediction(id).await?;
    println!("{}", serde_json::to_string_pretty(&prediction)?);
    Ok(())
}

/// Poll a prediction until it is terminal and print it as JSON.
///
/// Uses the configured poll interval and attempt budget, so this gives up
/// the same way a transfer would.
pub async fn wait_for(config: &Config, id: &str) -> Result<()> {
    let client = ReplicateClient::new(config)?;
    let poller = Poller::new(client, config.poll.clone());

    log::info!(
        "waiting for prediction {} (up to {} polls, {} ms apart)",
        id,
        config.poll.max_attempts,
        config.poll.interval_ms
    );
    let prediction = poller.await_completion(id).await?;
    println!("{}", serde_json::to_string_pretty(&prediction)?);
    Ok(())
}
