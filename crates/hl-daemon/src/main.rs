//! hatchline daemon — ingests clutch images given on the command line and
//! runs them through the analysis pipeline to consolidation.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use hl_core::config::Config;
use hl_daemon::Daemon;
use hl_model::{AnthropicChatModel, OpenAiImageModel};
use hl_store::RecordStore;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    hl_daemon::logging::init_logging("hatchlined", "info");

    let image_paths: Vec<String> = std::env::args().skip(1).collect();
    if image_paths.is_empty() {
        anyhow::bail!("usage: hatchlined <clutch-image>...");
    }

    let config = Config::load().unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        Config::default()
    });
    config.validate().context("invalid configuration")?;

    let chat_key =
        std::env::var("ANTHROPIC_API_KEY").context("ANTHROPIC_API_KEY is not set")?;
    let image_key = std::env::var("OPENAI_API_KEY").context("OPENAI_API_KEY is not set")?;

    let chat_model = Arc::new(AnthropicChatModel::new(chat_key));
    let image_model = Arc::new(OpenAiImageModel::new(image_key));

    let daemon = Daemon::new(config, chat_model, image_model);
    daemon.spawn_workers();

    let shutdown = daemon.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            shutdown.trigger();
        }
    });

    let mut clutch_ids = Vec::new();
    for path in &image_paths {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {path}"))?;
        let outcome = daemon
            .ingest(bytes, path)
            .await
            .with_context(|| format!("intake failed for {path}"))?;
        info!(
            clutch_id = %outcome.clutch_id,
            eggs = outcome.eggs_detected,
            path,
            "clutch ingested"
        );
        clutch_ids.push(outcome.clutch_id);
    }

    for clutch_id in clutch_ids {
        if daemon
            .wait_for_consolidation(clutch_id, Duration::from_secs(600))
            .await
        {
            let meta = daemon.store().get_clutch_meta(clutch_id).await?;
            if let Some(meta) = meta {
                info!(
                    clutch_id = %clutch_id,
                    total = meta.total_egg_count,
                    viable = meta.viable_egg_count,
                    composite = meta.chicken_image_key.as_deref().unwrap_or("none"),
                    "clutch complete"
                );
            }
        } else {
            warn!(clutch_id = %clutch_id, "clutch did not consolidate before timeout");
        }
    }

    daemon.shutdown_handle().trigger();
    Ok(())
}
