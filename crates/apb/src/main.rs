use std::sync::Arc;

use apb_core::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    apb_core::logging::init("apb")?;

    let cfg = Arc::new(Config::load()?);
    tracing::debug!(config = ?cfg, "starting");

    apb_telegram::router::run_polling(cfg)
        .await
        .map_err(|e| anyhow::anyhow!("telegram bot failed: {e}"))?;

    Ok(())
}
