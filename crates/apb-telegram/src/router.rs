use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use apb_core::{
    admission::AdmissionLimiter,
    config::{Config, StorageBackend},
    pipeline::{Pipeline, PipelineDeps},
    platform::{self, PlatformPort},
    store::{FileStore, MemoryStore, SessionStore, Sessions},
    throttle::OutboundThrottler,
};

use crate::handlers;
use crate::TelegramPlatform;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub pipeline: Pipeline,
}

/// Assemble the pipeline around an outbound platform (raw, not yet layered).
pub fn build_pipeline(cfg: &Config, raw: Arc<dyn PlatformPort>) -> Pipeline {
    let throttler = Arc::new(OutboundThrottler::new(cfg.throttle));
    let platform = platform::layered(raw, throttler, cfg.retry);

    let store: Arc<dyn SessionStore> = match &cfg.storage {
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
        StorageBackend::File(dir) => Arc::new(FileStore::new(dir.clone())),
    };

    Pipeline::new(PipelineDeps {
        platform,
        sessions: Sessions::new(store, cfg.session_defaults()),
        admission: AdmissionLimiter::new(cfg.admission_limit, cfg.admission_window),
        announce_to: cfg.announce_chat,
        owner: cfg.owner_id,
    })
}

pub async fn run_polling(cfg: Arc<Config>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    match bot.get_me().await {
        Ok(me) => tracing::info!(username = %me.username(), "apb started"),
        Err(e) => tracing::warn!(error = %e, "get_me failed; continuing"),
    }
    tracing::info!(storage = ?cfg.storage, owner = ?cfg.owner_id, "configuration loaded");

    let raw: Arc<dyn PlatformPort> = Arc::new(TelegramPlatform::new(bot.clone()));
    let pipeline = build_pipeline(&cfg, raw);

    let state = Arc::new(AppState {
        cfg: cfg.clone(),
        pipeline: pipeline.clone(),
    });

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handlers::handle_message))
        .branch(Update::filter_chat_member().endpoint(handlers::handle_chat_member));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    if pipeline.shutdown(cfg.shutdown_grace).await {
        tracing::info!("pipeline drained");
    }
    Ok(())
}
