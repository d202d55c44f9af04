use anyhow::{Context, Result};
use std::sync::Arc;
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::prelude::*;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use people_ratings::bot::{callback_handler, message_handler, BotContext};
use people_ratings::config::BotConfig;
use people_ratings::dialogue::BotDialogueState;
use people_ratings::storage::{PgStorage, Storage};
use people_ratings::{db, localization, provider, sweep};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|format| format == "json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();
    init_tracing();

    info!("Starting People Ratings Telegram Bot");

    let config = BotConfig::from_env().context("Invalid configuration")?;

    info!(
        provider = ?config.provider.kind(),
        max_connections = config.database_max_connections,
        "Connecting to database"
    );
    let pool = db::connect(&config.database_url, config.database_max_connections).await?;
    db::init_database_schema(&pool).await?;

    let storage: Arc<dyn Storage> = Arc::new(PgStorage::new(pool));
    for admin_id in &config.admin_ids {
        storage.grant_admin(*admin_id).await?;
    }

    localization::init_localization()?;

    let payment_provider = provider::from_config(&config.provider)?;
    let ctx = Arc::new(BotContext::new(&config, storage.clone(), payment_provider));

    // Sweep runs beside the dispatcher and stops once it returns
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweep_handle = tokio::spawn(sweep::run_sweep_loop(
        storage.clone(),
        config.sweep_interval,
        config.payment_grace,
        shutdown_rx,
    ));

    let bot = Bot::new(&config.telegram_token);

    info!("Bot initialized, starting dispatcher");

    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .enter_dialogue::<Message, InMemStorage<BotDialogueState>, BotDialogueState>()
                .endpoint(message_handler),
        )
        .branch(
            Update::filter_callback_query()
                .enter_dialogue::<CallbackQuery, InMemStorage<BotDialogueState>, BotDialogueState>()
                .endpoint(callback_handler),
        );

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![InMemStorage::<BotDialogueState>::new(), ctx])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Dispatcher stopped, shutting down payment sweep");
    if shutdown_tx.send(true).is_err() {
        error!("Payment sweep exited before shutdown");
    }
    sweep_handle.await?;

    Ok(())
}
