//! listwatch binary: wires Redis, Telegram and the HTTP Readers into a
//! [`SubscriptionsService`], then serves console commands until `quit`,
//! end of input or Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::BufReader;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use listwatch::console;
use listwatch::notify::TelegramNotifier;
use listwatch::source::HttpReaderFactory;
use listwatch::store::{RedisDedupRepository, RedisSubscriptionRepository};
use listwatch::{Settings, Stores, SubscriptionsService};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // -- storage -------------------------------------------------------------
    let client = redis::Client::open(settings.redis_url.as_str()).context("invalid Redis URL")?;
    let conn = client
        .get_multiplexed_async_connection()
        .await
        .context("failed to connect to Redis")?;
    let stores = Stores {
        subscriptions: Arc::new(RedisSubscriptionRepository::new(conn.clone(), &settings.key_prefix)),
        listing_seen: Arc::new(RedisDedupRepository::new(conn.clone(), &settings.key_prefix, "listing")),
        slots_seen: Arc::new(RedisDedupRepository::new(conn, &settings.key_prefix, "slots")),
    };

    // -- delivery and sources ------------------------------------------------
    let notifier = Arc::new(TelegramNotifier::new(
        settings.telegram_api_url.clone(),
        settings.telegram_token.clone(),
    ));
    let readers = Arc::new(HttpReaderFactory::new(settings.slots_endpoint()));

    let service = SubscriptionsService::start(stores, readers, notifier, settings.service_config())
        .await
        .context("failed to resume stored subscriptions")?;
    info!(running = service.running(), "listwatch started, type `help` for commands");

    // -- command loop --------------------------------------------------------
    let stdin = BufReader::new(tokio::io::stdin());
    tokio::select! {
        res = console::run(&service, stdin, tokio::io::stdout()) => res.context("console failed")?,
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }

    service.shutdown().await;
    Ok(())
}
