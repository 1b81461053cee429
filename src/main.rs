/// Process entry point: loads configuration, derives the broker/feed
/// session, wires every module into one `AppState`, and serves the control
/// surface until shut down.
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use breakout_engine::api::{router, AppState, CorsConfig, UserCredentials};
use breakout_engine::broker::{BrokerClient, LiveBrokerClient, PaperTradingBroker, TokenManager};
use breakout_engine::config::load_config;
use breakout_engine::eligibility::EligibilityEngine;
use breakout_engine::notify::{NoopSink, NotificationSink, TelegramSink};
use breakout_engine::run_controller::RunController;
use breakout_engine::state::SessionState;
use breakout_engine::telemetry::Telemetry;
use breakout_engine::tick_session::{FeedCredentials, TickSession};
use breakout_engine::watchlist::WatchlistStore;
use breakout_engine::Result;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("breakout_engine=info").json().init();

    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let config = load_config(&config_path)?;
    info!("configuration loaded");

    tokio::fs::create_dir_all("data").await.ok();

    // The market-data feed session is always derived via the live broker's
    // TOTP login, independent of whether order execution is paper-traded.
    let token_manager = Arc::new(TokenManager::new("data/tokens.json".to_string()));
    let live_client = LiveBrokerClient::new(
        Arc::clone(&token_manager),
        config.broker_client_code.clone(),
        config.broker_password.clone(),
        config.broker_totp_secret.clone(),
    );
    live_client.ensure_session().await?;
    let profile = live_client.profile().await?;
    let tokens = token_manager.get_tokens().await.expect("session derived above");

    let feed_credentials = FeedCredentials {
        api_key: config.broker_api_key.clone(),
        session_token: tokens.feed_token.clone(),
        user_id: profile.user_id.clone(),
    };

    let broker: Arc<dyn BrokerClient> = if config.enable_paper_trading {
        info!("paper trading mode enabled");
        Arc::new(PaperTradingBroker::new(config.trading.max_margin, 5.0))
    } else {
        info!("live trading mode");
        Arc::new(live_client)
    };

    let notifier: Arc<dyn NotificationSink> = match (&config.telegram_bot_token, &config.telegram_channel_id) {
        (Some(token), Some(channel)) => Arc::new(TelegramSink::new(token.clone(), channel.clone())),
        _ => {
            warn!("no telegram credentials configured; operator alerts are disabled");
            Arc::new(NoopSink)
        }
    };

    let session_state = Arc::new(SessionState::new());
    let tick_session = Arc::new(TickSession::new());
    let watchlist = Arc::new(WatchlistStore::new(&config.stocks_database_file));
    let eligibility = Arc::new(EligibilityEngine::new(
        Arc::clone(&watchlist),
        Arc::clone(&tick_session),
        "data/eligibility_snapshot.json",
    ));
    let telemetry = Arc::new(Telemetry::new(
        Arc::clone(&session_state),
        Arc::clone(&tick_session),
        Arc::clone(&broker),
    ));

    let run_controller = Arc::new(RunController::new(
        Arc::clone(&session_state),
        Arc::clone(&tick_session),
        Arc::clone(&eligibility),
        Arc::clone(&broker),
        Arc::clone(&notifier),
        feed_credentials.clone(),
    ));

    tokio::spawn({
        let telemetry = Arc::clone(&telemetry);
        async move { telemetry.run().await }
    });

    let credentials = UserCredentials::load(&config.user_credentials_file)?;
    let cors = CorsConfig::from(&config);
    let state = Arc::new(AppState::new(
        session_state,
        watchlist,
        run_controller,
        eligibility,
        broker,
        notifier,
        telemetry,
        feed_credentials,
        credentials,
        PathBuf::from("data/engine.log"),
    ));

    let app = router(state, cors);
    let addr = format!("0.0.0.0:{}", config.port);
    info!(%addr, "control surface listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
