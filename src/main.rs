//! Process entry point: wires the gateway, cache, event bus, snapshot store
//! and bot manager together, then either runs the bot fleet or issues a
//! one-shot management command against the snapshot store on disk.
//!
//! The HTTP admin surface and dashboard are out of scope here — this CLI is
//! the only operator-facing surface this binary exposes.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use core_types::{BotConfig, BotId, BotOptions, StrategyId};
use engine::{BotManager, RunnerFactory};
use events::{EventBus, MarketEvent, UserEvent};
use gateway::stream::{connect_market_stream, connect_user_stream, MarketFrame, UserStreamFrame};
use gateway::{BinanceGateway, ExchangeGateway};
use persistence::SnapshotStore;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;
use url::Url;

#[derive(Parser)]
#[command(author, version, about = "Multi-strategy crypto trading bot engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Loads every persisted bot, resumes the ones that were running, opens
    /// the exchange streams, and keeps the process alive until Ctrl-C.
    Run(DataDirArgs),
    /// Registers a new bot in `Stopped` state. Start it separately with `start-bot`.
    CreateBot(CreateBotArgs),
    /// Starts a previously created or stopped bot.
    StartBot(BotIdArgs),
    /// Stops a running bot, cancelling its open exchange orders.
    StopBot(BotIdArgs),
    /// Prints every persisted bot's id, strategy, symbol, status and stats.
    ListBots(DataDirArgs),
}

#[derive(clap::Args)]
struct DataDirArgs {
    #[arg(long, default_value = "./data/bots")]
    data_dir: String,
}

#[derive(clap::Args)]
struct BotIdArgs {
    #[arg(long, default_value = "./data/bots")]
    data_dir: String,
    #[arg(long)]
    id: uuid::Uuid,
}

#[derive(clap::Args)]
struct CreateBotArgs {
    #[arg(long, default_value = "./data/bots")]
    data_dir: String,
    #[arg(long)]
    name: String,
    /// One of `grid`, `dca_buy`, `dca_sell`.
    #[arg(long)]
    strategy: String,
    #[arg(long)]
    symbol: String,
    #[arg(long)]
    grid_levels: u32,
    #[arg(long)]
    grid_spread: rust_decimal::Decimal,
    /// Quote-currency budget per level for `grid`, base-unit quantity per
    /// entry for `dca_buy`/`dca_sell`.
    #[arg(long)]
    order_size: rust_decimal::Decimal,
    #[arg(long)]
    take_profit: Option<rust_decimal::Decimal>,
    /// 0 means unbounded.
    #[arg(long, default_value = "0")]
    duration_minutes: u64,
}

fn parse_strategy(s: &str) -> Result<StrategyId> {
    match s {
        "grid" => Ok(StrategyId::Grid),
        "dca_buy" => Ok(StrategyId::DcaBuy),
        "dca_sell" => Ok(StrategyId::DcaSell),
        other => bail!("unknown strategy '{other}', expected grid, dca_buy or dca_sell"),
    }
}

fn runner_factory() -> RunnerFactory {
    Arc::new(strategies::build_runner)
}

async fn build_manager(
    data_dir: &str,
) -> Result<(Arc<BotManager>, Arc<BinanceGateway>, EventBus, Arc<cache::MarketCache>)> {
    let config = configuration::load_config().context("loading configuration")?;
    let gateway = Arc::new(BinanceGateway::new(
        config.binance_base_url.clone(),
        &config.binance_api_key,
        &config.binance_api_secret,
    )?);
    let store = Arc::new(SnapshotStore::open(data_dir).await?);
    let bus = EventBus::new();
    let cache = Arc::new(cache::MarketCache::new());
    let manager = BotManager::new(
        store,
        bus.clone(),
        gateway.clone() as Arc<dyn ExchangeGateway>,
        cache.clone(),
        runner_factory(),
    );
    Ok((manager, gateway, bus, cache))
}

async fn handle_create_bot(args: CreateBotArgs) -> Result<()> {
    let (manager, _gateway, _bus, _cache) = build_manager(&args.data_dir).await?;
    let strategy = parse_strategy(&args.strategy)?;
    let config = BotConfig {
        grid_levels: args.grid_levels,
        grid_spread: args.grid_spread,
        order_size: args.order_size,
        take_profit: args.take_profit,
        duration_minutes: args.duration_minutes,
        initial_start_price: None,
        options: BotOptions::default(),
    };
    let id = manager.create_bot(args.name, strategy, args.symbol, config).await?;
    println!("created bot {id}");
    Ok(())
}

async fn handle_start_bot(args: BotIdArgs) -> Result<()> {
    let (manager, _gateway, _bus, _cache) = build_manager(&args.data_dir).await?;
    manager.load_bots_from_disk().await?;
    manager.start(BotId(args.id)).await?;
    println!("started bot {}", args.id);
    Ok(())
}

async fn handle_stop_bot(args: BotIdArgs) -> Result<()> {
    let (manager, _gateway, _bus, _cache) = build_manager(&args.data_dir).await?;
    manager.load_bots_from_disk().await?;
    manager.stop(BotId(args.id)).await?;
    println!("stopped bot {}", args.id);
    Ok(())
}

async fn handle_list_bots(args: DataDirArgs) -> Result<()> {
    let (manager, _gateway, _bus, _cache) = build_manager(&args.data_dir).await?;
    manager.load_bots_from_disk().await?;
    for bot in manager.list_bots().await {
        println!(
            "{} {:<8} {:<10} {:?} rounds={} pnl={}",
            bot.id, bot.strategy, bot.symbol, bot.status, bot.stats.completed_rounds, bot.stats.realized_pnl
        );
    }
    Ok(())
}

/// Forwards classified user-data-stream frames onto the typed event bus.
/// The gateway/stream layer deliberately speaks its own `UserStreamFrame`
/// shape; this is the one place that translates it into `events::UserEvent`.
fn spawn_user_event_forwarder(mut rx: Receiver<UserStreamFrame>, bus: EventBus, cache: Arc<cache::MarketCache>) {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match frame {
                UserStreamFrame::ExecutionReport {
                    symbol,
                    client_order_id,
                    exchange_order_id,
                    side,
                    status,
                    fill_price,
                    fill_quantity,
                } => {
                    bus.publish_user_event(UserEvent {
                        symbol,
                        client_order_id,
                        exchange_order_id,
                        side,
                        exec_status: status,
                        fill_price,
                        fill_quantity,
                        timestamp: chrono::Utc::now(),
                    });
                }
                UserStreamFrame::AccountUpdate { balances } => {
                    let map = balances.into_iter().map(|(asset, free, locked)| (asset, (free, locked))).collect();
                    cache.set_balances(map).await;
                }
                UserStreamFrame::Other { .. } => {}
            }
        }
    });
}

fn spawn_market_event_forwarder(mut rx: Receiver<MarketFrame>, symbol: String, bus: EventBus, cache: Arc<cache::MarketCache>) {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            cache.set_price(&symbol, frame.price).await;
            bus.publish_market(MarketEvent { symbol: symbol.clone(), price: frame.price, timestamp: chrono::Utc::now() });
        }
    });
}

/// Awaits either SIGINT or SIGTERM, whichever arrives first — a container
/// stop sends SIGTERM, and without this arm that's an ungraceful kill that
/// skips cancelling every bot's tagged orders.
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut terminate = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("waiting for ctrl-c")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")
}

fn websocket_base_url(rest_base_url: &str) -> Result<Url> {
    let ws = rest_base_url.replacen("https://", "wss://", 1).replacen("http://", "ws://", 1);
    Url::from_str(&ws).context("parsing websocket base url")
}

async fn handle_run(args: DataDirArgs) -> Result<()> {
    let config = configuration::load_config().context("loading configuration")?;
    let (manager, gateway, bus, cache) = build_manager(&args.data_dir).await?;

    gateway.spawn_time_sync();

    let ws_base_url = websocket_base_url(&config.binance_base_url)?;

    let (user_rx, user_stream_handle) = connect_user_stream(gateway.clone() as Arc<dyn ExchangeGateway>, ws_base_url.clone()).await?;
    spawn_user_event_forwarder(user_rx, bus.clone(), cache.clone());

    let mut market_handles = Vec::new();
    for symbol in config.symbols() {
        let (rx, handle) = connect_market_stream(ws_base_url.clone(), symbol.clone(), "trade".to_string());
        spawn_market_event_forwarder(rx, symbol, bus.clone(), cache.clone());
        market_handles.push(handle);
    }

    manager.load_bots_from_disk().await?;
    tracing::info!(symbols = ?config.symbols(), "bot manager ready, awaiting shutdown signal");

    wait_for_shutdown_signal().await?;
    tracing::info!("shutdown signal received, stopping every bot");
    manager.shutdown().await;

    user_stream_handle.close_all().await;
    for handle in market_handles {
        handle.close_all().await;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => handle_run(args).await,
        Commands::CreateBot(args) => handle_create_bot(args).await,
        Commands::StartBot(args) => handle_start_bot(args).await,
        Commands::StopBot(args) => handle_stop_bot(args).await,
        Commands::ListBots(args) => handle_list_bots(args).await,
    }
}
