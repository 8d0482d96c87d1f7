//! # Route Quoter
//!
//! Prints the best trade between two currencies.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin route_quoter -- --from ETH --to USDC --amount 1000000000000000000
//! cargo run --bin route_quoter -- --from USDC --to ETH --amount 5000000 --exact-out --watch
//! ```
//!
//! Currencies are the native symbol, a configured token symbol or address, or
//! `<address>:<decimals>`. Amounts are raw integer units. `--watch` keeps refreshing on
//! new blocks and on the refresh interval until Ctrl+C.

use amm_route_sdk::{
    aggregator::AggregatorClient,
    block_number_websocket::BlockNumberWebSocket,
    block_stream::BlockStream,
    metrics,
    multicall::Multicall,
    pair_state::PairStateCache,
    scheduler::RefreshScheduler,
    settings::Settings,
    trade::{Trade, TradeState},
    trade_service::{TradeRequest, TradeService, TradeServiceConfig},
    types::conversions::u256_to_decimal,
};
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use ethers::prelude::{Http, Provider, U256};
use std::sync::Arc;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(name = "route_quoter", about = "Best-trade quotes over AMM pools")]
struct Args {
    /// Input currency
    #[arg(long)]
    from: String,
    /// Output currency
    #[arg(long)]
    to: String,
    /// Raw amount: input for exact-in, wanted output with --exact-out
    #[arg(long)]
    amount: String,
    #[arg(long)]
    exact_out: bool,
    /// Only consider direct pools
    #[arg(long)]
    single_hop: bool,
    #[arg(long, default_value = "Config.toml")]
    config: String,
    /// Keep quoting on every refresh until Ctrl+C
    #[arg(long)]
    watch: bool,
}

fn init_logging(level: &str) {
    #[cfg(feature = "observability")]
    {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    #[cfg(not(feature = "observability"))]
    {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    }
}

fn print_state(state: &TradeState) {
    match state {
        TradeState::Idle => println!("idle"),
        TradeState::Loading => println!("loading..."),
        TradeState::NoRoute => println!("no route"),
        TradeState::Ready(trade) => print_trade(trade),
    }
}

fn print_trade(trade: &Trade) {
    let amount_in = u256_to_decimal(trade.amount_in, trade.input_currency.decimals());
    let amount_out = u256_to_decimal(trade.amount_out, trade.output_currency.decimals());
    println!(
        "{:?} {} {} -> {} {} via {:?}",
        trade.trade_type,
        amount_in.map(|d| d.to_string()).unwrap_or_else(|_| trade.amount_in.to_string()),
        trade.input_currency,
        amount_out.map(|d| d.to_string()).unwrap_or_else(|_| trade.amount_out.to_string()),
        trade.output_currency,
        trade.source,
    );
    for (i, step) in trade.path.iter().enumerate() {
        println!(
            "  {}. {:?} -> {:?} [{} {:?}]",
            i + 1,
            step.source,
            step.target,
            step.kind.as_str(),
            step.pool_id
        );
    }
    println!(
        "  price {} {} per {} (inverse {})",
        trade.price_output_per_input, trade.output_currency, trade.input_currency, trade.price_input_per_output
    );
    println!("  price impact {}%", trade.price_impact);
    println!("  min out {} / max in {}", trade.min_amount_out, trade.max_amount_in);
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let mut settings = Settings::from_path(&args.config)
        .with_context(|| format!("failed to load {}", args.config))?;
    if args.single_hop {
        settings.routing.single_hop_only = true;
    }
    init_logging(&settings.log.level);
    metrics::describe_metrics();

    let context = settings.routing_context()?;
    let input = context
        .resolve_currency(&args.from)
        .ok_or_else(|| anyhow!("unknown currency {:?}", args.from))?;
    let output = context
        .resolve_currency(&args.to)
        .ok_or_else(|| anyhow!("unknown currency {:?}", args.to))?;
    let amount = U256::from_dec_str(&args.amount).context("amount must be a decimal integer")?;

    let http_url = settings
        .rpc
        .http_url
        .clone()
        .ok_or_else(|| anyhow!("rpc.http_url is not set"))?;
    let multicall_address = context
        .multicall
        .ok_or_else(|| anyhow!("chain.multicall is not set"))?;
    let provider = Arc::new(Provider::<Http>::try_from(http_url.as_str())?);
    let multicall = Arc::new(Multicall::new(
        provider,
        multicall_address,
        settings.rpc.multicall_batch_size,
    ));
    let pairs = Arc::new(PairStateCache::new(
        multicall,
        context.factory,
        context.stable_pools.clone(),
        context.v2_fee_bps,
    ));

    let scheduler = RefreshScheduler::new(settings.refresh.interval(), settings.refresh.debounce());
    let mut service = TradeService::new(pairs, TradeServiceConfig::from(&context))
        .with_trigger(scheduler.trigger());
    if let Some(api_base) = &settings.aggregator.api_base {
        service = service.with_aggregator(AggregatorClient::new(api_base)?);
    }
    let service = Arc::new(service);

    let request = if args.exact_out {
        TradeRequest::exact_out(input, output, amount)
    } else {
        TradeRequest::exact_in(input, output, amount)
    };
    service.set_request(Some(request));

    if !args.watch {
        match service.refresh().await {
            Some(state) => print_state(&state),
            None => print_state(&service.current()),
        }
        return Ok(());
    }

    let blocks = Arc::new(BlockStream::new(settings.refresh.block_channel_capacity));
    let scheduler = scheduler.with_blocks(blocks.subscribe());
    let ws_handle = settings
        .rpc
        .ws_url
        .clone()
        .map(|url| BlockNumberWebSocket::new(url, blocks.clone()).start());

    let (ticks, scheduler_handle) = scheduler.spawn(4);
    let runner = {
        let service = service.clone();
        tokio::spawn(async move { service.run(ticks).await })
    };

    let mut states = service.subscribe();
    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                print_state(&state);
            }
            _ = signal::ctrl_c() => {
                println!("shutting down");
                break;
            }
        }
    }

    scheduler_handle.abort();
    runner.abort();
    if let Some(handle) = ws_handle {
        handle.abort();
    }
    Ok(())
}
