//! Stdio order engine.
//!
//! Reads line-delimited JSON intents on stdin (place, cancel, market),
//! drives the order core through risk admission, and emits engine
//! events on stdout. Logs go to stderr so the event stream stays clean.

use anyhow::{Context, Result};
use clap::Parser;
use mimir_core::config::{EngineConfig, RiskConfig, WalConfig};
use mimir_core::core::{CancelOrderRequest, Instrument, PlaceOrderRequest, Symbol};
use mimir_core::engine::{Engine, EventEmitter};
use mimir_core::oms::OrderCore;
use mimir_core::risk::RiskEngine;
use mimir_core::utils::{init_logger, now_ns};
use serde::Deserialize;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "stdio-engine", about = "LDJSON order engine over stdin/stdout")]
struct Args {
    /// Traded symbol
    #[arg(long, default_value = "BTCUSDT")]
    symbol: String,

    /// Base asset of the symbol
    #[arg(long, default_value = "BTC")]
    base_asset: String,

    /// Quote asset of the symbol
    #[arg(long, default_value = "USDT")]
    quote_asset: String,

    /// Initial free quote balance
    #[arg(long, default_value_t = 100_000.0)]
    quote_balance: f64,

    /// Initial free base balance
    #[arg(long, default_value_t = 0.0)]
    base_balance: f64,

    /// WAL directory
    #[arg(long, default_value = ".")]
    wal_dir: PathBuf,

    /// WAL file prefix
    #[arg(long, default_value = "orders")]
    wal_prefix: String,

    /// Disable fsync-per-write on the WAL
    #[arg(long)]
    no_sync: bool,

    /// Simulated fill delay in milliseconds
    #[arg(long, default_value_t = 300)]
    fill_delay_ms: u64,

    /// Risk: account balance for the margin check
    #[arg(long, default_value_t = 100_000.0)]
    risk_balance: f64,

    /// Risk: max quantity per order
    #[arg(long, default_value_t = 1000.0)]
    max_order_size: f64,

    /// Risk: max orders per second
    #[arg(long, default_value_t = 100)]
    max_order_rate: usize,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// JSON-formatted logs
    #[arg(long)]
    json_logs: bool,
}

/// Input grammar, one JSON object per stdin line.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Intent {
    Place {
        #[serde(flatten)]
        request: PlaceOrderRequest,
    },
    Cancel {
        #[serde(flatten)]
        request: CancelOrderRequest,
    },
    Market {
        symbol: Symbol,
        price: f64,
        #[serde(default)]
        ts_ns: Option<i64>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args.log_level, args.json_logs);

    let config = EngineConfig {
        fill_delay_ns: (args.fill_delay_ms as i64) * 1_000_000,
        wal: WalConfig {
            directory: args.wal_dir.clone(),
            file_prefix: args.wal_prefix.clone(),
            sync_on_write: !args.no_sync,
            ..Default::default()
        },
    };

    let core = Arc::new(OrderCore::new(config).context("opening order core")?);
    core.register_instrument(Instrument::new(
        args.symbol.as_str(),
        args.base_asset.as_str(),
        args.quote_asset.as_str(),
    ));
    core.deposit(&args.quote_asset, args.quote_balance);
    if args.base_balance > 0.0 {
        core.deposit(&args.base_asset, args.base_balance);
    }

    let risk = Arc::new(RiskEngine::new(RiskConfig {
        account_balance: args.risk_balance,
        max_order_size: args.max_order_size,
        max_order_rate: args.max_order_rate,
        ..Default::default()
    }));

    let engine = Engine::new(core, risk, Arc::new(EventEmitter::stdout()));
    engine.emit_account_snapshot(now_ns());

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
        })
        .context("installing signal handler")?;
    }

    // Stdin reader thread; the channel closes on EOF.
    let (line_tx, line_rx) = mpsc::channel::<String>();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "stdin read failed");
                    break;
                }
            }
        }
    });

    info!(symbol = %args.symbol, "stdio engine running");
    let mut stdin_open = true;
    while running.load(Ordering::SeqCst) {
        match line_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(line) => {
                let line = line.trim();
                if !line.is_empty() {
                    handle_line(&engine, line);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                if stdin_open {
                    info!("stdin closed, draining pending fills");
                    stdin_open = false;
                }
                // Keep pumping until every pending order resolves.
                if engine.core().pending_count() == 0 {
                    break;
                }
                std::thread::sleep(Duration::from_millis(10));
            }
        }
        if let Err(e) = engine.pump_due_fills(now_ns()) {
            error!(error = %e, "fill pump failed");
            break;
        }
    }

    engine.core().checkpoint().context("final checkpoint")?;
    engine.emit_account_snapshot(now_ns());
    info!("stdio engine stopped");
    Ok(())
}

fn handle_line(engine: &Engine, line: &str) {
    let intent: Intent = match serde_json::from_str(line) {
        Ok(intent) => intent,
        Err(e) => {
            warn!(error = %e, "unparseable intent line");
            engine
                .emitter()
                .emit_error(&format!("bad intent: {}", e), now_ns());
            return;
        }
    };

    let now = now_ns();
    let result = match intent {
        Intent::Place { request } => engine.handle_place(&request, now).map(|_| ()),
        Intent::Cancel { request } => engine.handle_cancel(&request, now).map(|_| ()),
        Intent::Market { symbol, price, ts_ns } => {
            engine.on_market(&symbol, price, ts_ns.unwrap_or(now));
            Ok(())
        }
    };

    if let Err(e) = result {
        error!(error = %e, "intent processing failed");
        engine.emitter().emit_error(&e.to_string(), now_ns());
    }
}
