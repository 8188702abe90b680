//! bmcmond - fleet telemetry collector for BMC-managed server nodes
//!
//! Maintains one push-event subscription per node controller, aggregates
//! sensor and status updates into a shared store via sharded workers, and
//! re-serves filtered snapshots to TCP clients as length-prefixed JSON
//! frames.

use bmcmond::app::App;
use bmcmond::config::AppConfig;
use bmcmond::error::Result;
use std::env;

/// Parse config path from command line arguments.
///
/// Supports:
/// - `bmcmond <path>` (positional)
/// - `bmcmond --config <path>` (flag-based)
/// - `bmcmond -c <path>` (short flag)
///
/// Defaults to `/etc/bmcmond.toml` if not specified.
fn parse_config_path() -> String {
    let args: Vec<String> = env::args().collect();

    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }

    if args.len() > 1 && !args[1].starts_with('-') {
        return args[1].clone();
    }

    "/etc/bmcmond.toml".to_string()
}

fn main() -> Result<()> {
    let config_path = parse_config_path();
    let config = AppConfig::from_file(&config_path)?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&config.logging.level),
    )
    .init();

    log::info!("bmcmond v{} starting", env!("CARGO_PKG_VERSION"));
    log::info!("using config: {}", config_path);

    App::new(config).run()
}
