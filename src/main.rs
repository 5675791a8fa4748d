use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use clap::{Parser, Subcommand};
use location_tracker::config::ServiceConfig;
use location_tracker::tracking::{
    policy, selector, ForegroundNotice, LocationPlatform, LogNotificationHost, QualityTier,
    ServiceSettings, SimulatedPlatform, TrackingError, TrackingEvent, TrackingService,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Location Tracker: background position tracking over a simulated platform
///
/// Picks a positioning provider for a quality tier, keeps a foreground
/// notice up while tracking, and streams position updates as JSON lines.
///
/// Examples:
///   tracker providers
///   tracker run --tier high_accuracy --count 5
///   tracker run --tier low --interval-ms 250 --duration-ms 3000
///   tracker serve --port 3030
#[derive(Parser)]
#[command(name = "tracker", version, about, long_about = None)]
struct Cli {
    /// Config file. Defaults to ~/.location-tracker/config.json.
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the simulated providers and the provider chosen per tier.
    Providers,

    /// Run one tracking session and print every event as a JSON line.
    Run {
        /// Quality tier: low_power, balanced or high_accuracy.
        #[arg(long, short = 't', value_parser = parse_tier)]
        tier: Option<QualityTier>,

        /// Stop after this many updates.
        #[arg(long, short = 'n')]
        count: Option<u64>,

        /// Interval between updates in milliseconds.
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Stop once the session has been active this long.
        #[arg(long)]
        duration_ms: Option<u64>,

        /// Give up if no event arrives within this many seconds.
        #[arg(long, default_value_t = 30)]
        idle_timeout: u64,
    },

    /// Start the HTTP control server.
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long, short = 'p', default_value_t = 3030)]
        port: u16,
    },

    /// Write the default configuration to the config path.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

/// Used when a run has neither `--count` nor `--duration-ms` nor a limit in
/// the config file.
const DEFAULT_RUN_COUNT: u64 = 10;

fn parse_tier(s: &str) -> Result<QualityTier, String> {
    s.parse()
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Command::InitConfig { force } => {
            let path = config_path.map_or_else(ServiceConfig::default_path, Path::to_path_buf);
            init_config(&path, force);
        }
        Command::Providers => list_providers(&load_config(config_path)),
        Command::Run { tier, count, interval_ms, duration_ms, idle_timeout } => {
            let mut config = load_config(config_path);
            if let Some(n) = count {
                config.request.max_updates = Some(n);
            }
            if let Some(ms) = interval_ms {
                config.request.interval_ms = ms;
            }
            if let Some(ms) = duration_ms {
                config.request.duration_ms = Some(ms);
            }
            if config.request.max_updates.is_none() && config.request.duration_ms.is_none() {
                config.request.max_updates = Some(DEFAULT_RUN_COUNT);
            }
            let tier = tier.unwrap_or(config.default_tier);
            run_session(&config, tier, Duration::from_secs(idle_timeout));
        }
        Command::Serve { host, port } => serve(&load_config(config_path), &host, port),
    }
}

fn load_config(path: Option<&Path>) -> ServiceConfig {
    let loaded = match path {
        Some(path) => ServiceConfig::load_from(path),
        None => ServiceConfig::load(),
    };
    loaded.unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    })
}

// ── Subcommands ─────────────────────────────────────────────────

fn init_config(path: &Path, force: bool) {
    if path.exists() && !force {
        eprintln!("Error: {} already exists (use --force to overwrite)", path.display());
        std::process::exit(1);
    }
    if let Err(e) = ServiceConfig::default().save_to(path) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
    eprintln!("  Wrote {}", path.display());
}

fn list_providers(config: &ServiceConfig) {
    let platform = SimulatedPlatform::from_config(config);
    let providers = platform.list_providers();

    eprintln!("  {:<10} {:<8} {:<8} {:<6} {:<8} {}", "NAME", "ACCURACY", "POWER", "COST", "ENABLED", "ALT/BRG/SPD");
    for p in &providers {
        eprintln!(
            "  {:<10} {:<8} {:<8} {:<6} {:<8} {}/{}/{}",
            p.name,
            format!("{:?}", p.accuracy),
            format!("{:?}", p.power),
            p.monetary_cost,
            p.enabled,
            flag(p.supports_altitude),
            flag(p.supports_bearing),
            flag(p.supports_speed),
        );
    }
    eprintln!();

    let options = ServiceSettings::from(config).select;
    for tier in QualityTier::ALL {
        let choice = selector::select_with_options(&policy::resolve(tier), &providers, &options);
        match choice {
            Ok(p) => eprintln!("  {:<14} -> {}", tier.to_string(), p.name),
            Err(e) => eprintln!("  {:<14} -> none ({})", tier.to_string(), e),
        }
    }
}

fn flag(b: bool) -> &'static str {
    if b { "y" } else { "-" }
}

fn run_session(config: &ServiceConfig, tier: QualityTier, idle_timeout: Duration) {
    let platform = Arc::new(SimulatedPlatform::from_config(config));
    let presence = Arc::new(ForegroundNotice::new(LogNotificationHost, config.presence.clone()));
    let service = TrackingService::with_settings(platform, presence, ServiceSettings::from(config));

    let (tx, rx) = mpsc::channel::<TrackingEvent>();
    service.on_update(move |event| {
        let _ = tx.send(event);
    });

    let snapshot = service.start(tier).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });
    if let Some(p) = &snapshot.selected_provider {
        info!(tier = %tier, provider = %p.name, "tracking started");
    }

    let mut failed = false;
    loop {
        let event = match rx.recv_timeout(idle_timeout) {
            Ok(event) => event,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!("no event within {:?}, stopping", idle_timeout);
                break;
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };

        match serde_json::to_string(&event) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("cannot serialize event: {}", e),
        }

        match event {
            TrackingEvent::Update(_) => {}
            TrackingEvent::Finished { .. } => break,
            TrackingEvent::ProviderLost { .. } => {
                failed = true;
                break;
            }
        }
    }

    match service.stop() {
        Ok(()) | Err(TrackingError::NotRunning) => {}
        Err(e) => warn!("stop: {}", e),
    }
    let delivered = service.status().delivered;
    service.destroy();
    info!(delivered, "tracking finished");

    if failed {
        std::process::exit(1);
    }
}

fn serve(config: &ServiceConfig, host: &str, port: u16) {
    let runtime = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("Error: cannot start runtime: {}", e);
        std::process::exit(1);
    });
    if let Err(e) = runtime.block_on(location_tracker::server::start(config, host, port)) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
