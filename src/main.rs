mod dtt_assistant;
mod dtt_config;
mod dtt_controllers;
mod dtt_editor;
mod dtt_fleet;
mod dtt_gui;
mod dtt_models;
mod dtt_session;
mod dtt_sim;
mod dtt_views;

use anyhow::Context;
use clap::Parser;
use dtt_assistant::Assistant;
use dtt_config::AppConfig;
use dtt_controllers::DTTControllers;
use dtt_fleet::RouteFilter;
use dtt_models::Role;
use dtt_session::FleetSession;
use std::path::PathBuf;

/// DIU Transport Smart Tracker: simulated shuttle fleet dashboard
#[derive(Parser, Debug)]
#[command(name = "dtt", version, about)]
struct Args {
    /// Configuration file (defaults to the user config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Open the desktop dashboard instead of the terminal menu
    #[arg(long)]
    gui: bool,

    #[arg(long, value_enum, default_value_t = Role::Student)]
    role: Role,

    /// Bus shown on the driver console
    #[arg(long, default_value = "B-1042")]
    bus_id: String,

    /// Number of mock buses to seed
    #[arg(long)]
    fleet_size: Option<usize>,

    /// Simulation tick period in milliseconds
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Seed for reproducible fleets
    #[arg(long)]
    seed: Option<u64>,

    /// Write the fleet as GeoJSON to this path and exit
    #[arg(long, value_name = "PATH")]
    export_geojson: Option<PathBuf>,

    /// Route id to restrict the export to ("all" for every route)
    #[arg(long, requires = "export_geojson")]
    route: Option<String>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn run(args: Args) -> anyhow::Result<()> {
    let mut config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(size) = args.fleet_size {
        config.seed_fleet_size = size;
    }
    if let Some(tick_ms) = args.tick_ms {
        config.tick_interval_ms = tick_ms;
    }
    config.validate().context("Invalid command line overrides")?;
    config.resolve_api_key();
    let tz = config.tz()?;

    let mut session = FleetSession::new(&config, args.seed).context("Failed to start fleet session")?;

    if let Some(path) = args.export_geojson {
        let filter: RouteFilter = args.route.as_deref().unwrap_or("all").parse()?;
        let written = session
            .export_geojson(&path, &filter)
            .with_context(|| format!("Failed to export map layer to {:?}", path))?;
        println!("✓ Exported {} buses to {}", written, path.display());
        session.shutdown();
        return Ok(());
    }

    let assistant = Assistant::from_config(&config).context("Failed to set up the assistant")?;

    session.start_simulation(&config);
    if args.gui {
        dtt_gui::run_gui(session, config, tz, args.role, args.bus_id, assistant)
            .map_err(|e| anyhow::anyhow!("Dashboard failed: {}", e))?;
    } else {
        DTTControllers::new(session, config, tz, args.role, args.bus_id, assistant).run();
    }
    Ok(())
}

fn main() {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(args.verbose);

    // Set up panic hook for better error messages
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("\n{}", "═".repeat(70));
        eprintln!("❌ APPLICATION PANIC");
        eprintln!("{}", "═".repeat(70));
        eprintln!("\nThe tracker encountered an unexpected error:");
        eprintln!("{}", panic_info);
        eprintln!("\n💡 Troubleshooting:");
        eprintln!("  • Restart the tracker");
        eprintln!("  • Run with -vv and check the log output");
        eprintln!("\n{}", "═".repeat(70));
    }));

    match std::panic::catch_unwind(|| run(args)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            eprintln!("\n✗ {:#}", e);
            std::process::exit(1);
        }
        Err(_) => {
            eprintln!("\n⚠️  Tracker terminated unexpectedly");
            std::process::exit(1);
        }
    }
}
