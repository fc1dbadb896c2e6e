use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use serde_json::{Map, Value};
use std::process::ExitCode;
use std::time::Duration;

use sat_loc::locator::{
    LocationStream, PollConfig, SatLoc, StreamDefaults, CALCULATE_CHANGE, DEFAULT_BASE_URL,
};
use sat_loc::web::{self, Config};

#[derive(Parser)]
#[command(name = "sat-loc")]
#[command(about = "Live satellite position polling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print positions to stdout as JSON lines
    Stream {
        /// NORAD catalog number
        #[arg(long)]
        satellite: Option<String>,
        /// Polling interval, e.g. "1s" or "750ms"
        #[arg(long, value_parser = humantime::parse_duration)]
        interval: Option<Duration>,
        /// Annotate positions with per-second latitude/longitude deltas
        #[arg(long)]
        calculate_change: bool,
        /// Stop after this many items
        #[arg(long)]
        count: Option<usize>,
        #[arg(long, default_value = DEFAULT_BASE_URL)]
        base_url: String,
    },
    /// Run the HTTP API
    Serve {
        #[arg(long)]
        config: String,
    },
    /// Validate a config file
    Validate {
        #[arg(long)]
        config: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Stream {
            satellite,
            interval,
            calculate_change,
            count,
            base_url,
        } => {
            let mut options = Map::new();
            if calculate_change {
                options.insert(CALCULATE_CHANGE.to_string(), Value::Bool(true));
            }
            let config = PollConfig::resolve(
                &StreamDefaults::default(),
                satellite.as_deref(),
                interval.map(|d| d.as_millis() as u64),
                Some(&options),
            );
            stream(config, &base_url, count).await
        }
        Commands::Serve { config } => serve(&config).await,
        Commands::Validate { config } => validate(&config),
    }
}

async fn stream(config: PollConfig, base_url: &str, count: Option<usize>) -> ExitCode {
    let fetcher = match SatLoc::with_base_url(config.satellite.clone(), base_url, None) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error creating fetcher: {}", e);
            return ExitCode::FAILURE;
        }
    };

    log::info!(
        "Polling {} every {} ms",
        fetcher.url(),
        config.interval_ms
    );

    let mut stream = LocationStream::with_fetcher(config, fetcher);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut emitted = 0;
    loop {
        let item = tokio::select! {
            item = stream.next() => item,
            _ = &mut ctrl_c => None,
        };
        let Some(item) = item else {
            break;
        };

        match serde_json::to_string(&item) {
            Ok(line) => println!("{}", line),
            Err(e) => {
                eprintln!("Error encoding item: {}", e);
                return ExitCode::FAILURE;
            }
        }

        emitted += 1;
        if count.is_some_and(|n| emitted >= n) {
            break;
        }
    }

    let stats = stream.stats();
    log::info!(
        "Issued {} requests, {} positions received, last lag {} ms",
        stats.requests_issued,
        stats.responses_received,
        stats.last_observed_lag_ms
    );
    ExitCode::SUCCESS
}

async fn serve(path: &str) -> ExitCode {
    let config = match Config::from_file(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match web::run_server(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Server error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn validate(path: &str) -> ExitCode {
    let config = match Config::from_file(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let poll = config.stream.resolve(&StreamDefaults::default());
    println!("Config is valid");
    println!("  satellite: {}", poll.satellite);
    println!("  interval: {} ms", poll.interval_ms);
    println!("  calculate change: {}", poll.options.calculate_change());
    println!("  source: {}", config.stream.base_url);
    println!("  autostart: {}", config.stream.autostart);
    println!("  bind: {}", config.web.bind);
    println!("  api keys: {}", config.api_keys.len());
    ExitCode::SUCCESS
}
