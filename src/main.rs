//! Command-line host for the prop engine.
//!
//! Loads the player-map store once, then prices a prop, sweeps a curve, runs a batch file,
//! or backtests the model. All output is JSON on stdout.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use props_engine::calibration::{self, BacktestOptions};
use props_engine::config::{self, EngineConfig};
use props_engine::curve::CurvePoint;
use props_engine::parquet_source::ParquetSource;
use props_engine::records::{RecordSource, Stat};
use props_engine::sqlite_store::SqliteStore;
use props_engine::tiered_filter::FilterQuery;
use props_engine::{Engine, PropRequest};

#[derive(Parser)]
#[command(name = "props_engine")]
#[command(about = "Over/under predictions for per-map esports player stats", long_about = None)]
struct Cli {
    /// SQLite store built by ingest_parquet
    #[arg(long, global = true, env = "PROPS_DB_PATH")]
    db: Option<PathBuf>,

    /// Read records straight from a parquet file; wins over --db
    #[arg(long, global = true)]
    parquet: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Price one prop
    Predict(PropArgs),
    /// Sweep predictions across lines around the prop
    Curve {
        #[command(flatten)]
        prop: PropArgs,
        #[arg(long, default_value = "0.5")]
        step: f64,
        #[arg(long, default_value = "3")]
        range: f64,
    },
    /// Price every request in a JSON array file
    Batch {
        #[arg(long)]
        input: PathBuf,
    },
    /// Walk-forward evaluation and logistic scale fit
    Backtest {
        #[arg(long, default_value = "kills")]
        stat: Stat,
        /// Prior maps a player needs before a map is scored
        #[arg(long, default_value = "5")]
        min_history: usize,
        /// Score only the most recent N maps
        #[arg(long)]
        max_samples: Option<usize>,
        #[arg(long, default_value = "10")]
        bins: usize,
        /// Save the config with the fitted scale here
        #[arg(long)]
        write_config: Option<PathBuf>,
    },
}

#[derive(Args)]
struct PropArgs {
    /// Player name; repeat for shared props
    #[arg(long = "player", required = true)]
    players: Vec<String>,
    #[arg(long)]
    stat: Stat,
    #[arg(long)]
    prop: f64,
    /// Inclusive map range, e.g. 1-2 or 3
    #[arg(long, default_value = "1-1", value_parser = parse_map_range)]
    maps: (u32, u32),
    #[arg(long)]
    team: Option<String>,
    #[arg(long)]
    opponent: Option<String>,
    #[arg(long)]
    tournament: Option<String>,
    #[arg(long)]
    season: Option<i32>,
    #[arg(long, default_value = "")]
    position: String,
    /// Only accept an exact match
    #[arg(long)]
    strict: bool,
}

impl PropArgs {
    fn into_request(self) -> PropRequest {
        PropRequest {
            query: FilterQuery {
                players: self.players,
                team: self.team,
                opponent: self.opponent,
                tournament: self.tournament,
                season: self.season,
                map_range: self.maps,
                position: self.position,
                strict_mode: self.strict,
            },
            stat: self.stat,
            prop_value: self.prop,
        }
    }
}

fn parse_map_range(raw: &str) -> Result<(u32, u32), String> {
    let parse = |s: &str| {
        s.trim()
            .parse::<u32>()
            .map_err(|_| format!("invalid map number '{s}'"))
    };
    match raw.split_once('-') {
        Some((lo, hi)) => Ok((parse(lo)?, parse(hi)?)),
        None => {
            let m = parse(raw)?;
            Ok((m, m))
        }
    }
}

#[derive(Serialize)]
struct CurveOutput<'a> {
    request: &'a PropRequest,
    points: Vec<CurvePoint>,
}

#[derive(Serialize)]
struct BatchItem {
    index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<props_engine::model::PredictionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn main() -> ExitCode {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let cfg = config::load_engine_config()?;
    let source = record_source(&cli)?;
    let engine = Engine::from_source(source.as_ref(), cfg)?;

    match cli.command {
        Commands::Predict(args) => {
            let request = args.into_request();
            let result = engine.predict(&request)?;
            print_json(&result)
        }
        Commands::Curve { prop, step, range } => {
            let request = prop.into_request();
            let points = engine.curve(&request, step, range)?;
            print_json(&CurveOutput {
                request: &request,
                points,
            })
        }
        Commands::Batch { input } => {
            let raw = fs::read_to_string(&input)
                .with_context(|| format!("read batch file {}", input.display()))?;
            let requests: Vec<PropRequest> = serde_json::from_str(&raw)
                .with_context(|| format!("parse batch file {}", input.display()))?;
            let items: Vec<BatchItem> = engine
                .predict_batch(&requests)
                .into_iter()
                .enumerate()
                .map(|(index, res)| match res {
                    Ok(result) => BatchItem {
                        index,
                        result: Some(result),
                        error: None,
                    },
                    Err(err) => BatchItem {
                        index,
                        result: None,
                        error: Some(err.to_string()),
                    },
                })
                .collect();
            print_json(&items)
        }
        Commands::Backtest {
            stat,
            min_history,
            max_samples,
            bins,
            write_config,
        } => {
            let opts = BacktestOptions {
                stat,
                min_history,
                max_samples,
                bins,
            };
            let report = calibration::backtest(engine.store().records(), &opts, engine.config());
            if let Some(path) = write_config {
                let fitted = EngineConfig {
                    logistic_scale: report.fitted_scale,
                    ..engine.config().clone()
                };
                config::save_engine_config(&path, &fitted)?;
                log::info!("wrote fitted config to {}", path.display());
            }
            print_json(&report)
        }
    }
}

fn record_source(cli: &Cli) -> Result<Box<dyn RecordSource>> {
    if let Some(path) = &cli.parquet {
        return Ok(Box::new(ParquetSource::new(path)));
    }
    let path = cli
        .db
        .clone()
        .or_else(config::default_db_path)
        .ok_or_else(|| anyhow!("unable to resolve sqlite path; pass --db or set PROPS_DB_PATH"))?;
    Ok(Box::new(SqliteStore::new(path)))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{json}");
    Ok(())
}
