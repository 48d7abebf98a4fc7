use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::Parser;

use props_engine::parquet_source::ParquetSource;
use props_engine::records::RecordSource;
use props_engine::sqlite_store;

/// Import a player-map parquet export into the SQLite store.
#[derive(Parser)]
#[command(name = "ingest_parquet")]
struct Args {
    #[arg(long)]
    input: PathBuf,
    #[arg(long, env = "PROPS_DB_PATH")]
    db: Option<PathBuf>,
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let db_path = args
        .db
        .or_else(sqlite_store::default_db_path)
        .context("unable to resolve sqlite path")?;

    let source = ParquetSource::new(&args.input);
    let records = source
        .load_records()
        .with_context(|| format!("read {}", args.input.display()))?;
    if records.is_empty() {
        return Err(anyhow!("no usable rows in {}", args.input.display()));
    }

    let mut conn = sqlite_store::open_db(&db_path)?;
    let summary =
        sqlite_store::upsert_records(&mut conn, db_path.clone(), &source.describe(), &records)?;

    println!("Parquet ingest complete");
    println!("DB: {}", summary.db_path.display());
    println!("Run: {}", summary.run_id);
    println!("Rows upserted: {}", summary.rows_upserted);
    println!("Rows stored: {}", summary.total_rows);
    Ok(())
}
