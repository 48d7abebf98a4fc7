use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, params};

use crate::config;
use crate::records::{MatchRecord, RecordSource};

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone)]
pub struct IngestSummary {
    pub db_path: PathBuf,
    pub source: String,
    pub run_id: i64,
    pub rows_upserted: usize,
    pub total_rows: usize,
}

pub fn default_db_path() -> Option<PathBuf> {
    config::default_db_path()
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS player_maps (
            player TEXT NOT NULL,
            team TEXT NOT NULL,
            opponent TEXT NOT NULL,
            tournament TEXT NOT NULL,
            map_index INTEGER NOT NULL,
            position TEXT NOT NULL,
            match_date TEXT NOT NULL,
            kills REAL NOT NULL,
            deaths REAL NOT NULL,
            assists REAL NOT NULL,
            damage REAL NOT NULL,
            vision_score REAL NOT NULL,
            creep_score REAL NOT NULL,
            gold_at_10 REAL NOT NULL,
            xp_at_10 REAL NOT NULL,
            cs_at_10 REAL NOT NULL,
            gold_diff_at_15 REAL NOT NULL,
            xp_diff_at_15 REAL NOT NULL,
            cs_diff_at_15 REAL NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (player, match_date, team, opponent, tournament, map_index)
        );
        CREATE INDEX IF NOT EXISTS idx_player_maps_player ON player_maps(player);
        CREATE INDEX IF NOT EXISTS idx_player_maps_date ON player_maps(match_date);
        CREATE INDEX IF NOT EXISTS idx_player_maps_tournament ON player_maps(tournament);

        CREATE TABLE IF NOT EXISTS ingest_runs (
            run_id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at TEXT NOT NULL,
            finished_at TEXT NULL,
            source TEXT NOT NULL,
            rows_seen INTEGER NOT NULL,
            rows_upserted INTEGER NOT NULL
        );
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

/// Upserts `records` in one transaction and logs the run in `ingest_runs`.
pub fn upsert_records(
    conn: &mut Connection,
    db_path: PathBuf,
    source: &str,
    records: &[MatchRecord],
) -> Result<IngestSummary> {
    if records.is_empty() {
        return Err(anyhow!("no records to ingest from {source}"));
    }

    let started_at = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO ingest_runs(started_at, finished_at, source, rows_seen, rows_upserted)
         VALUES (?1, NULL, ?2, ?3, 0)",
        params![started_at, source, records.len() as i64],
    )
    .context("insert ingest run")?;
    let run_id = conn.last_insert_rowid();

    let tx = conn.transaction().context("begin ingest transaction")?;
    let mut rows_upserted = 0usize;
    for record in records {
        upsert_record(&tx, record)?;
        rows_upserted += 1;
    }
    tx.commit().context("commit ingest transaction")?;

    conn.execute(
        "UPDATE ingest_runs SET finished_at = ?1, rows_upserted = ?2 WHERE run_id = ?3",
        params![Utc::now().to_rfc3339(), rows_upserted as i64, run_id],
    )
    .context("update ingest run")?;

    let total_rows = record_count(conn)?;
    log::info!("ingest run {run_id}: {rows_upserted} rows from {source}, {total_rows} stored");

    Ok(IngestSummary {
        db_path,
        source: source.to_string(),
        run_id,
        rows_upserted,
        total_rows,
    })
}

pub fn record_count(conn: &Connection) -> Result<usize> {
    let n = conn
        .query_row("SELECT COUNT(*) FROM player_maps", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("count player_maps")?;
    Ok(n.max(0) as usize)
}

/// Every stored map, oldest first.
pub fn load_records(conn: &Connection) -> Result<Vec<MatchRecord>> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT
                player, team, opponent, tournament, map_index, position, match_date,
                kills, deaths, assists, damage, vision_score, creep_score,
                gold_at_10, xp_at_10, cs_at_10,
                gold_diff_at_15, xp_diff_at_15, cs_diff_at_15
            FROM player_maps
            ORDER BY match_date ASC, tournament ASC, team ASC, opponent ASC, map_index ASC, player ASC
            "#,
        )
        .context("prepare load player_maps query")?;

    let rows = stmt
        .query_map([], |row| {
            let raw_date: String = row.get(6)?;
            let date = NaiveDate::parse_from_str(&raw_date, DATE_FORMAT)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;
            Ok(MatchRecord {
                player: row.get(0)?,
                team: row.get(1)?,
                opponent: row.get(2)?,
                tournament: row.get(3)?,
                map_index: row.get::<_, u32>(4)?,
                position: row.get(5)?,
                date,
                kills: row.get(7)?,
                deaths: row.get(8)?,
                assists: row.get(9)?,
                damage: row.get(10)?,
                vision_score: row.get(11)?,
                creep_score: row.get(12)?,
                gold_at_10: row.get(13)?,
                xp_at_10: row.get(14)?,
                cs_at_10: row.get(15)?,
                gold_diff_at_15: row.get(16)?,
                xp_diff_at_15: row.get(17)?,
                cs_diff_at_15: row.get(18)?,
            })
        })
        .context("query load player_maps")?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("decode player_maps row")?);
    }
    Ok(out)
}

fn upsert_record(tx: &rusqlite::Transaction<'_>, r: &MatchRecord) -> Result<()> {
    tx.execute(
        r#"
        INSERT INTO player_maps (
            player, team, opponent, tournament, map_index, position, match_date,
            kills, deaths, assists, damage, vision_score, creep_score,
            gold_at_10, xp_at_10, cs_at_10,
            gold_diff_at_15, xp_diff_at_15, cs_diff_at_15, updated_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7,
            ?8, ?9, ?10, ?11, ?12, ?13,
            ?14, ?15, ?16,
            ?17, ?18, ?19, ?20
        )
        ON CONFLICT(player, match_date, team, opponent, tournament, map_index) DO UPDATE SET
            position = excluded.position,
            kills = excluded.kills,
            deaths = excluded.deaths,
            assists = excluded.assists,
            damage = excluded.damage,
            vision_score = excluded.vision_score,
            creep_score = excluded.creep_score,
            gold_at_10 = excluded.gold_at_10,
            xp_at_10 = excluded.xp_at_10,
            cs_at_10 = excluded.cs_at_10,
            gold_diff_at_15 = excluded.gold_diff_at_15,
            xp_diff_at_15 = excluded.xp_diff_at_15,
            cs_diff_at_15 = excluded.cs_diff_at_15,
            updated_at = excluded.updated_at
        "#,
        params![
            r.player,
            r.team,
            r.opponent,
            r.tournament,
            r.map_index as i64,
            r.position,
            r.date.format(DATE_FORMAT).to_string(),
            r.kills,
            r.deaths,
            r.assists,
            r.damage,
            r.vision_score,
            r.creep_score,
            r.gold_at_10,
            r.xp_at_10,
            r.cs_at_10,
            r.gold_diff_at_15,
            r.xp_diff_at_15,
            r.cs_diff_at_15,
            Utc::now().to_rfc3339(),
        ],
    )
    .context("upsert player map")?;
    Ok(())
}

/// The on-disk store the CLI serves from.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSource for SqliteStore {
    fn load_records(&self) -> Result<Vec<MatchRecord>> {
        if !self.path.exists() {
            return Err(anyhow!(
                "record db {} does not exist; run ingest_parquet first",
                self.path.display()
            ));
        }
        let conn = open_db(&self.path)?;
        load_records(&conn).with_context(|| format!("load records from {}", self.path.display()))
    }

    fn describe(&self) -> String {
        format!("sqlite {}", self.path.display())
    }
}
