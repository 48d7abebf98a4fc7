use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDate};
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::{Field, Row, RowAccessor};

use crate::records::{MatchRecord, RecordSource};

/// Accepted column names per field; the first present wins.
const PLAYER: &[&str] = &["player", "playername"];
const TEAM: &[&str] = &["team", "teamname"];
const OPPONENT: &[&str] = &["opponent", "opponentname", "opponent_team"];
const TOURNAMENT: &[&str] = &["tournament", "league"];
const MAP_INDEX: &[&str] = &["map_index", "map_index_within_series", "game"];
const POSITION: &[&str] = &["position", "role"];
const DATE: &[&str] = &["date", "match_date"];
const KILLS: &[&str] = &["kills"];
const DEATHS: &[&str] = &["deaths"];
const ASSISTS: &[&str] = &["assists"];
const DAMAGE: &[&str] = &["damage", "damagetochampions"];
const VISION: &[&str] = &["vision_score", "visionscore"];
const CREEP: &[&str] = &["creep_score", "total cs", "total_cs", "cs"];
const GOLD_10: &[&str] = &["gold_at_10", "goldat10"];
const XP_10: &[&str] = &["xp_at_10", "xpat10"];
const CS_10: &[&str] = &["cs_at_10", "csat10"];
const GOLD_DIFF_15: &[&str] = &["gold_diff_at_15", "golddiffat15"];
const XP_DIFF_15: &[&str] = &["xp_diff_at_15", "xpdiffat15"];
const CS_DIFF_15: &[&str] = &["cs_diff_at_15", "csdiffat15"];

#[derive(Debug, Clone)]
pub struct ParquetSource {
    path: PathBuf,
}

impl ParquetSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSource for ParquetSource {
    fn load_records(&self) -> Result<Vec<MatchRecord>> {
        read_records(&self.path)
    }

    fn describe(&self) -> String {
        format!("parquet {}", self.path.display())
    }
}

struct Columns {
    player: usize,
    date: usize,
    team: Option<usize>,
    opponent: Option<usize>,
    tournament: Option<usize>,
    map_index: Option<usize>,
    position: Option<usize>,
    stats: [Option<usize>; 12],
}

impl Columns {
    fn resolve(names: &[String]) -> Result<Self> {
        let index: HashMap<String, usize> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.trim().to_ascii_lowercase(), i))
            .collect();
        let find = |aliases: &[&str]| aliases.iter().find_map(|a| index.get(*a).copied());

        let player = find(PLAYER).ok_or_else(|| anyhow!("parquet has no player column"))?;
        let date = find(DATE).ok_or_else(|| anyhow!("parquet has no date column"))?;
        let stats = [
            find(KILLS),
            find(DEATHS),
            find(ASSISTS),
            find(DAMAGE),
            find(VISION),
            find(CREEP),
            find(GOLD_10),
            find(XP_10),
            find(CS_10),
            find(GOLD_DIFF_15),
            find(XP_DIFF_15),
            find(CS_DIFF_15),
        ];
        let missing = stats.iter().filter(|c| c.is_none()).count();
        if missing > 0 {
            log::warn!("{missing} stat column(s) absent from parquet; those stats read as 0");
        }
        Ok(Self {
            player,
            date,
            team: find(TEAM),
            opponent: find(OPPONENT),
            tournament: find(TOURNAMENT),
            map_index: find(MAP_INDEX),
            position: find(POSITION),
            stats,
        })
    }
}

pub fn read_records(path: &Path) -> Result<Vec<MatchRecord>> {
    let file = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let reader = SerializedFileReader::new(file).context("open parquet reader")?;
    let names: Vec<String> = reader
        .metadata()
        .file_metadata()
        .schema()
        .get_fields()
        .iter()
        .map(|f| f.name().to_string())
        .collect();
    let cols = Columns::resolve(&names)?;
    let iter = reader.get_row_iter(None).context("iterate player-map rows")?;

    let mut out = Vec::new();
    let mut unkeyed = 0usize;
    let mut null_stats = 0usize;
    for row in iter {
        let Ok(row) = row else {
            unkeyed += 1;
            continue;
        };
        match parse_row(&row, &cols) {
            Ok(record) => out.push(record),
            Err(Skip::Unkeyed) => unkeyed += 1,
            Err(Skip::NullStat) => null_stats += 1,
        }
    }
    if unkeyed > 0 {
        log::warn!(
            "skipped {unkeyed} parquet rows without a player name or date in {}",
            path.display()
        );
    }
    if null_stats > 0 {
        log::warn!(
            "skipped {null_stats} parquet rows with null or unparseable stat cells in {}",
            path.display()
        );
    }
    log::info!("read {} player-map rows from {}", out.len(), path.display());
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Skip {
    Unkeyed,
    NullStat,
}

fn parse_row(row: &Row, cols: &Columns) -> Result<MatchRecord, Skip> {
    let player = read_str(row, Some(cols.player));
    if player.is_empty() {
        return Err(Skip::Unkeyed);
    }
    let date = read_date(row, cols.date).ok_or(Skip::Unkeyed)?;
    let map_index = cols
        .map_index
        .and_then(|i| read_num(row, i))
        .filter(|v| *v >= 1.0)
        .map(|v| v as u32)
        .unwrap_or(1);

    // An absent column reads as 0; a present column with a null cell drops the row.
    let mut stats = [0.0; 12];
    for (slot, col) in stats.iter_mut().zip(cols.stats.iter()) {
        if let Some(i) = col {
            *slot = read_num(row, *i).ok_or(Skip::NullStat)?;
        }
    }
    let [
        kills,
        deaths,
        assists,
        damage,
        vision_score,
        creep_score,
        gold_at_10,
        xp_at_10,
        cs_at_10,
        gold_diff_at_15,
        xp_diff_at_15,
        cs_diff_at_15,
    ] = stats;

    Ok(MatchRecord {
        player,
        team: read_str(row, cols.team),
        opponent: read_str(row, cols.opponent),
        tournament: read_str(row, cols.tournament),
        map_index,
        position: read_str(row, cols.position),
        date,
        kills,
        deaths,
        assists,
        damage,
        vision_score,
        creep_score,
        gold_at_10,
        xp_at_10,
        cs_at_10,
        gold_diff_at_15,
        xp_diff_at_15,
        cs_diff_at_15,
    })
}

fn read_str(row: &Row, idx: Option<usize>) -> String {
    idx.and_then(|i| row.get_string(i).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// `None` for null, non-numeric or non-finite cells.
fn read_num(row: &Row, idx: usize) -> Option<f64> {
    let v = if let Ok(v) = row.get_double(idx) {
        v
    } else if let Ok(v) = row.get_float(idx) {
        v as f64
    } else if let Ok(v) = row.get_long(idx) {
        v as f64
    } else if let Ok(v) = row.get_int(idx) {
        v as f64
    } else {
        row.get_string(idx).ok()?.trim().parse::<f64>().ok()?
    };
    v.is_finite().then_some(v)
}

/// Text dates keep only the day part ("2024-01-15 09:04:12" -> 2024-01-15).
fn read_date(row: &Row, idx: usize) -> Option<NaiveDate> {
    let (_, field) = row.get_column_iter().nth(idx)?;
    match field {
        Field::Str(s) => {
            let day = s.trim().get(..10)?;
            NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
        }
        Field::Date(days) => {
            let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
            epoch.checked_add_signed(chrono::Duration::days(i64::from(*days)))
        }
        Field::TimestampMillis(ms) => DateTime::from_timestamp_millis(*ms).map(|dt| dt.date_naive()),
        Field::TimestampMicros(us) => DateTime::from_timestamp_micros(*us).map(|dt| dt.date_naive()),
        _ => None,
    }
}
