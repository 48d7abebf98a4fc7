use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Per-map statistics a prop can be written against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stat {
    Kills,
    Deaths,
    Assists,
    Damage,
    VisionScore,
    CreepScore,
    GoldAt10,
    XpAt10,
    CsAt10,
    GoldDiffAt15,
    XpDiffAt15,
    CsDiffAt15,
}

impl Stat {
    pub const ALL: [Stat; 12] = [
        Stat::Kills,
        Stat::Deaths,
        Stat::Assists,
        Stat::Damage,
        Stat::VisionScore,
        Stat::CreepScore,
        Stat::GoldAt10,
        Stat::XpAt10,
        Stat::CsAt10,
        Stat::GoldDiffAt15,
        Stat::XpDiffAt15,
        Stat::CsDiffAt15,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stat::Kills => "kills",
            Stat::Deaths => "deaths",
            Stat::Assists => "assists",
            Stat::Damage => "damage",
            Stat::VisionScore => "vision_score",
            Stat::CreepScore => "creep_score",
            Stat::GoldAt10 => "gold_at_10",
            Stat::XpAt10 => "xp_at_10",
            Stat::CsAt10 => "cs_at_10",
            Stat::GoldDiffAt15 => "gold_diff_at_15",
            Stat::XpDiffAt15 => "xp_diff_at_15",
            Stat::CsDiffAt15 => "cs_diff_at_15",
        }
    }

    /// Differentials are signed; every other stat is a non-negative count.
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            Stat::GoldDiffAt15 | Stat::XpDiffAt15 | Stat::CsDiffAt15
        )
    }
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stat {
    type Err = EngineError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let key = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let stat = match key.as_str() {
            "kills" | "kill" | "k" => Stat::Kills,
            "deaths" | "death" | "d" => Stat::Deaths,
            "assists" | "assist" | "a" => Stat::Assists,
            "damage" | "damagetochampions" | "dmg" => Stat::Damage,
            "vision_score" | "visionscore" | "vision" => Stat::VisionScore,
            "creep_score" | "creepscore" | "cs" | "total_cs" => Stat::CreepScore,
            "gold_at_10" | "goldat10" => Stat::GoldAt10,
            "xp_at_10" | "xpat10" => Stat::XpAt10,
            "cs_at_10" | "csat10" => Stat::CsAt10,
            "gold_diff_at_15" | "golddiffat15" => Stat::GoldDiffAt15,
            "xp_diff_at_15" | "xpdiffat15" => Stat::XpDiffAt15,
            "cs_diff_at_15" | "csdiffat15" => Stat::CsDiffAt15,
            _ => {
                return Err(EngineError::validation(format!(
                    "unknown stat '{}'",
                    raw.trim()
                )));
            }
        };
        Ok(stat)
    }
}

/// One player-map observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub player: String,
    pub team: String,
    pub opponent: String,
    pub tournament: String,
    pub map_index: u32,
    pub position: String,
    pub date: NaiveDate,
    pub kills: f64,
    pub deaths: f64,
    pub assists: f64,
    pub damage: f64,
    pub vision_score: f64,
    pub creep_score: f64,
    #[serde(default)]
    pub gold_at_10: f64,
    #[serde(default)]
    pub xp_at_10: f64,
    #[serde(default)]
    pub cs_at_10: f64,
    #[serde(default)]
    pub gold_diff_at_15: f64,
    #[serde(default)]
    pub xp_diff_at_15: f64,
    #[serde(default)]
    pub cs_diff_at_15: f64,
}

impl MatchRecord {
    pub fn stat(&self, stat: Stat) -> f64 {
        match stat {
            Stat::Kills => self.kills,
            Stat::Deaths => self.deaths,
            Stat::Assists => self.assists,
            Stat::Damage => self.damage,
            Stat::VisionScore => self.vision_score,
            Stat::CreepScore => self.creep_score,
            Stat::GoldAt10 => self.gold_at_10,
            Stat::XpAt10 => self.xp_at_10,
            Stat::CsAt10 => self.cs_at_10,
            Stat::GoldDiffAt15 => self.gold_diff_at_15,
            Stat::XpDiffAt15 => self.xp_diff_at_15,
            Stat::CsDiffAt15 => self.cs_diff_at_15,
        }
    }

    pub fn year(&self) -> i32 {
        self.date.year()
    }
}

/// Capability that supplies the full record set once at startup.
pub trait RecordSource {
    fn load_records(&self) -> Result<Vec<MatchRecord>>;

    fn describe(&self) -> String {
        "records".to_string()
    }
}

/// In-memory source, mostly for tests and tools that already hold records.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    records: Vec<MatchRecord>,
}

impl StaticSource {
    pub fn new(records: Vec<MatchRecord>) -> Self {
        Self { records }
    }
}

impl RecordSource for StaticSource {
    fn load_records(&self) -> Result<Vec<MatchRecord>> {
        Ok(self.records.clone())
    }

    fn describe(&self) -> String {
        format!("static ({} records)", self.records.len())
    }
}

/// Immutable snapshot of every loaded record, in source order.
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    records: Vec<MatchRecord>,
}

impl RecordStore {
    pub fn from_records(records: Vec<MatchRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[MatchRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Most recent `limit` records for any of `players`, returned oldest first.
pub fn player_history<'a>(
    records: &'a [MatchRecord],
    players: &[String],
    limit: usize,
) -> Vec<&'a MatchRecord> {
    let mut rows: Vec<&MatchRecord> = records
        .iter()
        .filter(|r| players.iter().any(|p| *p == r.player))
        .collect();
    // Stable: equal dates keep source order.
    rows.sort_by_key(|r| r.date);
    if rows.len() > limit {
        rows.drain(..rows.len() - limit);
    }
    rows
}

pub fn latest_date(records: &[MatchRecord], players: &[String]) -> Option<NaiveDate> {
    records
        .iter()
        .filter(|r| players.iter().any(|p| *p == r.player))
        .map(|r| r.date)
        .max()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn record(
        player: &str,
        team: &str,
        tournament: &str,
        map_index: u32,
        position: &str,
        date: &str,
        kills: f64,
    ) -> MatchRecord {
        MatchRecord {
            player: player.to_string(),
            team: team.to_string(),
            opponent: "OPP".to_string(),
            tournament: tournament.to_string(),
            map_index,
            position: position.to_string(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").expect("valid date"),
            kills,
            deaths: 2.0,
            assists: 6.0,
            damage: 18_000.0,
            vision_score: 30.0,
            creep_score: 250.0,
            gold_at_10: 3_600.0,
            xp_at_10: 4_800.0,
            cs_at_10: 85.0,
            gold_diff_at_15: 400.0,
            xp_diff_at_15: 250.0,
            cs_diff_at_15: 8.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::record;
    use super::*;

    #[test]
    fn stat_parses_aliases() {
        assert_eq!("Kills".parse::<Stat>().unwrap(), Stat::Kills);
        assert_eq!("cs".parse::<Stat>().unwrap(), Stat::CreepScore);
        assert_eq!("golddiffat15".parse::<Stat>().unwrap(), Stat::GoldDiffAt15);
        assert!("goals".parse::<Stat>().is_err());
    }

    #[test]
    fn player_history_keeps_latest_in_date_order() {
        let records = vec![
            record("Faker", "T1", "LCK", 1, "mid", "2024-03-01", 3.0),
            record("Faker", "T1", "LCK", 1, "mid", "2024-01-01", 1.0),
            record("Chovy", "GEN", "LCK", 1, "mid", "2024-02-01", 9.0),
            record("Faker", "T1", "LCK", 2, "mid", "2024-02-01", 2.0),
        ];
        let hist = player_history(&records, &["Faker".to_string()], 2);
        let kills: Vec<f64> = hist.iter().map(|r| r.kills).collect();
        assert_eq!(kills, vec![2.0, 3.0]);
        assert_eq!(
            latest_date(&records, &["Chovy".to_string()]),
            NaiveDate::from_ymd_opt(2024, 2, 1)
        );
    }
}
