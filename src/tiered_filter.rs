use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::position::Position;
use crate::records::{MatchRecord, latest_date};

pub const NO_PLAYERS_TIER: &str = "No Players Specified";
pub const NO_DATA_TIER: &str = "No Data";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterQuery {
    pub players: Vec<String>,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub opponent: Option<String>,
    #[serde(default)]
    pub tournament: Option<String>,
    /// Season year for the region tier; derived when absent.
    #[serde(default)]
    pub season: Option<i32>,
    pub map_range: (u32, u32),
    #[serde(default)]
    pub position: String,
    #[serde(default)]
    pub strict_mode: bool,
}

impl FilterQuery {
    pub fn new(players: &[&str], map_range: (u32, u32), position: &str) -> Self {
        Self {
            players: players.iter().map(|p| p.to_string()).collect(),
            map_range,
            position: position.to_string(),
            ..Default::default()
        }
    }

    /// Number of maps the prop covers.
    pub fn series_maps(&self) -> u32 {
        let (lo, hi) = self.map_range;
        hi.saturating_sub(lo) + 1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierInfo {
    pub rank: u32,
    pub weight: f64,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct TierResult<'a> {
    pub subset: Vec<&'a MatchRecord>,
    pub tier_info: TierInfo,
    pub fallback_used: bool,
}

impl TierResult<'_> {
    pub fn is_empty(&self) -> bool {
        self.subset.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TierKind {
    Exact,
    TeamFamily,
    Tournament,
    RegionYear,
    PlayerMapRange,
    PlayerOnly,
}

struct TierSpec {
    kind: TierKind,
    name: &'static str,
    weight: f64,
}

/// Ranked ladder; rank is index + 1 and weights never increase.
const TIER_LADDER: [TierSpec; 6] = [
    TierSpec {
        kind: TierKind::Exact,
        name: "Exact Match",
        weight: 1.0,
    },
    TierSpec {
        kind: TierKind::TeamFamily,
        name: "Same Team/League",
        weight: 0.9,
    },
    TierSpec {
        kind: TierKind::Tournament,
        name: "Same Tournament",
        weight: 0.8,
    },
    TierSpec {
        kind: TierKind::RegionYear,
        name: "Same Region/Year",
        weight: 0.8,
    },
    TierSpec {
        kind: TierKind::PlayerMapRange,
        name: "Player + Map Range",
        weight: 0.6,
    },
    TierSpec {
        kind: TierKind::PlayerOnly,
        name: "Player Only",
        weight: 0.4,
    },
];

static REGION_BY_FAMILY: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("LCK", "KR"),
        ("LCKCL", "KR"),
        ("LPL", "CN"),
        ("LDL", "CN"),
        ("LEC", "EU"),
        ("EM", "EU"),
        ("LFL", "EU"),
        ("PRM", "EU"),
        ("SL", "EU"),
        ("NLC", "EU"),
        ("LCS", "NA"),
        ("NACL", "NA"),
        ("LTA", "AMERICAS"),
        ("PCS", "APAC"),
        ("LCP", "APAC"),
        ("VCS", "VN"),
        ("CBLOL", "BR"),
        ("LJL", "JP"),
        ("LLA", "LATAM"),
        ("MSI", "INTL"),
        ("WORLDS", "INTL"),
        ("WLDS", "INTL"),
        ("EWC", "INTL"),
    ])
});

/// Leading alphabetic token of a tournament name, uppercased: "LCK Spring 2024" -> "LCK".
pub fn tournament_family(tournament: &str) -> String {
    tournament
        .trim()
        .split(|c: char| !c.is_ascii_alphabetic())
        .find(|part| !part.is_empty())
        .unwrap_or("")
        .to_ascii_uppercase()
}

pub fn tournament_region(tournament: &str) -> Option<String> {
    let family = tournament_family(tournament);
    if family.is_empty() {
        return None;
    }
    Some(
        REGION_BY_FAMILY
            .get(family.as_str())
            .map(|r| r.to_string())
            .unwrap_or(family),
    )
}

/// Four-digit year embedded in a tournament name, if any.
pub fn tournament_year(tournament: &str) -> Option<i32> {
    tournament
        .split(|c: char| !c.is_ascii_digit())
        .filter(|part| part.len() == 4)
        .filter_map(|part| part.parse::<i32>().ok())
        .find(|year| (1990..=2100).contains(year))
}

/// Constraint values resolved once per query.
struct Resolved<'q> {
    query: &'q FilterQuery,
    position: Option<Position>,
    family: Option<String>,
    region: Option<String>,
    season: Option<i32>,
}

impl Resolved<'_> {
    fn player_ok(&self, r: &MatchRecord) -> bool {
        self.query.players.iter().any(|p| *p == r.player)
    }

    fn range_ok(&self, r: &MatchRecord) -> bool {
        let (lo, hi) = self.query.map_range;
        (lo..=hi).contains(&r.map_index)
    }

    fn position_ok(&self, r: &MatchRecord) -> bool {
        self.position.as_ref().is_none_or(|p| p.matches(&r.position))
    }

    fn team_ok(&self, r: &MatchRecord) -> bool {
        self.query.team.as_deref().is_none_or(|t| t == r.team)
    }

    fn opponent_ok(&self, r: &MatchRecord) -> bool {
        self.query.opponent.as_deref().is_none_or(|o| o == r.opponent)
    }

    fn tournament_ok(&self, r: &MatchRecord) -> bool {
        self.query
            .tournament
            .as_deref()
            .is_none_or(|t| t == r.tournament)
    }

    fn family_ok(&self, r: &MatchRecord) -> bool {
        self.family
            .as_deref()
            .is_none_or(|f| tournament_family(&r.tournament) == f)
    }

    fn matches(&self, kind: TierKind, r: &MatchRecord) -> bool {
        if !self.player_ok(r) {
            return false;
        }
        match kind {
            TierKind::Exact => {
                self.team_ok(r)
                    && self.tournament_ok(r)
                    && self.opponent_ok(r)
                    && self.position_ok(r)
                    && self.range_ok(r)
            }
            TierKind::TeamFamily => {
                self.team_ok(r) && self.family_ok(r) && self.position_ok(r) && self.range_ok(r)
            }
            TierKind::Tournament => self.tournament_ok(r) && self.position_ok(r) && self.range_ok(r),
            TierKind::RegionYear => {
                let (Some(region), Some(season)) = (self.region.as_deref(), self.season) else {
                    return false;
                };
                r.year() == season
                    && tournament_region(&r.tournament).as_deref() == Some(region)
                    && self.position_ok(r)
                    && self.range_ok(r)
            }
            TierKind::PlayerMapRange => self.range_ok(r),
            TierKind::PlayerOnly => true,
        }
    }
}

/// Narrows `records` to the most specific non-empty tier for `query`.
pub fn filter<'a>(records: &'a [MatchRecord], query: &FilterQuery) -> EngineResult<TierResult<'a>> {
    let (lo, hi) = query.map_range;
    if lo > hi {
        return Err(EngineError::validation(format!(
            "map range [{lo}, {hi}] is inverted"
        )));
    }

    if query.players.iter().all(|p| p.trim().is_empty()) {
        return Ok(TierResult {
            subset: Vec::new(),
            tier_info: TierInfo {
                rank: 0,
                weight: 0.0,
                name: NO_PLAYERS_TIER.to_string(),
            },
            fallback_used: false,
        });
    }

    let resolved = resolve(records, query);
    let ladder: &[TierSpec] = if query.strict_mode {
        &TIER_LADDER[..1]
    } else {
        &TIER_LADDER
    };

    for (idx, tier) in ladder.iter().enumerate() {
        let subset: Vec<&MatchRecord> = records
            .iter()
            .filter(|r| resolved.matches(tier.kind, r))
            .collect();
        let rank = idx as u32 + 1;
        if !subset.is_empty() || query.strict_mode {
            log::debug!(
                "tier {rank} ({}) matched {} records for {:?}",
                tier.name,
                subset.len(),
                query.players
            );
            return Ok(TierResult {
                subset,
                tier_info: TierInfo {
                    rank,
                    weight: tier.weight,
                    name: tier.name.to_string(),
                },
                fallback_used: rank > 1,
            });
        }
    }

    log::debug!("no tier matched for {:?}", query.players);
    Ok(TierResult {
        subset: Vec::new(),
        tier_info: TierInfo {
            rank: TIER_LADDER.len() as u32 + 1,
            weight: 0.0,
            name: NO_DATA_TIER.to_string(),
        },
        fallback_used: true,
    })
}

fn resolve<'q>(records: &[MatchRecord], query: &'q FilterQuery) -> Resolved<'q> {
    let tournament = query
        .tournament
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());
    let family = tournament.map(tournament_family).filter(|f| !f.is_empty());
    let region = tournament.and_then(tournament_region);
    let season = query
        .season
        .or_else(|| tournament.and_then(tournament_year))
        .or_else(|| latest_date(records, &query.players).map(|d| chrono::Datelike::year(&d)));
    Resolved {
        query,
        position: Position::resolve(&query.position),
        family,
        region,
        season,
    }
}

/// Weights of the full ladder, rank order.
pub fn ladder_weights() -> Vec<f64> {
    TIER_LADDER.iter().map(|t| t.weight).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::test_support::record;

    fn store() -> Vec<MatchRecord> {
        vec![
            record("Faker", "T1", "LCK Spring 2024", 1, "mid", "2024-02-01", 4.0),
            record("Faker", "T1", "LCK Spring 2024", 2, "Mid", "2024-02-01", 3.0),
            record("Faker", "T1", "LCK Spring 2024", 3, "mid", "2024-02-01", 5.0),
            record("Faker", "T1", "LCK Summer 2024", 1, "mid", "2024-07-01", 2.0),
            record("Faker", "T1", "MSI 2024", 1, "mid", "2024-05-10", 6.0),
            record("Chovy", "GEN", "LCK Spring 2024", 1, "mid", "2024-02-02", 7.0),
        ]
    }

    #[test]
    fn tournament_helpers() {
        assert_eq!(tournament_family("LCK Spring 2024"), "LCK");
        assert_eq!(tournament_family("2024 Worlds"), "WORLDS");
        assert_eq!(tournament_region("LPL Summer").as_deref(), Some("CN"));
        assert_eq!(tournament_region("AC").as_deref(), Some("AC"));
        assert_eq!(tournament_year("LCK Spring 2024"), Some(2024));
        assert_eq!(tournament_year("LCK"), None);
    }

    #[test]
    fn exact_tier_when_data_present() {
        let records = store();
        let mut q = FilterQuery::new(&["Faker"], (1, 2), "MID");
        q.team = Some("T1".into());
        q.tournament = Some("LCK Spring 2024".into());
        let res = filter(&records, &q).unwrap();
        assert_eq!(res.tier_info.rank, 1);
        assert_eq!(res.tier_info.name, "Exact Match");
        assert!(!res.fallback_used);
        assert_eq!(res.subset.len(), 2);
        // Source order preserved.
        assert_eq!(res.subset[0].kills, 4.0);
        assert_eq!(res.subset[1].kills, 3.0);
    }

    #[test]
    fn family_tier_relaxes_split() {
        let records = store();
        let mut q = FilterQuery::new(&["Faker"], (1, 3), "mid");
        q.team = Some("T1".into());
        q.tournament = Some("LCK Winter 2024".into());
        let res = filter(&records, &q).unwrap();
        assert_eq!(res.tier_info.rank, 2);
        assert!(res.fallback_used);
        assert_eq!(res.subset.len(), 4);
    }

    #[test]
    fn unknown_tournament_falls_to_player_tiers() {
        let records = store();
        let mut q = FilterQuery::new(&["Faker"], (1, 2), "MID");
        q.team = Some("T1".into());
        q.tournament = Some("AC".into());
        let res = filter(&records, &q).unwrap();
        assert_eq!(res.tier_info.rank, 5);
        assert!(res.fallback_used);
        assert_eq!(res.subset.len(), 4);
    }

    #[test]
    fn strict_mode_returns_empty_without_relaxing() {
        let records = store();
        let mut q = FilterQuery::new(&["Faker"], (1, 2), "MID");
        q.tournament = Some("AC".into());
        q.strict_mode = true;
        let res = filter(&records, &q).unwrap();
        assert!(res.is_empty());
        assert_eq!(res.tier_info.rank, 1);
        assert!(!res.fallback_used);
    }

    #[test]
    fn no_players_and_no_data() {
        let records = store();
        let q = FilterQuery::new(&[], (1, 2), "MID");
        let res = filter(&records, &q).unwrap();
        assert_eq!(res.tier_info.name, NO_PLAYERS_TIER);
        assert!(!res.fallback_used);

        let q = FilterQuery::new(&["Nobody"], (1, 2), "MID");
        let res = filter(&records, &q).unwrap();
        assert!(res.is_empty());
        assert_eq!(res.tier_info.name, NO_DATA_TIER);
        assert_eq!(res.tier_info.weight, 0.0);
        assert!(res.fallback_used);
    }

    #[test]
    fn player_names_are_case_sensitive() {
        let records = store();
        let q = FilterQuery::new(&["faker"], (1, 5), "");
        assert!(filter(&records, &q).unwrap().is_empty());
    }

    #[test]
    fn region_year_tier_uses_season() {
        let records = store();
        let mut q = FilterQuery::new(&["Faker"], (1, 1), "mid");
        q.team = Some("KT".into());
        q.tournament = Some("LCKCL 2024".into());
        let res = filter(&records, &q).unwrap();
        assert_eq!(res.tier_info.name, "Same Region/Year");
        assert_eq!(res.subset.len(), 2);
    }

    #[test]
    fn inverted_range_is_rejected() {
        let records = store();
        let q = FilterQuery::new(&["Faker"], (3, 1), "mid");
        assert!(filter(&records, &q).unwrap_err().is_validation());
    }

    #[test]
    fn ladder_weights_never_increase() {
        let w = ladder_weights();
        assert!(w.windows(2).all(|p| p[1] <= p[0]));
        assert_eq!(w[0], 1.0);
    }
}
