use std::fmt;

use serde::{Deserialize, Serialize};

use crate::records::Stat;

/// Player role, resolved once per query from whatever spelling the caller used.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Position {
    Top,
    Jungle,
    Mid,
    Bot,
    Support,
    /// Unrecognised role, kept as its lowercased literal.
    Other(String),
}

const TOP_ALIASES: &[&str] = &["top"];
const JUNGLE_ALIASES: &[&str] = &["jng", "jungle", "jg"];
const MID_ALIASES: &[&str] = &["mid", "middle"];
const BOT_ALIASES: &[&str] = &["adc", "ad", "bot", "bottom"];
const SUPPORT_ALIASES: &[&str] = &["sup", "support", "utility"];

impl Position {
    /// `None` for a blank role, which matches every record.
    pub fn resolve(raw: &str) -> Option<Self> {
        let key = raw.trim().to_ascii_lowercase();
        if key.is_empty() {
            return None;
        }
        let pos = if TOP_ALIASES.contains(&key.as_str()) {
            Position::Top
        } else if JUNGLE_ALIASES.contains(&key.as_str()) {
            Position::Jungle
        } else if MID_ALIASES.contains(&key.as_str()) {
            Position::Mid
        } else if BOT_ALIASES.contains(&key.as_str()) {
            Position::Bot
        } else if SUPPORT_ALIASES.contains(&key.as_str()) {
            Position::Support
        } else {
            Position::Other(key)
        };
        Some(pos)
    }

    pub fn aliases(&self) -> &[&str] {
        match self {
            Position::Top => TOP_ALIASES,
            Position::Jungle => JUNGLE_ALIASES,
            Position::Mid => MID_ALIASES,
            Position::Bot => BOT_ALIASES,
            Position::Support => SUPPORT_ALIASES,
            Position::Other(_) => &[],
        }
    }

    pub fn matches(&self, record_position: &str) -> bool {
        let value = record_position.trim().to_ascii_lowercase();
        match self {
            Position::Other(literal) => *literal == value,
            known => known.aliases().contains(&value.as_str()),
        }
    }

    /// Multiplicative role baseline for `stat`; 1.0 is neutral.
    pub fn stat_factor(&self, stat: Stat) -> f64 {
        use Position::*;
        use Stat::*;
        match (self, stat) {
            (Other(_), _) => 1.0,
            (_, GoldDiffAt15 | XpDiffAt15 | CsDiffAt15) => 1.0,

            (Top, Kills) => 0.90,
            (Jungle, Kills) => 0.95,
            (Mid, Kills) => 1.10,
            (Bot, Kills) => 1.20,
            (Support, Kills) => 0.45,

            (Top, Deaths) => 1.00,
            (Jungle, Deaths) => 1.05,
            (Mid, Deaths) => 0.95,
            (Bot, Deaths) => 0.95,
            (Support, Deaths) => 1.10,

            (Top, Assists) => 0.85,
            (Jungle, Assists) => 1.10,
            (Mid, Assists) => 0.95,
            (Bot, Assists) => 0.90,
            (Support, Assists) => 1.35,

            (Top, Damage) => 1.00,
            (Jungle, Damage) => 0.80,
            (Mid, Damage) => 1.15,
            (Bot, Damage) => 1.20,
            (Support, Damage) => 0.50,

            (Top, VisionScore) => 0.75,
            (Jungle, VisionScore) => 1.00,
            (Mid, VisionScore) => 0.80,
            (Bot, VisionScore) => 0.80,
            (Support, VisionScore) => 1.60,

            (Top, CreepScore | CsAt10) => 1.10,
            (Jungle, CreepScore | CsAt10) => 0.80,
            (Mid, CreepScore | CsAt10) => 1.10,
            (Bot, CreepScore | CsAt10) => 1.20,
            (Support, CreepScore | CsAt10) => 0.15,

            (Support, GoldAt10 | XpAt10) => 0.75,
            (Jungle, GoldAt10 | XpAt10) => 0.95,
            (_, GoldAt10 | XpAt10) => 1.05,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Top => f.write_str("TOP"),
            Position::Jungle => f.write_str("JNG"),
            Position::Mid => f.write_str("MID"),
            Position::Bot => f.write_str("ADC"),
            Position::Support => f.write_str("SUP"),
            Position::Other(raw) => f.write_str(raw),
        }
    }
}

/// Role factor for an optional position; no role is neutral.
pub fn position_factor(position: Option<&Position>, stat: Stat) -> f64 {
    position.map(|p| p.stat_factor(stat)).unwrap_or(1.0)
}
