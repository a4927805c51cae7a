//! Risk scoring.
//!
//! A statement's risk combines three weighted factors:
//!
//! | Factor          | Weight | Input                           |
//! |-----------------|--------|---------------------------------|
//! | Lock Severity   | 40     | lock classification             |
//! | Table Size      | 30     | row count, when known           |
//! | Query Frequency | 30     | total calls of affected queries |
//!
//! Factors without data are left out rather than counted as zero.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::lock::{LockClassification, LockType};
use crate::production::{AffectedQuery, TableStats};

pub const LOCK_WEIGHT: u32 = 40;
pub const SIZE_WEIGHT: u32 = 30;
pub const FREQUENCY_WEIGHT: u32 = 30;

/// Score from which a statement is RED.
pub const RED_THRESHOLD: u32 = 50;
/// Score from which a statement is YELLOW.
pub const YELLOW_THRESHOLD: u32 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Green,
    Yellow,
    Red,
}

impl RiskLevel {
    pub fn from_score(score: u32) -> Self {
        if score >= RED_THRESHOLD {
            RiskLevel::Red
        } else if score >= YELLOW_THRESHOLD {
            RiskLevel::Yellow
        } else {
            RiskLevel::Green
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Green => write!(f, "GREEN"),
            RiskLevel::Yellow => write!(f, "YELLOW"),
            RiskLevel::Red => write!(f, "RED"),
        }
    }
}

/// One contribution to a risk score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub name: String,
    /// Maximum points this factor can contribute.
    pub weight: u32,
    pub value: u32,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskScore {
    pub level: RiskLevel,
    /// 0 to 100.
    pub score: u32,
    pub factors: Vec<RiskFactor>,
}

impl RiskScore {
    fn from_factors(factors: Vec<RiskFactor>) -> Self {
        let score = factors.iter().map(|f| f.value).sum::<u32>().min(100);
        Self {
            level: RiskLevel::from_score(score),
            score,
            factors,
        }
    }

    /// The zero score, used for files without statements.
    pub fn none() -> Self {
        Self::from_factors(Vec::new())
    }
}

/// Score one statement.
pub fn score(
    lock: &LockClassification,
    table_stats: Option<&TableStats>,
    affected_queries: Option<&[AffectedQuery]>,
) -> RiskScore {
    let mut factors = vec![lock_factor(lock)];
    if let Some(stats) = table_stats {
        factors.push(size_factor(stats));
    }
    if let Some(queries) = affected_queries {
        factors.push(frequency_factor(queries));
    }
    RiskScore::from_factors(factors)
}

/// The highest score; on ties the earliest wins.
pub fn worst<'a>(scores: impl IntoIterator<Item = &'a RiskScore>) -> Option<&'a RiskScore> {
    scores.into_iter().fold(None, |worst, s| match worst {
        Some(w) if w.score >= s.score => Some(w),
        _ => Some(s),
    })
}

fn lock_base(lock_type: LockType) -> u32 {
    match lock_type {
        LockType::AccessShare => 0,
        LockType::RowExclusive => 5,
        LockType::ShareUpdateExclusive => 10,
        LockType::Share => 15,
        LockType::ShareRowExclusive => 20,
        LockType::AccessExclusive => 25,
    }
}

fn lock_factor(lock: &LockClassification) -> RiskFactor {
    let mut value = lock_base(lock.lock_type);
    if lock.long_held {
        value += 15;
    }
    if lock.blocks_reads && lock.blocks_writes {
        value = value.max(30);
    }
    let value = value.min(LOCK_WEIGHT);

    let blocks = match (lock.blocks_reads, lock.blocks_writes) {
        (true, true) => "blocks reads and writes",
        (true, false) => "blocks reads",
        (false, true) => "blocks writes",
        (false, false) => "non-blocking",
    };
    let held = if lock.long_held { ", long-held" } else { "" };

    RiskFactor {
        name: "Lock Severity".to_string(),
        weight: LOCK_WEIGHT,
        value,
        detail: format!("{} ({}{})", lock.lock_type, blocks, held),
    }
}

fn size_factor(stats: &TableStats) -> RiskFactor {
    let rows = stats.row_count;
    let value = match rows {
        r if r > 10_000_000 => 30,
        r if r > 1_000_000 => 20,
        r if r > 100_000 => 10,
        r if r > 10_000 => 5,
        _ => 0,
    };
    RiskFactor {
        name: "Table Size".to_string(),
        weight: SIZE_WEIGHT,
        value,
        detail: format!("{} rows, {} bytes", rows, stats.total_bytes),
    }
}

fn frequency_factor(queries: &[AffectedQuery]) -> RiskFactor {
    let calls = queries.iter().map(|q| q.calls).fold(0u64, u64::saturating_add);
    let value = match calls {
        c if c > 100_000 => 30,
        c if c > 10_000 => 20,
        c if c > 1_000 => 10,
        c if c > 100 => 5,
        _ => 0,
    };
    RiskFactor {
        name: "Query Frequency".to_string(),
        weight: FREQUENCY_WEIGHT,
        value,
        detail: format!("{} calls across {} queries", calls, queries.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn query(calls: u64) -> AffectedQuery {
        AffectedQuery {
            normalized_query: "SELECT 1".to_string(),
            calls,
            mean_exec_time_ms: 1.0,
            service_name: None,
        }
    }

    #[test]
    fn test_exclusive_long_held_without_telemetry() {
        let lock = LockClassification::new(LockType::AccessExclusive, true, true, true);
        let risk = score(&lock, None, None);
        assert_eq!(risk.score, 40);
        assert_eq!(risk.level, RiskLevel::Yellow);
        assert_eq!(risk.factors.len(), 1);
    }

    #[test]
    fn test_blocking_floor() {
        let lock = LockClassification::new(LockType::AccessExclusive, true, true, false);
        assert_eq!(score(&lock, None, None).score, 30);
        let lock = LockClassification::new(LockType::ShareUpdateExclusive, false, false, false);
        assert_eq!(score(&lock, None, None).score, 10);
        assert_eq!(score(&lock, None, None).level, RiskLevel::Green);
    }

    #[test]
    fn test_all_factors() {
        let lock = LockClassification::new(LockType::Share, false, true, true);
        let stats = TableStats {
            row_count: 2_000_000,
            total_bytes: 1 << 30,
            index_count: 3,
        };
        let queries = [query(8_000), query(4_000)];
        let risk = score(&lock, Some(&stats), Some(&queries));
        let values: Vec<u32> = risk.factors.iter().map(|f| f.value).collect();
        assert_eq!(values, vec![30, 20, 20]);
        assert_eq!(risk.score, 70);
        assert_eq!(risk.level, RiskLevel::Red);
    }

    #[test]
    fn test_threshold_boundaries_are_strict() {
        let stats = TableStats {
            row_count: 10_000,
            ..Default::default()
        };
        assert_eq!(size_factor(&stats).value, 0);
        assert_eq!(frequency_factor(&[query(100)]).value, 0);
        assert_eq!(frequency_factor(&[query(101)]).value, 5);
    }

    #[test]
    fn test_call_totals_saturate() {
        let factor = frequency_factor(&[query(u64::MAX), query(5)]);
        assert_eq!(factor.value, 30);
        assert!(factor.detail.starts_with(&u64::MAX.to_string()));
    }

    #[test]
    fn test_worst_keeps_first_on_tie() {
        let a = RiskScore {
            level: RiskLevel::Yellow,
            score: 30,
            factors: vec![RiskFactor {
                name: "a".into(),
                weight: 40,
                value: 30,
                detail: String::new(),
            }],
        };
        let b = RiskScore {
            factors: Vec::new(),
            ..a.clone()
        };
        let scores = [a.clone(), b];
        assert_eq!(worst(&scores), Some(&a));
        assert_eq!(worst(&[] as &[RiskScore]), None);
    }
}
