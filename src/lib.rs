//! # MigrationPilot — static safety analysis for PostgreSQL migrations
//!
//! > **Know which lock you take before you take it.**
//!
//! MigrationPilot reads migration SQL and reports, per statement, the lock
//! PostgreSQL will acquire, the safety rules it breaks, and a risk score.
//! Nothing is ever executed against a database.
//!
//! ## Quick Example
//!
//! ```rust
//! use migrationpilot::prelude::*;
//!
//! let report = migrationpilot::analyze("CREATE INDEX idx_users_email ON users (email);")?;
//!
//! assert_eq!(report.statements[0].lock.lock_type, LockType::Share);
//! assert!(report.violations.iter().any(|v| v.rule_id == "MP001"));
//! # Ok::<(), migrationpilot::error::PilotError>(())
//! ```
//!
//! ## Pipeline
//!
//! | Stage    | Module       | Output                          |
//! |----------|--------------|---------------------------------|
//! | Parse    | [`parser`]   | `ParsedStatement`s              |
//! | Classify | [`lock`]     | `LockClassification`            |
//! | Check    | [`rules`]    | `Violation`s (80 rules)         |
//! | Score    | [`risk`]     | `RiskScore` per statement/file  |
//! | Fix      | [`fix`]      | rewritten SQL                   |

pub mod analysis;
pub mod ast;
pub mod config;
pub mod error;
pub mod fix;
pub mod lock;
pub mod parser;
pub mod production;
pub mod risk;
pub mod rules;
pub mod targets;

pub mod prelude {
    pub use crate::analysis::{Analyzer, FileAnalysis, FileOutcome, StatementReport};
    pub use crate::ast::*;
    pub use crate::config::{Config, FailOn, Thresholds};
    pub use crate::error::*;
    pub use crate::fix::{fix, FixResult};
    pub use crate::lock::{classify, LockClassification, LockType};
    pub use crate::parser::{parse_sql, DdlParser, ParseError, SqlParser};
    pub use crate::production::ProductionContext;
    pub use crate::risk::{RiskLevel, RiskScore};
    pub use crate::rules::{all_rules, Rule, RuleEngine, Severity, Violation};
}

/// Analyze a migration with every built-in rule against the default
/// PostgreSQL version.
///
/// # Example
///
/// ```
/// let report = migrationpilot::analyze("ALTER TABLE users DROP COLUMN bio;").unwrap();
/// assert_eq!(report.overall_risk.score, 30);
/// ```
pub fn analyze(sql: &str) -> error::PilotResult<analysis::FileAnalysis> {
    analysis::Analyzer::default().analyze(sql)
}
