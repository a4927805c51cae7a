//! Analysis orchestrator: parse, classify, run rules, score.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::Config;
use crate::error::{PilotError, PilotResult};
use crate::fix::{fix, FixResult};
use crate::lock::{classify, LockClassification};
use crate::parser::{DdlParser, SqlParser};
use crate::production::{ProductionContext, TableFacts};
use crate::risk::{score, worst, RiskScore};
use crate::rules::{ClassifiedStatement, RuleEngine, Severity, Violation};

/// Default PostgreSQL major version.
pub const DEFAULT_PG_VERSION: u32 = 17;

/// Per-statement part of a report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementReport {
    pub sql: String,
    pub line: usize,
    pub lock: LockClassification,
    pub risk: RiskScore,
    pub violations: Vec<Violation>,
}

/// Report for one migration file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAnalysis {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    pub statements: Vec<StatementReport>,
    pub overall_risk: RiskScore,
    /// All violations, ordered by line.
    pub violations: Vec<Violation>,
}

impl FileAnalysis {
    pub fn count(&self, severity: Severity) -> usize {
        self.violations
            .iter()
            .filter(|v| v.severity == severity)
            .count()
    }

    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Result of analyzing one file in a batch.
#[derive(Debug)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub result: PilotResult<FileAnalysis>,
}

/// Runs the whole pipeline over migration files.
pub struct Analyzer<P: SqlParser = DdlParser> {
    parser: P,
    engine: RuleEngine,
    pg_version: u32,
    production: Option<ProductionContext>,
}

impl Default for Analyzer<DdlParser> {
    fn default() -> Self {
        Self::new(DEFAULT_PG_VERSION)
    }
}

impl Analyzer<DdlParser> {
    /// All built-in rules against PostgreSQL `pg_version`.
    pub fn new(pg_version: u32) -> Self {
        Self {
            parser: DdlParser,
            engine: RuleEngine::new(),
            pg_version,
            production: None,
        }
    }

    /// Analyzer configured from `config`, loading its production snapshot
    /// if one is named.
    pub fn from_config(config: &Config) -> PilotResult<Self> {
        let production = match &config.production_context {
            Some(path) => Some(ProductionContext::load(path)?),
            None => None,
        };
        Ok(Self {
            parser: DdlParser,
            engine: RuleEngine::from_config(config),
            pg_version: config.pg_version,
            production,
        })
    }
}

impl<P: SqlParser> Analyzer<P> {
    /// Swap in another SQL front-end.
    pub fn with_parser<Q: SqlParser>(self, parser: Q) -> Analyzer<Q> {
        Analyzer {
            parser,
            engine: self.engine,
            pg_version: self.pg_version,
            production: self.production,
        }
    }

    pub fn with_engine(mut self, engine: RuleEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_production(mut self, production: ProductionContext) -> Self {
        self.production = Some(production);
        self
    }

    pub fn pg_version(&self) -> u32 {
        self.pg_version
    }

    pub fn engine(&self) -> &RuleEngine {
        &self.engine
    }

    /// Analyze one migration. A parse error fails the whole file.
    pub fn analyze(&self, sql: &str) -> PilotResult<FileAnalysis> {
        let parsed = self.parser.parse(sql).map_err(PilotError::parse)?;
        let statements: Vec<ClassifiedStatement> = parsed
            .into_iter()
            .map(|parsed| ClassifiedStatement {
                lock: classify(&parsed.stmt, self.pg_version),
                parsed,
            })
            .collect();

        let production = self.production.as_ref();
        let grouped = self
            .engine
            .run_per_statement(&statements, self.pg_version, production, Some(sql));

        let reports: Vec<StatementReport> = statements
            .into_iter()
            .zip(grouped)
            .map(|(statement, violations)| {
                let facts = TableFacts::resolve(production, statement.stmt());
                StatementReport {
                    risk: score(&statement.lock, facts.table_stats, facts.affected_queries),
                    lock: statement.lock,
                    line: statement.parsed.line,
                    sql: statement.parsed.sql,
                    violations,
                }
            })
            .collect();

        let mut violations: Vec<Violation> = reports
            .iter()
            .flat_map(|r| r.violations.iter().cloned())
            .collect();
        violations.sort_by_key(|v| v.line);

        let overall_risk = worst(reports.iter().map(|r| &r.risk))
            .cloned()
            .unwrap_or_else(RiskScore::none);

        tracing::debug!(
            statements = reports.len(),
            violations = violations.len(),
            risk = %overall_risk.level,
            "analyzed migration"
        );

        Ok(FileAnalysis {
            file: None,
            statements: reports,
            overall_risk,
            violations,
        })
    }

    /// Read and analyze a file.
    pub fn analyze_file(&self, path: &Path) -> PilotResult<FileAnalysis> {
        let sql = std::fs::read_to_string(path)?;
        let mut analysis = self.analyze(&sql)?;
        analysis.file = Some(path.to_path_buf());
        Ok(analysis)
    }

    /// Analyze several files independently; a failing file does not stop
    /// the others.
    pub fn analyze_files<I>(&self, paths: I) -> Vec<FileOutcome>
    where
        I: IntoIterator,
        I::Item: AsRef<Path>,
    {
        paths
            .into_iter()
            .map(|path| {
                let path = path.as_ref();
                let result = self.analyze_file(path);
                if let Err(e) = &result {
                    tracing::warn!("{}: {}", path.display(), e);
                }
                FileOutcome {
                    path: path.to_path_buf(),
                    result,
                }
            })
            .collect()
    }

    /// Analyze `sql` and apply every available auto-fix.
    pub fn fix(&self, sql: &str) -> PilotResult<FixResult> {
        let analysis = self.analyze(sql)?;
        Ok(fix(sql, &analysis.violations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockType;
    use crate::parser::ParseError;
    use crate::risk::RiskLevel;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_create_index_report() {
        let analysis = Analyzer::new(17)
            .analyze("CREATE INDEX idx_users_email ON users (email);")
            .unwrap();
        assert_eq!(analysis.statements.len(), 1);
        let stmt = &analysis.statements[0];
        assert_eq!(stmt.lock.lock_type, LockType::Share);
        assert!(stmt.lock.blocks_writes && stmt.lock.long_held);
        let mp001 = analysis
            .violations
            .iter()
            .find(|v| v.rule_id == "MP001")
            .unwrap();
        assert_eq!(mp001.severity, Severity::Critical);
        assert!(mp001.safe_alternative.as_deref().unwrap().contains("CONCURRENTLY"));
    }

    #[test]
    fn test_overall_risk_is_worst_statement() {
        let analysis = Analyzer::new(17)
            .analyze("SET lock_timeout = '5s';\nVACUUM FULL users;")
            .unwrap();
        assert_eq!(analysis.statements[0].risk.score, 0);
        assert_eq!(analysis.overall_risk, analysis.statements[1].risk);
        assert_eq!(analysis.overall_risk.level, RiskLevel::Yellow);
    }

    #[test]
    fn test_empty_file() {
        let analysis = Analyzer::new(17).analyze("-- nothing here\n").unwrap();
        assert!(analysis.statements.is_empty());
        assert!(analysis.is_clean());
        assert_eq!(analysis.overall_risk.level, RiskLevel::Green);
    }

    #[test]
    fn test_parse_failure_fails_file() {
        let err = Analyzer::new(17)
            .analyze("CREATE INDEX ON users (email);\nSELEC 1;")
            .unwrap_err();
        assert!(matches!(err, PilotError::Parse { .. }));
        assert_eq!(err.parse_messages().len(), 1);
    }

    struct Rejecting;

    impl SqlParser for Rejecting {
        fn parse(&self, _sql: &str) -> Result<Vec<crate::ast::ParsedStatement>, Vec<ParseError>> {
            Err(vec![ParseError::new("rejected", 0, 1)])
        }
    }

    #[test]
    fn test_pluggable_parser() {
        let analyzer = Analyzer::new(17).with_parser(Rejecting);
        assert!(analyzer.analyze("SELECT 1;").is_err());
    }

    #[test]
    fn test_production_changes_risk() {
        let production = ProductionContext::from_json(
            r#"{"tables": {"users": {"row_count": 20000000}}, "queries": {"users": [{"normalized_query": "q", "calls": 200000}]}}"#,
        )
        .unwrap();
        let analysis = Analyzer::new(17)
            .with_production(production)
            .analyze("ALTER TABLE users ALTER COLUMN email TYPE text;")
            .unwrap();
        assert_eq!(analysis.overall_risk.score, 100);
        assert_eq!(analysis.overall_risk.level, RiskLevel::Red);
    }
}
