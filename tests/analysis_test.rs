//! End-to-end checks of the analysis pipeline.

use std::io::Write;

use migrationpilot::prelude::*;
use pretty_assertions::assert_eq;

fn ids(analysis: &FileAnalysis) -> Vec<&str> {
    analysis.violations.iter().map(|v| v.rule_id.as_str()).collect()
}

#[test]
fn create_index_without_concurrently() {
    let analysis = Analyzer::new(17)
        .analyze("CREATE INDEX idx_users_email ON users (email);")
        .unwrap();

    let lock = analysis.statements[0].lock;
    assert_eq!(lock.lock_type, LockType::Share);
    assert!(lock.blocks_writes);
    assert!(!lock.blocks_reads);
    assert!(lock.long_held);

    let mp001: Vec<&Violation> = analysis
        .violations
        .iter()
        .filter(|v| v.rule_id == "MP001")
        .collect();
    assert_eq!(mp001.len(), 1);
    assert_eq!(mp001[0].severity, Severity::Critical);
    assert!(
        mp001[0]
            .safe_alternative
            .as_deref()
            .is_some_and(|alt| alt.contains("CONCURRENTLY"))
    );
}

#[test]
fn multi_ddl_transaction_flags_second_statement_only() {
    let sql = "BEGIN;\nALTER TABLE t ADD COLUMN a int;\nALTER TABLE t ADD COLUMN b int;\nCOMMIT;";
    let analysis = Analyzer::new(17).analyze(sql).unwrap();
    let lines: Vec<usize> = analysis
        .violations
        .iter()
        .filter(|v| v.rule_id == "MP008")
        .map(|v| v.line)
        .collect();
    assert_eq!(lines, vec![3]);
    assert!(analysis.statements[2].violations.iter().any(|v| v.rule_id == "MP008"));
    assert!(!analysis.statements[1].violations.iter().any(|v| v.rule_id == "MP008"));
}

#[test]
fn volatile_default_depends_on_version() {
    let sql = "ALTER TABLE t ADD COLUMN c timestamp DEFAULT now();";
    for (version, severity) in [(10, Severity::Critical), (17, Severity::Warning)] {
        let analysis = Analyzer::new(version).analyze(sql).unwrap();
        assert!(analysis.statements[0].lock.long_held, "pg{version}");
        let mp003 = analysis
            .violations
            .iter()
            .find(|v| v.rule_id == "MP003")
            .unwrap();
        assert_eq!(mp003.severity, severity, "pg{version}");
    }
}

#[test]
fn inline_directive_suppresses_next_statement() {
    let sql = "-- migrationpilot-disable MP001\nCREATE INDEX idx ON users(email);";
    let analysis = Analyzer::new(17).analyze(sql).unwrap();
    assert!(!ids(&analysis).contains(&"MP001"));
    assert!(ids(&analysis).contains(&"MP004"));
}

#[test]
fn exclusive_long_held_lock_scores_yellow() {
    let lock = LockClassification::new(LockType::AccessExclusive, true, true, true);
    let risk = migrationpilot::risk::score(&lock, None, None);
    assert_eq!(risk.score, 40);
    assert_eq!(risk.level, RiskLevel::Yellow);
}

#[test]
fn file_wide_disable_silences_everything() {
    let sql = "/* migrationpilot-disable-file */\n\
               CREATE INDEX idx ON users (email);\n\
               ALTER TABLE users DROP COLUMN bio CASCADE;\n\
               DROP TABLE orders;";
    let analysis = Analyzer::new(17).analyze(sql).unwrap();
    assert!(analysis.is_clean());
    assert!(analysis.statements.iter().all(|s| s.violations.is_empty()));
    // Risk is still reported.
    assert_eq!(analysis.overall_risk.level, RiskLevel::Yellow);
}

#[test]
fn violations_sorted_by_line_with_stable_ties() {
    let sql = "VACUUM FULL a;\nCREATE INDEX i ON b (x); DROP INDEX j;\nTRUNCATE c;";
    let analysis = Analyzer::new(17).analyze(sql).unwrap();
    let lines: Vec<usize> = analysis.violations.iter().map(|v| v.line).collect();
    let mut sorted = lines.clone();
    sorted.sort();
    assert_eq!(lines, sorted);

    // Same line: statement order first, then rule order.
    let line_two: Vec<&str> = analysis
        .violations
        .iter()
        .filter(|v| v.line == 2)
        .map(|v| v.rule_id.as_str())
        .collect();
    let grouped: Vec<&str> = analysis.statements[1..3]
        .iter()
        .flat_map(|s| s.violations.iter().map(|v| v.rule_id.as_str()))
        .collect();
    assert_eq!(line_two, grouped);
    assert_eq!(line_two.first(), Some(&"MP001"));
    assert!(line_two.contains(&"MP009"));
}

#[test]
fn analysis_is_deterministic() {
    let sql = "BEGIN;\nALTER TABLE users ADD COLUMN n serial;\nUPDATE users SET n = 1;\nCOMMIT;";
    let analyzer = Analyzer::new(17);
    assert_eq!(analyzer.analyze(sql).unwrap(), analyzer.analyze(sql).unwrap());
}

#[test]
fn fix_is_idempotent() {
    let sql = "CREATE INDEX idx_users_email ON users (email);\n\
               ALTER TABLE orders ADD CONSTRAINT fk FOREIGN KEY (user_id) REFERENCES users (id);\n\
               ALTER TABLE users ADD COLUMN nickname varchar(32);\n";
    let analyzer = Analyzer::new(17);
    let first = analyzer.fix(sql).unwrap();
    assert!(first.fixed_count > 0);
    assert!(first.fixed_sql.contains("CREATE INDEX CONCURRENTLY"));
    assert!(first.fixed_sql.contains("NOT VALID"));
    assert!(first.fixed_sql.contains("nickname TEXT"));

    let second = analyzer.fix(&first.fixed_sql).unwrap();
    assert_eq!(second.fixed_sql, first.fixed_sql);
    assert_eq!(second.fixed_count, 0);
}

#[test]
fn fix_inserts_timeout_when_only_set_later() {
    let sql = "ALTER TABLE users DROP COLUMN bio;\nSET lock_timeout = '5s';";
    let analyzer = Analyzer::new(17);
    assert!(ids(&analyzer.analyze(sql).unwrap()).contains(&"MP004"));

    let first = analyzer.fix(sql).unwrap();
    assert!(first.fixed_count >= 1);
    assert!(first.fixed_sql.starts_with("SET lock_timeout = '5s';\nALTER TABLE users DROP COLUMN bio;"));
    assert!(!ids(&analyzer.analyze(&first.fixed_sql).unwrap()).contains(&"MP004"));

    let second = analyzer.fix(&first.fixed_sql).unwrap();
    assert_eq!(second.fixed_sql, first.fixed_sql);
    assert_eq!(second.fixed_count, 0);
}

#[test]
fn fix_rewrites_every_statement_on_a_line() {
    let sql = "CREATE INDEX a ON t (x); CREATE INDEX b ON t (y);";
    let result = Analyzer::new(17).fix(sql).unwrap();
    assert!(result.fixed_sql.contains("CREATE INDEX CONCURRENTLY a ON t (x);"));
    assert!(result.fixed_sql.contains("CREATE INDEX CONCURRENTLY b ON t (y);"));
    assert!(!result.unfixable.iter().any(|v| v.rule_id == "MP001"));
}

#[test]
fn batch_isolates_failing_files() {
    let dir = std::env::temp_dir().join(format!("migrationpilot-batch-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let good = dir.join("0001_good.sql");
    let bad = dir.join("0002_bad.sql");
    let missing = dir.join("0003_missing.sql");
    std::fs::File::create(&good)
        .unwrap()
        .write_all(b"CREATE INDEX CONCURRENTLY idx ON users (email);")
        .unwrap();
    std::fs::File::create(&bad)
        .unwrap()
        .write_all(b"CREATE INDEX idx ON users (email);\nSELEC 1;")
        .unwrap();

    let outcomes = Analyzer::new(17).analyze_files([&good, &bad, &missing]);
    assert_eq!(outcomes.len(), 3);
    let good_report = outcomes[0].result.as_ref().unwrap();
    assert_eq!(good_report.file.as_deref(), Some(good.as_path()));
    assert!(matches!(outcomes[1].result, Err(PilotError::Parse { .. })));
    assert!(matches!(outcomes[2].result, Err(PilotError::Io(_))));

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn production_snapshot_feeds_rules_and_risk() {
    let snapshot = ProductionContext::from_json(
        r#"{
            "tables": {"public.orders": {"row_count": 50000000, "total_bytes": 0, "index_count": 4}},
            "queries": {"orders": [{"normalized_query": "SELECT * FROM orders WHERE id = $1", "calls": 900000}]},
            "active_connections": {"orders": 3}
        }"#,
    )
    .unwrap();
    let analysis = Analyzer::new(17)
        .with_production(snapshot)
        .analyze("SET lock_timeout = '5s';\nALTER TABLE orders ALTER COLUMN total TYPE numeric(12,2);")
        .unwrap();
    let found = ids(&analysis);
    assert!(found.contains(&"MP013"));
    assert!(found.contains(&"MP014"));
    assert!(!found.contains(&"MP019"));
    assert_eq!(analysis.overall_risk.level, RiskLevel::Red);
}

#[test]
fn report_serializes_to_json() {
    let analysis = migrationpilot::analyze("CREATE INDEX idx ON users (email);").unwrap();
    let value = serde_json::to_value(&analysis).unwrap();
    assert_eq!(value["statements"][0]["lock"]["lockType"], "SHARE");
    assert_eq!(value["overallRisk"]["level"], "YELLOW");
    assert_eq!(value["violations"][0]["ruleId"], "MP001");
    assert!(value.get("file").is_none());
}
