//! Runs the rule registry over a classified file.

use std::collections::HashMap;

use super::suppression::Suppressions;
use super::{all_rules, ClassifiedStatement, Rule, RuleContext, Severity, Violation};
use crate::config::{Config, Thresholds};
use crate::production::ProductionContext;

/// The enabled rules plus their configuration.
pub struct RuleEngine {
    rules: Vec<Box<dyn Rule>>,
    severity_overrides: HashMap<String, Severity>,
    thresholds: Thresholds,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleEngine {
    /// Every built-in rule with default thresholds.
    pub fn new() -> Self {
        Self::with_rules(all_rules())
    }

    pub fn with_rules(rules: Vec<Box<dyn Rule>>) -> Self {
        Self {
            rules,
            severity_overrides: HashMap::new(),
            thresholds: Thresholds::default(),
        }
    }

    /// Built-in rules minus the disabled ones, with severity overrides and
    /// thresholds from `config`.
    pub fn from_config(config: &Config) -> Self {
        let mut engine = Self::new();
        engine.thresholds = config.thresholds.clone();
        for id in &config.rules.disabled {
            engine.disable(id);
        }
        for (id, severity) in &config.rules.severity {
            engine.override_severity(id, *severity);
        }
        engine
    }

    /// Stop running rule `id`.
    pub fn disable(&mut self, id: &str) {
        let before = self.rules.len();
        self.rules.retain(|rule| !rule.id().eq_ignore_ascii_case(id));
        if self.rules.len() == before {
            tracing::warn!("cannot disable unknown rule {}", id);
        }
    }

    /// Report every violation of rule `id` with `severity`.
    pub fn override_severity(&mut self, id: &str, severity: Severity) {
        self.severity_overrides.insert(id.to_uppercase(), severity);
    }

    pub fn rules(&self) -> impl Iterator<Item = &dyn Rule> {
        self.rules.iter().map(|rule| rule.as_ref())
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Run every enabled rule over every statement.
    ///
    /// Violations are ordered by line; ties keep statement order, then rule
    /// order. With `raw_sql`, inline suppression directives are honoured.
    pub fn run(
        &self,
        statements: &[ClassifiedStatement],
        pg_version: u32,
        production: Option<&ProductionContext>,
        raw_sql: Option<&str>,
    ) -> Vec<Violation> {
        let mut violations: Vec<Violation> = self
            .run_per_statement(statements, pg_version, production, raw_sql)
            .into_iter()
            .flatten()
            .collect();
        violations.sort_by_key(|v| v.line);
        violations
    }

    /// Like [`run`](Self::run), but grouped by statement: entry `i` holds the
    /// violations raised on `statements[i]`, in rule order.
    pub fn run_per_statement(
        &self,
        statements: &[ClassifiedStatement],
        pg_version: u32,
        production: Option<&ProductionContext>,
        raw_sql: Option<&str>,
    ) -> Vec<Vec<Violation>> {
        let suppressions = raw_sql
            .map(|sql| {
                let lines: Vec<usize> = statements.iter().map(|s| s.parsed.line).collect();
                Suppressions::resolve(sql, &lines)
            })
            .unwrap_or_default();

        let mut suppressed = 0;
        let mut total = 0;
        let grouped: Vec<Vec<Violation>> = (0..statements.len())
            .map(|index| {
                let ctx =
                    RuleContext::new(statements, index, pg_version, production, &self.thresholds);
                let stmt = statements[index].stmt();
                let mut found = Vec::new();
                for rule in &self.rules {
                    let Some(mut violation) = rule.check(stmt, &ctx) else {
                        continue;
                    };
                    if let Some(severity) = self.severity_overrides.get(rule.id()) {
                        violation.severity = *severity;
                    }
                    if suppressions.is_suppressed(&violation) {
                        suppressed += 1;
                    } else {
                        found.push(violation);
                    }
                }
                total += found.len();
                found
            })
            .collect();

        tracing::debug!(
            statements = statements.len(),
            violations = total,
            suppressed,
            "rules finished"
        );
        grouped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RulesConfig;
    use crate::rules::test_support::classified;
    use pretty_assertions::assert_eq;

    fn ids(violations: &[Violation]) -> Vec<&str> {
        violations.iter().map(|v| v.rule_id.as_str()).collect()
    }

    #[test]
    fn test_sorted_by_line() {
        let sql = "CREATE INDEX a ON t (x);\nDROP TABLE u;";
        let statements = classified(sql, 17);
        let violations = RuleEngine::new().run(&statements, 17, None, None);
        let lines: Vec<usize> = violations.iter().map(|v| v.line).collect();
        let mut sorted = lines.clone();
        sorted.sort();
        assert_eq!(lines, sorted);
        assert!(ids(&violations).contains(&"MP001"));
        assert!(ids(&violations).contains(&"MP026"));
    }

    #[test]
    fn test_config_disables_and_overrides() {
        let config = Config {
            rules: RulesConfig {
                disabled: vec!["MP004".to_string()],
                severity: [("MP001".to_string(), Severity::Warning)].into(),
            },
            ..Config::default()
        };
        let engine = RuleEngine::from_config(&config);
        assert_eq!(engine.rules().count(), 79);

        let statements = classified("CREATE INDEX a ON t (x);", 17);
        let violations = engine.run(&statements, 17, None, None);
        assert!(!ids(&violations).contains(&"MP004"));
        let mp001 = violations.iter().find(|v| v.rule_id == "MP001").unwrap();
        assert_eq!(mp001.severity, Severity::Warning);
    }

    #[test]
    fn test_directives_need_raw_text() {
        let sql = "-- migrationpilot-disable MP001\nCREATE INDEX a ON t (x);";
        let statements = classified(sql, 17);
        let engine = RuleEngine::new();
        assert!(ids(&engine.run(&statements, 17, None, None)).contains(&"MP001"));
        assert!(!ids(&engine.run(&statements, 17, None, Some(sql))).contains(&"MP001"));
    }

    #[test]
    fn test_grouped_by_statement_on_one_line() {
        let statements = classified("BEGIN; CREATE INDEX a ON t (x); COMMIT;", 17);
        let grouped = RuleEngine::new().run_per_statement(&statements, 17, None, None);
        assert_eq!(grouped.len(), 3);
        assert!(grouped[0].is_empty());
        assert!(ids(&grouped[1]).contains(&"MP001"));
        assert!(grouped[2].is_empty());
    }
}
