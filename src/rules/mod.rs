//! Safety rules.
//!
//! Every rule is a stateless check over one statement plus a read-only
//! [`RuleContext`]. The registry returned by [`all_rules`] is ordered by rule
//! ID, which is also the order the engine runs them in.

mod columns;
mod constraints;
mod context;
mod destructive;
mod engine;
mod locking;
mod production;
mod schema;
pub mod suppression;
mod transactions;
mod types;

pub use context::{ClassifiedStatement, RuleContext};
pub use engine::RuleEngine;

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::ast::{AlterTable, AlterTableCmd, ColumnDef, DataType, Statement};

/// Base URL of the per-rule documentation pages.
pub const DOCS_BASE_URL: &str = "https://migrationpilot.dev/rules";

/// How bad a violation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// One finding of one rule on one statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    pub rule_id: String,
    pub rule_name: String,
    pub severity: Severity,
    pub message: String,
    /// Start line of the offending statement.
    pub line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safe_alternative: Option<String>,
    /// Byte range of the offending statement in the analyzed source,
    /// terminator excluded.
    #[serde(skip)]
    pub span: Option<Range<usize>>,
}

impl Violation {
    pub fn with_alternative(mut self, alternative: impl Into<String>) -> Self {
        self.safe_alternative = Some(alternative.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

/// Static description of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleMeta {
    pub id: &'static str,
    pub name: &'static str,
    pub severity: Severity,
    pub description: &'static str,
    pub why_it_matters: &'static str,
}

impl RuleMeta {
    /// A violation of this rule at the statement `ctx` describes.
    pub fn violation(&self, ctx: &RuleContext<'_>, message: impl Into<String>) -> Violation {
        Violation {
            rule_id: self.id.to_string(),
            rule_name: self.name.to_string(),
            severity: self.severity,
            message: message.into(),
            line: ctx.line,
            safe_alternative: None,
            span: Some(ctx.span()),
        }
    }
}

/// A migration safety check.
pub trait Rule: Send + Sync {
    fn meta(&self) -> &RuleMeta;

    /// At most one violation per statement.
    fn check(&self, stmt: &Statement, ctx: &RuleContext<'_>) -> Option<Violation>;

    fn id(&self) -> &'static str {
        self.meta().id
    }

    fn docs_url(&self) -> String {
        format!("{}/{}", DOCS_BASE_URL, self.id().to_lowercase())
    }
}

type CheckFn = fn(&RuleMeta, &Statement, &RuleContext<'_>) -> Option<Violation>;

/// A rule backed by a plain function; all built-in rules are of this kind.
#[derive(Clone, Copy)]
pub struct BuiltinRule {
    meta: RuleMeta,
    check: CheckFn,
}

impl BuiltinRule {
    pub const fn new(meta: RuleMeta, check: CheckFn) -> Self {
        Self { meta, check }
    }
}

impl Rule for BuiltinRule {
    fn meta(&self) -> &RuleMeta {
        &self.meta
    }

    fn check(&self, stmt: &Statement, ctx: &RuleContext<'_>) -> Option<Violation> {
        (self.check)(&self.meta, stmt, ctx)
    }
}

impl fmt::Debug for BuiltinRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltinRule").field("meta", &self.meta).finish()
    }
}

/// All built-in rules, ordered by ID.
pub fn all_rules() -> Vec<Box<dyn Rule>> {
    let mut rules: Vec<BuiltinRule> = [
        locking::RULES,
        constraints::RULES,
        columns::RULES,
        types::RULES,
        destructive::RULES,
        transactions::RULES,
        production::RULES,
        schema::RULES,
    ]
    .concat();
    rules.sort_by_key(|rule| rule.meta.id);
    rules
        .into_iter()
        .map(|rule| Box::new(rule) as Box<dyn Rule>)
        .collect()
}

fn alter_table(stmt: &Statement) -> Option<&AlterTable> {
    match stmt {
        Statement::AlterTable(alter) => Some(alter),
        _ => None,
    }
}

/// Subcommands of an `ALTER TABLE`, empty for anything else.
fn alter_cmds(stmt: &Statement) -> &[AlterTableCmd] {
    match alter_table(stmt) {
        Some(alter) => &alter.cmds,
        None => &[],
    }
}

/// Columns added by `ALTER TABLE ... ADD COLUMN`.
fn added_columns(stmt: &Statement) -> impl Iterator<Item = &ColumnDef> {
    alter_cmds(stmt).iter().filter_map(|cmd| match cmd {
        AlterTableCmd::AddColumn { column, .. } => Some(column),
        _ => None,
    })
}

/// Column names and types a statement declares: new tables, added columns
/// and type changes.
fn declared_types(stmt: &Statement) -> Vec<(&str, &DataType)> {
    match stmt {
        Statement::CreateTable(create) => create
            .columns
            .iter()
            .map(|c| (c.name.as_str(), &c.data_type))
            .collect(),
        Statement::AlterTable(alter) => alter
            .cmds
            .iter()
            .filter_map(|cmd| match cmd {
                AlterTableCmd::AddColumn { column, .. } => {
                    Some((column.name.as_str(), &column.data_type))
                }
                AlterTableCmd::AlterColumnType {
                    column, data_type, ..
                } => Some((column.as_str(), data_type)),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Look a built-in rule up by ID, case-insensitively.
pub fn find_rule(id: &str) -> Option<Box<dyn Rule>> {
    all_rules()
        .into_iter()
        .find(|rule| rule.id().eq_ignore_ascii_case(id))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::Thresholds;
    use crate::lock::classify;
    use crate::parser::parse_sql;
    use crate::production::ProductionContext;

    /// Classify every statement of `sql` on `pg_version`.
    pub fn classified(sql: &str, pg_version: u32) -> Vec<ClassifiedStatement> {
        parse_sql(sql)
            .unwrap()
            .into_iter()
            .map(|parsed| ClassifiedStatement {
                lock: classify(&parsed.stmt, pg_version),
                parsed,
            })
            .collect()
    }

    /// Violations of every rule on every statement of `sql`, unsorted and
    /// unfiltered.
    pub fn fired_with(
        sql: &str,
        pg_version: u32,
        production: Option<&ProductionContext>,
    ) -> Vec<Violation> {
        let statements = classified(sql, pg_version);
        let thresholds = Thresholds::default();
        let rules = all_rules();
        let mut violations = Vec::new();
        for index in 0..statements.len() {
            let ctx = RuleContext::new(&statements, index, pg_version, production, &thresholds);
            for rule in &rules {
                violations.extend(rule.check(&statements[index].parsed.stmt, &ctx));
            }
        }
        violations
    }

    pub fn fired(sql: &str) -> Vec<String> {
        fired_with(sql, 17, None)
            .into_iter()
            .map(|v| v.rule_id)
            .collect()
    }

    pub fn fires(sql: &str, id: &str) -> bool {
        fired(sql).iter().any(|fired| fired == id)
    }

    /// The violation `id` raises on `sql`, if any.
    pub fn violation(sql: &str, pg_version: u32, id: &str) -> Option<Violation> {
        fired_with(sql, pg_version, None)
            .into_iter()
            .find(|v| v.rule_id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_registry_is_complete_and_ordered() {
        let rules = all_rules();
        let ids: Vec<&str> = rules.iter().map(|r| r.id()).collect();
        let expected: Vec<String> = (1..=80).map(|n| format!("MP{:03}", n)).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_rule_names_unique() {
        let rules = all_rules();
        let mut names: Vec<&str> = rules.iter().map(|r| r.meta().name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 80);
    }

    #[test]
    fn test_find_rule() {
        let rule = find_rule("mp001").unwrap();
        assert_eq!(rule.meta().name, "require-concurrent-index");
        assert_eq!(rule.docs_url(), "https://migrationpilot.dev/rules/mp001");
        assert!(find_rule("MP999").is_none());
    }

    #[test]
    fn test_severity_order() {
        assert!(Severity::Critical > Severity::Warning);
        assert_eq!(serde_json::to_string(&Severity::Critical).unwrap(), "\"critical\"");
    }
}
