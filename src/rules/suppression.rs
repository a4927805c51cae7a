//! Inline suppression directives.
//!
//! ```sql
//! -- migrationpilot-disable-file MP023
//! -- migrationpilot-disable MP001, MP004
//! CREATE INDEX idx ON users (email);
//! /* migrationpilot-disable */
//! DROP TABLE old_users;
//! ```
//!
//! A statement directive applies to the first statement starting on or
//! after its line; a file directive applies everywhere. No rule IDs means
//! every rule.

use std::collections::{BTreeSet, HashMap};

use once_cell::sync::Lazy;
use regex::Regex;

use super::Violation;
use crate::parser::lexer::{tokenize, TokenKind};
use crate::parser::line_at;

static DIRECTIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)migrationpilot-disable(-file)?((?:[\s,]+mp\d{3}\b)*)").unwrap()
});

static RULE_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)mp\d{3}").unwrap());

/// A set of rule IDs, or every rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleSet {
    All,
    Only(BTreeSet<String>),
}

impl RuleSet {
    pub fn contains(&self, rule_id: &str) -> bool {
        match self {
            RuleSet::All => true,
            RuleSet::Only(ids) => ids.contains(rule_id),
        }
    }

    fn union(&mut self, other: RuleSet) {
        match (&mut *self, other) {
            (RuleSet::All, _) => {}
            (_, RuleSet::All) => *self = RuleSet::All,
            (RuleSet::Only(ids), RuleSet::Only(more)) => ids.extend(more),
        }
    }
}

/// One parsed directive comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    /// 1-based line of the comment.
    pub line: usize,
    pub file_wide: bool,
    pub rules: RuleSet,
}

/// Find every directive in the comments of `sql`.
///
/// Only real comments count; text inside string literals is ignored. Source
/// that does not tokenize has no directives.
pub fn parse_directives(sql: &str) -> Vec<Directive> {
    let Ok(tokens) = tokenize(sql) else {
        return Vec::new();
    };

    let mut directives = Vec::new();
    for token in tokens
        .iter()
        .filter(|t| matches!(t.kind, TokenKind::LineComment | TokenKind::BlockComment))
    {
        let text = token.text(sql);
        for caps in DIRECTIVE.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            let ids: BTreeSet<String> = caps
                .get(2)
                .map(|m| {
                    RULE_ID
                        .find_iter(m.as_str())
                        .map(|id| id.as_str().to_uppercase())
                        .collect()
                })
                .unwrap_or_default();
            directives.push(Directive {
                line: line_at(sql, token.offset + whole.start()),
                file_wide: caps.get(1).is_some(),
                rules: if ids.is_empty() {
                    RuleSet::All
                } else {
                    RuleSet::Only(ids)
                },
            });
        }
    }
    directives
}

/// Directives resolved against the statements of a file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Suppressions {
    file: Option<RuleSet>,
    by_line: HashMap<usize, RuleSet>,
}

impl Suppressions {
    /// Attach the directives in `sql` to statements starting on
    /// `statement_lines` (ascending).
    pub fn resolve(sql: &str, statement_lines: &[usize]) -> Self {
        let mut suppressions = Self::default();
        for directive in parse_directives(sql) {
            if directive.file_wide {
                match &mut suppressions.file {
                    Some(set) => set.union(directive.rules),
                    None => suppressions.file = Some(directive.rules),
                }
                continue;
            }
            let Some(&line) = statement_lines.iter().find(|&&l| l >= directive.line) else {
                tracing::debug!(line = directive.line, "directive after last statement");
                continue;
            };
            match suppressions.by_line.get_mut(&line) {
                Some(set) => set.union(directive.rules),
                None => {
                    suppressions.by_line.insert(line, directive.rules);
                }
            }
        }
        suppressions
    }

    pub fn is_empty(&self) -> bool {
        self.file.is_none() && self.by_line.is_empty()
    }

    pub fn is_suppressed(&self, violation: &Violation) -> bool {
        let id = violation.rule_id.as_str();
        self.file.as_ref().is_some_and(|set| set.contains(id))
            || self
                .by_line
                .get(&violation.line)
                .is_some_and(|set| set.contains(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Severity;
    use pretty_assertions::assert_eq;

    fn only(ids: &[&str]) -> RuleSet {
        RuleSet::Only(ids.iter().map(|s| s.to_string()).collect())
    }

    fn violation(rule_id: &str, line: usize) -> Violation {
        Violation {
            rule_id: rule_id.to_string(),
            rule_name: String::new(),
            severity: Severity::Warning,
            message: String::new(),
            line,
            safe_alternative: None,
            span: None,
        }
    }

    #[test]
    fn test_parse_directives() {
        let sql = "-- migrationpilot-disable mp001, MP004\n\
                   /* MigrationPilot-Disable-File */\n\
                   SELECT '-- migrationpilot-disable MP002';\n\
                   -- just a comment";
        assert_eq!(
            parse_directives(sql),
            vec![
                Directive {
                    line: 1,
                    file_wide: false,
                    rules: only(&["MP001", "MP004"]),
                },
                Directive {
                    line: 2,
                    file_wide: true,
                    rules: RuleSet::All,
                },
            ]
        );
    }

    #[test]
    fn test_directive_attaches_to_next_statement() {
        let sql = "-- migrationpilot-disable MP001\n\
                   \n\
                   CREATE INDEX idx ON users (email);\n\
                   CREATE INDEX idx2 ON users (name);";
        let suppressions = Suppressions::resolve(sql, &[3, 4]);
        assert!(suppressions.is_suppressed(&violation("MP001", 3)));
        assert!(!suppressions.is_suppressed(&violation("MP004", 3)));
        assert!(!suppressions.is_suppressed(&violation("MP001", 4)));
    }

    #[test]
    fn test_multiple_directives_union() {
        let sql = "-- migrationpilot-disable MP001\n\
                   -- migrationpilot-disable MP004\n\
                   CREATE INDEX idx ON users (email);\n\
                   -- migrationpilot-disable-file MP017\n\
                   -- migrationpilot-disable-file";
        let suppressions = Suppressions::resolve(sql, &[3]);
        assert!(suppressions.is_suppressed(&violation("MP001", 3)));
        assert!(suppressions.is_suppressed(&violation("MP004", 3)));
        assert!(suppressions.is_suppressed(&violation("MP050", 10)));
    }

    #[test]
    fn test_no_directives() {
        let suppressions = Suppressions::resolve("CREATE INDEX i ON t (c);", &[1]);
        assert!(suppressions.is_empty());
    }
}
