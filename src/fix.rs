//! Mechanical rewrites for a subset of rules.
//!
//! Works on source text, not on the statement tree: a violation covers the
//! byte span of its statement, or without one, its start line through the
//! first `;`. Edits are collected first and applied in a single pass. The
//! output is not re-parsed.

use std::ops::Range;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;

use crate::rules::Violation;

/// Rules with an automatic fix, in the order fixes are applied.
pub const FIXABLE_RULES: &[&str] = &[
    "MP001", "MP004", "MP005", "MP009", "MP018", "MP020", "MP021", "MP032", "MP036", "MP039",
    "MP040",
];

const LOCK_TIMEOUT_SET: &str = "SET lock_timeout = '5s';";
const STATEMENT_TIMEOUT_SET: &str = "SET statement_timeout = '30s';";

static CONCURRENTLY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bCONCURRENTLY\b").unwrap());
static CREATE_INDEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(CREATE\s+(?:UNIQUE\s+)?INDEX)\b").unwrap());
static DROP_INDEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(DROP\s+INDEX)\b").unwrap());
static REINDEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(REINDEX\s+(?:\([^)]*\)\s*)?(?:INDEX|TABLE|SCHEMA|DATABASE))\b").unwrap()
});
static REFRESH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(REFRESH\s+MATERIALIZED\s+VIEW)\b").unwrap());
static NOT_VALID: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bNOT\s+VALID\b").unwrap());
static VARCHAR_N: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:VARCHAR|CHARACTER\s+VARYING)\s*\(\s*\d+\s*\)").unwrap()
});
static CHAR_N: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:CHAR|CHARACTER)\s*\(\s*\d+\s*\)").unwrap());
static TIMESTAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bTIMESTAMP\b(\s*\(\s*\d\s*\))?(\s+WITH(?:OUT)?\s+TIME\s+ZONE)?").unwrap()
});
static SET_LOCK_TIMEOUT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)(?:^|;)\s*(SET\s+(?:LOCAL\s+)?lock_timeout)\b").unwrap());
static SET_STATEMENT_TIMEOUT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)(?:^|;)\s*(SET\s+(?:LOCAL\s+)?statement_timeout)\b").unwrap());

/// Output of [`fix`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FixResult {
    pub fixed_sql: String,
    pub fixed_count: usize,
    /// Violations left for a human: rules without a fix, and fixes that
    /// found nothing to rewrite.
    pub unfixable: Vec<Violation>,
}

/// Add `CONCURRENTLY` to a CREATE INDEX, DROP INDEX, REINDEX or REFRESH
/// MATERIALIZED VIEW statement. Other text is returned unchanged.
pub fn inject_concurrently(sql: &str) -> String {
    if CONCURRENTLY.is_match(sql) {
        return sql.to_string();
    }
    for re in [&*CREATE_INDEX, &*DROP_INDEX, &*REINDEX, &*REFRESH] {
        if re.is_match(sql) {
            return re.replacen(sql, 1, "$1 CONCURRENTLY").into_owned();
        }
    }
    sql.to_string()
}

/// Replace `range` of the source with `text`. Empty ranges insert.
#[derive(Debug)]
struct Edit {
    range: Range<usize>,
    text: String,
}

/// A timeout setting: where the source already sets it, and where this run
/// inserted it.
#[derive(Debug, Default)]
struct Timeout {
    existing: Vec<usize>,
    inserted: Option<usize>,
}

impl Timeout {
    fn scan(source: &str, re: &Regex) -> Self {
        let existing = re
            .captures_iter(source)
            .filter_map(|caps| caps.get(1).map(|m| m.start()))
            .collect();
        Self {
            existing,
            inserted: None,
        }
    }
}

/// The source with pending edits.
struct Document<'a> {
    source: &'a str,
    edits: Vec<Edit>,
    lock_timeout: Timeout,
    statement_timeout: Timeout,
}

impl<'a> Document<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            edits: Vec::new(),
            lock_timeout: Timeout::scan(source, &SET_LOCK_TIMEOUT),
            statement_timeout: Timeout::scan(source, &SET_STATEMENT_TIMEOUT),
        }
    }

    /// Byte range the violation covers: its statement span, or from its
    /// line through the next `;`.
    fn statement_range(&self, violation: &Violation) -> Option<Range<usize>> {
        let source = self.source;
        if let Some(span) = violation.span.clone().filter(|span| {
            span.start <= span.end
                && span.end <= source.len()
                && source.is_char_boundary(span.start)
                && source.is_char_boundary(span.end)
        }) {
            return Some(span);
        }

        let line_start = source
            .split_inclusive('\n')
            .scan(0, |offset, line| {
                let start = *offset;
                *offset += line.len();
                Some(start)
            })
            .nth(violation.line.checked_sub(1)?)?;
        let rest = &source[line_start..];
        let start = line_start + (rest.len() - rest.trim_start().len());
        let end = source[start..].find(';').map_or(source.len(), |i| start + i);
        Some(start..end)
    }

    /// Queue an edit unless it overlaps one already queued.
    fn push(&mut self, range: Range<usize>, text: impl Into<String>) -> bool {
        let overlaps = self
            .edits
            .iter()
            .any(|e| e.range.start < range.end && range.start < e.range.end);
        if overlaps {
            return false;
        }
        self.edits.push(Edit {
            range,
            text: text.into(),
        });
        true
    }

    /// Inject `CONCURRENTLY` after the first match of `re` in `range`.
    fn add_concurrently(&mut self, range: Range<usize>, re: &Regex) -> bool {
        let source = self.source;
        let text = &source[range.clone()];
        if CONCURRENTLY.is_match(text) {
            return false;
        }
        match re.captures(text).and_then(|caps| caps.get(1)) {
            Some(keyword) => {
                let at = range.start + keyword.end();
                self.push(at..at, " CONCURRENTLY")
            }
            None => false,
        }
    }

    /// Append ` NOT VALID` at the end of the statement.
    fn append_not_valid(&mut self, range: Range<usize>) -> bool {
        if NOT_VALID.is_match(&self.source[range.clone()]) {
            return false;
        }
        self.push(range.end..range.end, " NOT VALID")
    }

    /// Replace every match of `re` in `range` that `rewrite` changes.
    fn rewrite_matches(
        &mut self,
        range: Range<usize>,
        re: &Regex,
        rewrite: impl Fn(&Captures) -> String,
    ) -> bool {
        let source = self.source;
        let text = &source[range.clone()];
        let replacements: Vec<(Range<usize>, String)> = re
            .captures_iter(text)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let new = rewrite(&caps);
                (new != whole.as_str())
                    .then(|| (range.start + whole.start()..range.start + whole.end(), new))
            })
            .collect();
        let mut changed = false;
        for (at, new) in replacements {
            changed |= self.push(at, new);
        }
        changed
    }

    /// Put `set` in front of the statement at `start`, unless a setting
    /// already applies there. An earlier setting from the source that is
    /// still flagged was disabled, and is left for a human.
    fn insert_timeout(&mut self, start: usize, set: &'static str, lock: bool) -> bool {
        let timeout = if lock {
            &self.lock_timeout
        } else {
            &self.statement_timeout
        };
        let last_existing = timeout.existing.iter().copied().filter(|&at| at < start).max();
        match (timeout.inserted, last_existing) {
            (Some(at), existing) if at <= start && existing.is_none_or(|e| e < at) => true,
            (Some(_), _) | (None, Some(_)) => false,
            (None, None) => {
                let source = self.source;
                let line_start = source[..start].rfind('\n').map_or(0, |i| i + 1);
                let prefix = &source[line_start..start];
                let text = if prefix.trim().is_empty() {
                    format!("{}\n{}", set, prefix)
                } else {
                    format!("{}\n", set)
                };
                if !self.push(start..start, text) {
                    return false;
                }
                let timeout = if lock {
                    &mut self.lock_timeout
                } else {
                    &mut self.statement_timeout
                };
                timeout.inserted = Some(start);
                true
            }
        }
    }

    fn apply(&mut self, violation: &Violation) -> bool {
        let Some(range) = self.statement_range(violation) else {
            return false;
        };
        match violation.rule_id.as_str() {
            "MP001" => self.add_concurrently(range, &CREATE_INDEX),
            "MP009" => self.add_concurrently(range, &DROP_INDEX),
            "MP021" => self.add_concurrently(range, &REINDEX),
            "MP032" => self.add_concurrently(range, &REFRESH),
            "MP004" => self.insert_timeout(range.start, LOCK_TIMEOUT_SET, true),
            "MP020" => self.insert_timeout(range.start, STATEMENT_TIMEOUT_SET, false),
            "MP005" | "MP018" => self.append_not_valid(range),
            "MP036" => self.rewrite_matches(range, &VARCHAR_N, |_| "TEXT".to_string()),
            "MP040" => self.rewrite_matches(range, &CHAR_N, |_| "TEXT".to_string()),
            "MP039" => self.rewrite_matches(range, &TIMESTAMP, timestamptz),
            _ => false,
        }
    }

    fn render(mut self) -> String {
        // Stable: insertions at one point keep their queue order.
        self.edits.sort_by_key(|e| (e.range.start, e.range.end));
        let mut out = String::with_capacity(self.source.len() + 64);
        let mut copied = 0;
        for edit in &self.edits {
            out.push_str(&self.source[copied..edit.range.start]);
            out.push_str(&edit.text);
            copied = edit.range.end;
        }
        out.push_str(&self.source[copied..]);
        out
    }
}

/// `TIMESTAMP [(p)] [WITHOUT TIME ZONE]` becomes `TIMESTAMPTZ [(p)]`;
/// `WITH TIME ZONE` is left alone.
fn timestamptz(caps: &Captures) -> String {
    let zone = caps.get(2).map(|m| m.as_str().trim_start().to_ascii_uppercase());
    if zone.as_deref().is_some_and(|z| !z.starts_with("WITHOUT")) {
        return caps[0].to_string();
    }
    let precision = caps.get(1).map_or("", |m| m.as_str().trim_start());
    format!("TIMESTAMPTZ{}", precision)
}

/// Rewrite `source` to resolve the fixable `violations`.
///
/// Fixes run in [`FIXABLE_RULES`] order, then in source order. Timeout
/// settings are inserted once, before the first statement that needs them;
/// a `SET` further down the file does not count. A fix that would change
/// nothing is reported as unfixable.
pub fn fix(source: &str, violations: &[Violation]) -> FixResult {
    let mut doc = Document::new(source);

    let (mut fixable, mut unfixable): (Vec<&Violation>, Vec<&Violation>) = violations
        .iter()
        .partition(|v| FIXABLE_RULES.contains(&v.rule_id.as_str()));
    fixable.sort_by_key(|v| {
        let order = FIXABLE_RULES.iter().position(|id| *id == v.rule_id);
        (order, v.line, v.span.as_ref().map(|s| s.start))
    });

    let mut fixed_count = 0;
    for violation in fixable {
        if doc.apply(violation) {
            tracing::debug!(rule = %violation.rule_id, line = violation.line, "applied fix");
            fixed_count += 1;
        } else {
            unfixable.push(violation);
        }
    }
    unfixable.sort_by_key(|v| v.line);

    tracing::info!(fixed = fixed_count, remaining = unfixable.len(), "auto-fix finished");
    FixResult {
        fixed_sql: doc.render(),
        fixed_count,
        unfixable: unfixable.into_iter().cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Severity;
    use pretty_assertions::assert_eq;

    fn violation(rule_id: &str, line: usize) -> Violation {
        Violation {
            rule_id: rule_id.to_string(),
            rule_name: String::new(),
            severity: Severity::Critical,
            message: String::new(),
            line,
            safe_alternative: None,
            span: None,
        }
    }

    /// A violation on the statement text `stmt` inside `source`.
    fn spanned(rule_id: &str, source: &str, stmt: &str) -> Violation {
        let start = source.find(stmt).unwrap();
        Violation {
            span: Some(start..start + stmt.len()),
            ..violation(rule_id, crate::parser::line_at(source, start))
        }
    }

    #[test]
    fn test_inject_concurrently() {
        assert_eq!(
            inject_concurrently("CREATE UNIQUE INDEX idx ON t (c)"),
            "CREATE UNIQUE INDEX CONCURRENTLY idx ON t (c)"
        );
        assert_eq!(
            inject_concurrently("reindex table users"),
            "reindex table CONCURRENTLY users"
        );
        assert_eq!(
            inject_concurrently("CREATE INDEX CONCURRENTLY i ON t (c)"),
            "CREATE INDEX CONCURRENTLY i ON t (c)"
        );
    }

    #[test]
    fn test_concurrently_and_timeout() {
        let source = "CREATE INDEX idx ON users (email);\nDROP INDEX old_idx;";
        let result = fix(
            source,
            &[violation("MP001", 1), violation("MP004", 1), violation("MP009", 2), violation("MP004", 2)],
        );
        assert_eq!(
            result.fixed_sql,
            "SET lock_timeout = '5s';\nCREATE INDEX CONCURRENTLY idx ON users (email);\nDROP INDEX CONCURRENTLY old_idx;"
        );
        assert_eq!(result.fixed_count, 4);
        assert!(result.unfixable.is_empty());
    }

    #[test]
    fn test_timeout_keeps_indent() {
        let source = "BEGIN;\n    ALTER TABLE users DROP COLUMN bio;\nCOMMIT;";
        let result = fix(source, &[violation("MP004", 2), violation("MP020", 2)]);
        assert_eq!(
            result.fixed_sql,
            "BEGIN;\n    SET lock_timeout = '5s';\n    SET statement_timeout = '30s';\n    ALTER TABLE users DROP COLUMN bio;\nCOMMIT;"
        );
        assert_eq!(result.fixed_count, 2);
    }

    #[test]
    fn test_not_valid_spans_lines() {
        let source = "ALTER TABLE orders\n  ADD CONSTRAINT fk FOREIGN KEY (user_id)\n  REFERENCES users (id);\nSELECT 1;";
        let result = fix(source, &[violation("MP005", 1)]);
        assert_eq!(
            result.fixed_sql,
            "ALTER TABLE orders\n  ADD CONSTRAINT fk FOREIGN KEY (user_id)\n  REFERENCES users (id) NOT VALID;\nSELECT 1;"
        );
    }

    #[test]
    fn test_type_rewrites() {
        let source = "CREATE TABLE t (\n  a varchar(20),\n  b char(2),\n  c timestamp(3) without time zone,\n  d timestamp with time zone,\n  e timestamptz DEFAULT current_timestamp\n);";
        let result = fix(
            source,
            &[violation("MP036", 1), violation("MP040", 1), violation("MP039", 1)],
        );
        assert_eq!(
            result.fixed_sql,
            "CREATE TABLE t (\n  a TEXT,\n  b TEXT,\n  c TIMESTAMPTZ(3),\n  d timestamp with time zone,\n  e timestamptz DEFAULT current_timestamp\n);"
        );
        assert_eq!(result.fixed_count, 3);
    }

    #[test]
    fn test_earlier_timeout_is_not_inserted_again() {
        let source = "SET lock_timeout = '2s';\nDROP TABLE users;";
        let result = fix(source, &[violation("MP026", 2), violation("MP004", 2)]);
        assert_eq!(result.fixed_sql, source);
        assert_eq!(result.fixed_count, 0);
        let ids: Vec<&str> = result.unfixable.iter().map(|v| v.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["MP026", "MP004"]);
    }

    #[test]
    fn test_later_timeout_does_not_count() {
        let source = "ALTER TABLE users DROP COLUMN bio;\nSET lock_timeout = '5s';";
        let result = fix(source, &[violation("MP004", 1)]);
        assert_eq!(
            result.fixed_sql,
            "SET lock_timeout = '5s';\nALTER TABLE users DROP COLUMN bio;\nSET lock_timeout = '5s';"
        );
        assert_eq!(result.fixed_count, 1);
        assert!(result.unfixable.is_empty());
    }

    #[test]
    fn test_statements_sharing_a_line() {
        let source = "CREATE INDEX a ON t (x); CREATE INDEX b ON t (y);";
        let result = fix(
            source,
            &[
                spanned("MP001", source, "CREATE INDEX a ON t (x)"),
                spanned("MP001", source, "CREATE INDEX b ON t (y)"),
            ],
        );
        assert_eq!(
            result.fixed_sql,
            "CREATE INDEX CONCURRENTLY a ON t (x); CREATE INDEX CONCURRENTLY b ON t (y);"
        );
        assert_eq!(result.fixed_count, 2);
    }

    #[test]
    fn test_fix_that_changes_nothing_is_not_counted() {
        let source = "ALTER TABLE t ADD CONSTRAINT c CHECK (n > 0) NOT VALID;";
        let result = fix(source, &[spanned("MP018", source, &source[..source.len() - 1])]);
        assert_eq!(result.fixed_sql, source);
        assert_eq!(result.fixed_count, 0);
        assert_eq!(result.unfixable.len(), 1);
    }

    #[test]
    fn test_fix_is_idempotent_on_its_output() {
        let source = "CREATE INDEX idx ON users (email);";
        let once = fix(source, &[violation("MP001", 1)]);
        let twice = fix(&once.fixed_sql, &[violation("MP001", 1)]);
        assert_eq!(once.fixed_sql, twice.fixed_sql);
        assert_eq!(once.fixed_count, 1);
        assert_eq!(twice.fixed_count, 0);
    }
}
