//! Production snapshot.
//!
//! Read-only telemetry collected ahead of time (row counts from
//! `pg_class`, query stats from `pg_stat_statements`, connection counts from
//! `pg_stat_activity`) and loaded from JSON:
//!
//! ```json
//! {
//!   "tables": { "public.users": { "row_count": 5000000, "total_bytes": 1073741824, "index_count": 4 } },
//!   "queries": { "users": [ { "normalized_query": "SELECT ...", "calls": 120000, "mean_exec_time_ms": 0.4 } ] },
//!   "active_connections": { "users": 35 }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ast::Statement;
use crate::error::PilotResult;
use crate::targets::{extract_targets, TableTarget};

/// Size statistics for one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableStats {
    pub row_count: u64,
    pub total_bytes: u64,
    pub index_count: u32,
}

/// A query that touches a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffectedQuery {
    pub normalized_query: String,
    pub calls: u64,
    #[serde(default)]
    pub mean_exec_time_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
}

/// Telemetry keyed by `schema.table` or bare table name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductionContext {
    pub tables: HashMap<String, TableStats>,
    /// Queries per table, ranked by call count (descending).
    pub queries: HashMap<String, Vec<AffectedQuery>>,
    pub active_connections: HashMap<String, u32>,
}

/// Production facts for the primary table of one statement.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableFacts<'a> {
    pub table_stats: Option<&'a TableStats>,
    pub affected_queries: Option<&'a [AffectedQuery]>,
    pub active_connections: Option<u32>,
}

impl ProductionContext {
    /// Parse a snapshot and rank each table's queries by call count.
    pub fn from_json(text: &str) -> PilotResult<Self> {
        let mut ctx: Self = serde_json::from_str(text)?;
        for queries in ctx.queries.values_mut() {
            queries.sort_by(|a, b| b.calls.cmp(&a.calls));
        }
        tracing::debug!(
            tables = ctx.tables.len(),
            query_tables = ctx.queries.len(),
            "loaded production snapshot"
        );
        Ok(ctx)
    }

    pub fn load(path: &Path) -> PilotResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Look a table up as `schema.table` (`public` when unqualified), then
    /// by bare name.
    fn lookup<'a, T>(map: &'a HashMap<String, T>, target: &TableTarget) -> Option<&'a T> {
        let schema = target.schema.as_deref().unwrap_or("public");
        map.get(&format!("{}.{}", schema, target.table))
            .or_else(|| map.get(&target.table))
    }

    pub fn table_stats(&self, target: &TableTarget) -> Option<&TableStats> {
        Self::lookup(&self.tables, target)
    }

    pub fn affected_queries(&self, target: &TableTarget) -> Option<&[AffectedQuery]> {
        Self::lookup(&self.queries, target).map(Vec::as_slice)
    }

    pub fn active_connections(&self, target: &TableTarget) -> Option<u32> {
        Self::lookup(&self.active_connections, target).copied()
    }

    /// Facts for the first table `stmt` targets.
    pub fn facts(&self, stmt: &Statement) -> TableFacts<'_> {
        let targets = extract_targets(stmt);
        let Some(target) = targets.first() else {
            return TableFacts::default();
        };
        TableFacts {
            table_stats: self.table_stats(target),
            affected_queries: self.affected_queries(target),
            active_connections: self.active_connections(target),
        }
    }
}

impl<'a> TableFacts<'a> {
    /// Facts for `stmt`, or none without a snapshot.
    pub fn resolve(production: Option<&'a ProductionContext>, stmt: &Statement) -> Self {
        production.map(|p| p.facts(stmt)).unwrap_or_default()
    }

    /// Sum of call counts over all affected queries.
    pub fn total_calls(&self) -> u64 {
        self.affected_queries
            .map(|queries| queries.iter().map(|q| q.calls).fold(0u64, u64::saturating_add))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_sql;

    const SNAPSHOT: &str = r#"{
        "tables": {
            "public.users": { "row_count": 5000000, "total_bytes": 1073741824, "index_count": 4 },
            "orders": { "row_count": 200 }
        },
        "queries": {
            "users": [
                { "normalized_query": "UPDATE users SET seen = $1", "calls": 10 },
                { "normalized_query": "SELECT * FROM users WHERE id = $1", "calls": 90000, "mean_exec_time_ms": 0.3, "service_name": "api" }
            ]
        },
        "active_connections": { "users": 42 }
    }"#;

    #[test]
    fn test_queries_ranked_by_calls() {
        let ctx = ProductionContext::from_json(SNAPSHOT).unwrap();
        let queries = &ctx.queries["users"];
        assert_eq!(queries[0].calls, 90000);
        assert_eq!(queries[0].service_name.as_deref(), Some("api"));
        assert_eq!(queries[1].mean_exec_time_ms, 0.0);
    }

    #[test]
    fn test_facts_lookup_order() {
        let ctx = ProductionContext::from_json(SNAPSHOT).unwrap();
        let stmts = parse_sql("CREATE INDEX idx ON users (email); ALTER TABLE orders ADD x int;").unwrap();

        let facts = ctx.facts(&stmts[0].stmt);
        assert_eq!(facts.table_stats.unwrap().row_count, 5_000_000);
        assert_eq!(facts.total_calls(), 90_010);
        assert_eq!(facts.active_connections, Some(42));

        let facts = ctx.facts(&stmts[1].stmt);
        assert_eq!(facts.table_stats.unwrap().index_count, 0);
        assert!(facts.affected_queries.is_none());
    }

    #[test]
    fn test_total_calls_saturate() {
        let ctx = ProductionContext::from_json(&format!(
            r#"{{"queries": {{"users": [{{"normalized_query": "a", "calls": {max}}}, {{"normalized_query": "b", "calls": 7}}]}}}}"#,
            max = u64::MAX
        ))
        .unwrap();
        let stmts = parse_sql("VACUUM users;").unwrap();
        assert_eq!(ctx.facts(&stmts[0].stmt).total_calls(), u64::MAX);
    }

    #[test]
    fn test_malformed_snapshot() {
        assert!(ProductionContext::from_json("{\"tables\": []}").is_err());
    }
}
