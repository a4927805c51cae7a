//! Rules that only fire with a production snapshot.

use super::{BuiltinRule, RuleContext, RuleMeta, Severity, Violation};
use crate::ast::Statement;
use crate::lock::LockType;

pub(super) const RULES: &[BuiltinRule] = &[
    BuiltinRule::new(
        RuleMeta {
            id: "MP013",
            name: "high-traffic-table-ddl",
            severity: Severity::Warning,
            description: "Blocking DDL on a table that serves heavy query traffic.",
            why_it_matters: "Every query on the table queues behind the lock; on a hot table \
                the queue exhausts connection pools within seconds.",
        },
        high_traffic_table_ddl,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP014",
            name: "large-table-ddl",
            severity: Severity::Critical,
            description: "Long-held lock on a large table.",
            why_it_matters: "Rewrites and full scans scale with table size; on millions of \
                rows the lock is held for minutes.",
        },
        large_table_ddl,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP019",
            name: "no-exclusive-lock-high-connections",
            severity: Severity::Warning,
            description: "ACCESS EXCLUSIVE on a table with many active connections.",
            why_it_matters: "Each connection touching the table blocks, and with many of them \
                the pool runs dry before the lock is released.",
        },
        no_exclusive_lock_high_connections,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP072",
            name: "no-long-running-query-conflict",
            severity: Severity::Warning,
            description: "Blocking lock on a table with slow queries.",
            why_it_matters: "The DDL waits for running slow queries to finish, and everything \
                else queues behind it meanwhile.",
        },
        no_long_running_query_conflict,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP073",
            name: "ban-rewrite-heavily-indexed-table",
            severity: Severity::Warning,
            description: "Rewrite of a table with many indexes.",
            why_it_matters: "Every index is rebuilt as part of the rewrite, multiplying how \
                long the lock is held.",
        },
        ban_rewrite_heavily_indexed_table,
    ),
];

fn high_traffic_table_ddl(
    meta: &RuleMeta,
    _stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    ctx.affected_queries()?;
    let calls = ctx.facts.total_calls();
    if !ctx.lock.is_blocking() || calls < ctx.thresholds.high_traffic_calls {
        return None;
    }
    Some(
        meta.violation(
            ctx,
            format!(
                "{} blocks a table serving {} query calls.",
                ctx.lock.lock_type, calls
            ),
        )
        .with_alternative("Run during a low-traffic window with a short lock_timeout and retries."),
    )
}

fn large_table_ddl(meta: &RuleMeta, _stmt: &Statement, ctx: &RuleContext<'_>) -> Option<Violation> {
    let stats = ctx.table_stats()?;
    if !ctx.lock.long_held || stats.row_count < ctx.thresholds.large_table_rows {
        return None;
    }
    Some(
        meta.violation(
            ctx,
            format!(
                "{} is held for the whole operation on a table with {} rows.",
                ctx.lock.lock_type, stats.row_count
            ),
        )
        .with_alternative("Use an online pattern: new column or table, batched backfill, then swap."),
    )
}

fn no_exclusive_lock_high_connections(
    meta: &RuleMeta,
    _stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let connections = ctx.active_connections()?;
    if ctx.lock.lock_type != LockType::AccessExclusive
        || connections < ctx.thresholds.high_connection_count
    {
        return None;
    }
    Some(meta.violation(
        ctx,
        format!(
            "ACCESS EXCLUSIVE on a table with {} active connections.",
            connections
        ),
    ))
}

fn no_long_running_query_conflict(
    meta: &RuleMeta,
    _stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    if !ctx.lock.is_blocking() {
        return None;
    }
    let slow = ctx
        .affected_queries()?
        .iter()
        .find(|q| q.mean_exec_time_ms >= ctx.thresholds.slow_query_ms)?;
    Some(meta.violation(
        ctx,
        format!(
            "Query averaging {:.0}ms conflicts with {}: {}",
            slow.mean_exec_time_ms, ctx.lock.lock_type, slow.normalized_query
        ),
    ))
}

fn ban_rewrite_heavily_indexed_table(
    meta: &RuleMeta,
    _stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let stats = ctx.table_stats()?;
    if !ctx.lock.long_held || stats.index_count < ctx.thresholds.many_indexes {
        return None;
    }
    Some(meta.violation(
        ctx,
        format!(
            "Long-held {} on a table with {} indexes.",
            ctx.lock.lock_type, stats.index_count
        ),
    ))
}

#[cfg(test)]
mod tests {
    use crate::production::ProductionContext;
    use crate::rules::test_support::fired_with;

    fn snapshot() -> ProductionContext {
        ProductionContext::from_json(
            r#"{
                "tables": {"public.users": {"row_count": 5000000, "total_bytes": 1, "index_count": 12}},
                "queries": {"users": [
                    {"normalized_query": "SELECT * FROM users WHERE id = $1", "calls": 50000, "mean_exec_time_ms": 2.0},
                    {"normalized_query": "SELECT count(*) FROM users", "calls": 10, "mean_exec_time_ms": 4000.0}
                ]},
                "active_connections": {"users": 40}
            }"#,
        )
        .unwrap()
    }

    fn fired_in_prod(sql: &str) -> Vec<String> {
        let prod = snapshot();
        fired_with(sql, 17, Some(&prod))
            .into_iter()
            .map(|v| v.rule_id)
            .collect()
    }

    #[test]
    fn test_rewrite_on_busy_large_table() {
        let ids = fired_in_prod("ALTER TABLE users ALTER COLUMN email TYPE text;");
        for id in ["MP013", "MP014", "MP019", "MP072", "MP073"] {
            assert!(ids.iter().any(|fired| fired == id), "{id} missing from {ids:?}");
        }
    }

    #[test]
    fn test_short_lock_skips_size_rules() {
        let ids = fired_in_prod("ALTER TABLE users ALTER COLUMN email DROP DEFAULT;");
        assert!(ids.iter().any(|id| id == "MP013"));
        assert!(!ids.iter().any(|id| id == "MP014" || id == "MP073"));
    }

    #[test]
    fn test_silent_without_snapshot_or_match() {
        let sql = "ALTER TABLE users ALTER COLUMN email TYPE text;";
        let ids: Vec<String> = fired_with(sql, 17, None).into_iter().map(|v| v.rule_id).collect();
        assert!(!ids.iter().any(|id| id == "MP014"));
        let other = fired_in_prod("ALTER TABLE orders ALTER COLUMN total TYPE numeric;");
        assert!(!other.iter().any(|id| ["MP013", "MP014", "MP019"].contains(&id.as_str())));
    }
}
