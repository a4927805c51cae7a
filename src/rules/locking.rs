//! Rules about the locks a statement takes and how long it holds them.

use super::{alter_cmds, BuiltinRule, RuleContext, RuleMeta, Severity, Violation};
use crate::ast::*;
use crate::fix::inject_concurrently;

pub(super) const RULES: &[BuiltinRule] = &[
    BuiltinRule::new(
        RuleMeta {
            id: "MP001",
            name: "require-concurrent-index",
            severity: Severity::Critical,
            description: "CREATE INDEX on an existing table must use CONCURRENTLY.",
            why_it_matters: "A plain CREATE INDEX holds a SHARE lock for the whole build, \
                blocking every INSERT, UPDATE and DELETE on the table.",
        },
        require_concurrent_index,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP004",
            name: "require-lock-timeout",
            severity: Severity::Critical,
            description: "Set lock_timeout before taking a blocking lock on an existing table.",
            why_it_matters: "A DDL statement waiting for its lock queues every later query \
                behind it. Without lock_timeout one long transaction stalls the whole table.",
        },
        require_lock_timeout,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP006",
            name: "no-vacuum-full",
            severity: Severity::Critical,
            description: "VACUUM FULL rewrites the table under ACCESS EXCLUSIVE.",
            why_it_matters: "Reads and writes are blocked until the rewrite finishes. \
                pg_repack reclaims space without the long lock.",
        },
        no_vacuum_full,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP009",
            name: "require-drop-index-concurrently",
            severity: Severity::Warning,
            description: "DROP INDEX should use CONCURRENTLY.",
            why_it_matters: "A plain DROP INDEX takes ACCESS EXCLUSIVE on the parent table.",
        },
        require_drop_index_concurrently,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP020",
            name: "require-statement-timeout",
            severity: Severity::Warning,
            description: "Set statement_timeout before an operation that holds its lock for long.",
            why_it_matters: "A rewrite or full scan on a large table can run for hours while \
                holding its lock. statement_timeout bounds the damage.",
        },
        require_statement_timeout,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP021",
            name: "require-concurrent-reindex",
            severity: Severity::Warning,
            description: "REINDEX should use CONCURRENTLY on PostgreSQL 12 and later.",
            why_it_matters: "A plain REINDEX blocks writes for the whole rebuild.",
        },
        require_concurrent_reindex,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP031",
            name: "ban-cluster",
            severity: Severity::Critical,
            description: "CLUSTER rewrites the table under ACCESS EXCLUSIVE.",
            why_it_matters: "The table is unreadable and unwritable for the whole rewrite.",
        },
        ban_cluster,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP032",
            name: "require-concurrent-refresh-matview",
            severity: Severity::Warning,
            description: "REFRESH MATERIALIZED VIEW should use CONCURRENTLY.",
            why_it_matters: "A plain refresh blocks reads of the view until it completes.",
        },
        require_concurrent_refresh_matview,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP045",
            name: "require-concurrent-detach-partition",
            severity: Severity::Warning,
            description: "DETACH PARTITION should use CONCURRENTLY on PostgreSQL 14 and later.",
            why_it_matters: "A plain detach takes ACCESS EXCLUSIVE on the partitioned table.",
        },
        require_concurrent_detach_partition,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP049",
            name: "prefer-hnsw-over-ivfflat",
            severity: Severity::Warning,
            description: "Prefer HNSW over IVFFlat for pgvector indexes.",
            why_it_matters: "IVFFlat lists are fixed at build time, so recall degrades as the \
                data changes and the index has to be rebuilt.",
        },
        prefer_hnsw_over_ivfflat,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP050",
            name: "ban-explicit-lock-table",
            severity: Severity::Warning,
            description: "Avoid explicit LOCK TABLE in migrations.",
            why_it_matters: "The lock lasts until the transaction ends and queues every \
                conflicting query behind it.",
        },
        ban_explicit_lock_table,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP060",
            name: "ban-reindex-database",
            severity: Severity::Critical,
            description: "Do not REINDEX a whole schema, database or system catalog in a migration.",
            why_it_matters: "Every index in scope is rebuilt, each under a write-blocking lock.",
        },
        ban_reindex_database,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP076",
            name: "ban-hash-index-before-pg10",
            severity: Severity::Critical,
            description: "Hash indexes are not crash-safe before PostgreSQL 10.",
            why_it_matters: "Hash indexes were not WAL-logged, so they are lost after a crash \
                and never reach replicas.",
        },
        ban_hash_index_before_pg10,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP077",
            name: "ban-concurrent-index-on-partitioned-table",
            severity: Severity::Critical,
            description: "CREATE INDEX CONCURRENTLY is not supported on partitioned tables.",
            why_it_matters: "The statement fails. Build the index concurrently on each partition, \
                then create it ON ONLY the parent and attach the partition indexes.",
        },
        ban_concurrent_index_on_partitioned_table,
    ),
];

fn require_concurrent_index(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let Statement::CreateIndex(idx) = stmt else {
        return None;
    };
    if idx.concurrently || ctx.table_created_in_file(&idx.table) {
        return None;
    }
    Some(
        meta.violation(
            ctx,
            format!(
                "CREATE INDEX on \"{}\" without CONCURRENTLY blocks writes for the whole build.",
                idx.table
            ),
        )
        .with_alternative(format!("{};", inject_concurrently(ctx.sql))),
    )
}

fn require_lock_timeout(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    if !ctx.lock.is_blocking() || ctx.has_lock_timeout() || !ctx.targets_existing_table(stmt) {
        return None;
    }
    Some(
        meta.violation(
            ctx,
            format!(
                "{} takes {} without a lock_timeout; a blocked lock request queues all later queries.",
                stmt.kind(),
                ctx.lock.lock_type
            ),
        )
        .with_alternative(format!("SET lock_timeout = '5s';\n{};", ctx.sql)),
    )
}

fn no_vacuum_full(meta: &RuleMeta, stmt: &Statement, ctx: &RuleContext<'_>) -> Option<Violation> {
    match stmt {
        Statement::Vacuum(v) if v.full => Some(
            meta.violation(ctx, "VACUUM FULL rewrites the table under ACCESS EXCLUSIVE.")
                .with_alternative("Use pg_repack to reclaim space online, or plain VACUUM."),
        ),
        _ => None,
    }
}

fn require_drop_index_concurrently(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let Statement::Drop(drop) = stmt else {
        return None;
    };
    if drop.object_type != ObjectType::Index || drop.concurrently {
        return None;
    }
    let names: Vec<String> = drop.names.iter().map(|n| n.to_string()).collect();
    Some(
        meta.violation(ctx, "DROP INDEX without CONCURRENTLY takes ACCESS EXCLUSIVE on the table.")
            .with_alternative(format!(
                "DROP INDEX CONCURRENTLY {}{};",
                if drop.if_exists { "IF EXISTS " } else { "" },
                names.join(", ")
            )),
    )
}

fn require_statement_timeout(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    if !ctx.lock.long_held || ctx.has_statement_timeout() || !ctx.targets_existing_table(stmt) {
        return None;
    }
    Some(
        meta.violation(
            ctx,
            format!(
                "{} holds {} for its whole run without a statement_timeout.",
                stmt.kind(),
                ctx.lock.lock_type
            ),
        )
        .with_alternative(format!("SET statement_timeout = '30s';\n{};", ctx.sql)),
    )
}

fn require_concurrent_reindex(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let Statement::Reindex(reindex) = stmt else {
        return None;
    };
    if reindex.concurrently || ctx.pg_version < 12 || reindex.target == ReindexTarget::System {
        return None;
    }
    Some(
        meta.violation(ctx, "REINDEX without CONCURRENTLY blocks writes during the rebuild.")
            .with_alternative(format!("{};", inject_concurrently(ctx.sql))),
    )
}

fn ban_cluster(meta: &RuleMeta, stmt: &Statement, ctx: &RuleContext<'_>) -> Option<Violation> {
    let Statement::Cluster(cluster) = stmt else {
        return None;
    };
    let target = cluster
        .table
        .as_ref()
        .map_or_else(|| "every clustered table".to_string(), |t| format!("\"{}\"", t));
    Some(
        meta.violation(
            ctx,
            format!("CLUSTER rewrites {} under ACCESS EXCLUSIVE.", target),
        )
        .with_alternative("Use pg_repack --order-by to reorder rows online."),
    )
}

fn require_concurrent_refresh_matview(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    match stmt {
        Statement::RefreshMaterializedView(refresh) if !refresh.concurrently => Some(
            meta.violation(
                ctx,
                format!(
                    "REFRESH MATERIALIZED VIEW \"{}\" blocks reads until it completes.",
                    refresh.name
                ),
            )
            .with_alternative(format!(
                "REFRESH MATERIALIZED VIEW CONCURRENTLY {}; -- requires a unique index on the view",
                refresh.name
            )),
        ),
        _ => None,
    }
}

fn require_concurrent_detach_partition(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    if ctx.pg_version < 14 {
        return None;
    }
    alter_cmds(stmt).iter().find_map(|cmd| match cmd {
        AlterTableCmd::DetachPartition {
            partition,
            concurrently: false,
        } => Some(
            meta.violation(
                ctx,
                format!("DETACH PARTITION \"{}\" without CONCURRENTLY.", partition),
            )
            .with_alternative(format!(
                "ALTER TABLE ... DETACH PARTITION {} CONCURRENTLY; -- outside a transaction block",
                partition
            )),
        ),
        _ => None,
    })
}

fn prefer_hnsw_over_ivfflat(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    match stmt {
        Statement::CreateIndex(idx) if idx.method.as_deref() == Some("ivfflat") => Some(
            meta.violation(ctx, "IVFFlat index; HNSW gives better recall without retraining.")
                .with_alternative("CREATE INDEX CONCURRENTLY ... USING hnsw (embedding vector_cosine_ops);"),
        ),
        _ => None,
    }
}

fn ban_explicit_lock_table(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let Statement::LockTable(lock) = stmt else {
        return None;
    };
    let names: Vec<String> = lock.tables.iter().map(|t| t.to_string()).collect();
    Some(meta.violation(
        ctx,
        format!(
            "Explicit LOCK TABLE {} holds {} until the transaction ends.",
            names.join(", "),
            ctx.lock.lock_type
        ),
    ))
}

fn ban_reindex_database(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let Statement::Reindex(reindex) = stmt else {
        return None;
    };
    let scope = match reindex.target {
        ReindexTarget::Schema => "SCHEMA",
        ReindexTarget::Database => "DATABASE",
        ReindexTarget::System => "SYSTEM",
        ReindexTarget::Index | ReindexTarget::Table => return None,
    };
    Some(
        meta.violation(ctx, format!("REINDEX {} rebuilds every index in scope.", scope))
            .with_alternative("REINDEX INDEX CONCURRENTLY <index>; -- one index at a time"),
    )
}

fn ban_hash_index_before_pg10(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    match stmt {
        Statement::CreateIndex(idx)
            if ctx.pg_version < 10 && idx.method.as_deref() == Some("hash") =>
        {
            Some(
                meta.violation(
                    ctx,
                    format!(
                        "Hash index on \"{}\" is not WAL-logged on PostgreSQL {}.",
                        idx.table, ctx.pg_version
                    ),
                )
                .with_alternative("Use a btree index."),
            )
        }
        _ => None,
    }
}

fn ban_concurrent_index_on_partitioned_table(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    match stmt {
        Statement::CreateIndex(idx)
            if idx.concurrently && ctx.is_partitioned_in_file(&idx.table) =>
        {
            Some(
                meta.violation(
                    ctx,
                    format!(
                        "\"{}\" is partitioned; CREATE INDEX CONCURRENTLY fails on it.",
                        idx.table
                    ),
                )
                .with_alternative(
                    "CREATE INDEX ... ON ONLY parent; then CREATE INDEX CONCURRENTLY on each \
                     partition and ALTER INDEX ... ATTACH PARTITION.",
                ),
            )
        }
        _ => None,
    }
}
