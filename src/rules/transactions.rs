//! Transaction structure and session settings.

use super::{alter_table, BuiltinRule, RuleContext, RuleMeta, Severity, Violation};
use crate::ast::*;

pub(super) const RULES: &[BuiltinRule] = &[
    BuiltinRule::new(
        RuleMeta {
            id: "MP008",
            name: "no-multi-ddl-transaction",
            severity: Severity::Warning,
            description: "Several DDL statements in one transaction.",
            why_it_matters: "Locks are held until COMMIT, so every lock taken earlier in the \
                transaction is held while later statements wait and run.",
        },
        no_multi_ddl_transaction,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP012",
            name: "no-enum-add-value-in-transaction",
            severity: Severity::Warning,
            description: "ALTER TYPE ... ADD VALUE inside a transaction block.",
            why_it_matters: "Before PostgreSQL 12 it fails outright; afterwards the new value \
                cannot be used until the transaction commits.",
        },
        no_enum_add_value_in_transaction,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP025",
            name: "ban-concurrent-in-transaction",
            severity: Severity::Critical,
            description: "CONCURRENTLY cannot run inside a transaction block.",
            why_it_matters: "PostgreSQL rejects the statement and the migration fails.",
        },
        ban_concurrent_in_transaction,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP053",
            name: "ban-uncommitted-transaction",
            severity: Severity::Critical,
            description: "BEGIN without a matching COMMIT or ROLLBACK.",
            why_it_matters: "The transaction stays open after the file ends, holding every \
                lock it took until the session closes.",
        },
        ban_uncommitted_transaction,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP054",
            name: "no-dml-after-ddl-in-transaction",
            severity: Severity::Warning,
            description: "Data changes after DDL in the same transaction.",
            why_it_matters: "The DDL locks stay held while the data change runs, which can \
                take far longer than the schema change itself.",
        },
        no_dml_after_ddl_in_transaction,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP055",
            name: "ban-vacuum-in-transaction",
            severity: Severity::Critical,
            description: "VACUUM cannot run inside a transaction block.",
            why_it_matters: "PostgreSQL rejects the statement and the migration fails.",
        },
        ban_vacuum_in_transaction,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP056",
            name: "no-disabled-statement-timeout",
            severity: Severity::Warning,
            description: "statement_timeout set to 0.",
            why_it_matters: "Nothing bounds how long the following statements hold their locks.",
        },
        no_disabled_statement_timeout,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP057",
            name: "require-short-lock-timeout",
            severity: Severity::Warning,
            description: "lock_timeout disabled or set too high.",
            why_it_matters: "While a DDL statement waits for its lock, every query behind it \
                waits too; the timeout caps that stall.",
        },
        require_short_lock_timeout,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP058",
            name: "prefer-set-local-in-transaction",
            severity: Severity::Warning,
            description: "Session-level SET inside a transaction block.",
            why_it_matters: "The setting outlives the transaction and leaks into whatever the \
                pooled connection runs next.",
        },
        prefer_set_local_in_transaction,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP074",
            name: "no-validate-in-same-transaction",
            severity: Severity::Warning,
            description: "VALIDATE CONSTRAINT in the transaction that added it NOT VALID.",
            why_it_matters: "The ACCESS EXCLUSIVE lock from ADD CONSTRAINT is still held during \
                validation, which defeats the point of NOT VALID.",
        },
        no_validate_in_same_transaction,
    ),
];

fn no_multi_ddl_transaction(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    if !stmt.is_ddl() {
        return None;
    }
    let earlier = ctx
        .transaction_statements()
        .iter()
        .filter(|s| s.stmt().is_ddl())
        .count();
    if earlier == 0 {
        return None;
    }
    Some(
        meta.violation(
            ctx,
            format!(
                "{} follows {} other DDL statement(s) in the same transaction.",
                stmt.kind(),
                earlier
            ),
        )
        .with_alternative("Give each DDL statement its own transaction."),
    )
}

fn no_enum_add_value_in_transaction(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let Statement::AlterEnum(AlterEnum {
        name,
        action: AlterEnumAction::AddValue { value, .. },
    }) = stmt
    else {
        return None;
    };
    if !ctx.in_transaction() {
        return None;
    }
    let violation = meta.violation(
        ctx,
        format!("ALTER TYPE {} ADD VALUE '{}' inside a transaction.", name, value),
    );
    let violation = if ctx.pg_version < 12 {
        violation.with_severity(Severity::Critical)
    } else {
        violation
    };
    Some(violation.with_alternative("Run ALTER TYPE ... ADD VALUE outside BEGIN/COMMIT."))
}

/// What runs `CONCURRENTLY` in this statement, if anything.
fn concurrent_operation(stmt: &Statement) -> Option<&'static str> {
    match stmt {
        Statement::CreateIndex(idx) if idx.concurrently => Some("CREATE INDEX CONCURRENTLY"),
        Statement::Drop(drop) if drop.concurrently => Some("DROP INDEX CONCURRENTLY"),
        Statement::Reindex(reindex) if reindex.concurrently => Some("REINDEX CONCURRENTLY"),
        Statement::RefreshMaterializedView(refresh) if refresh.concurrently => {
            Some("REFRESH MATERIALIZED VIEW CONCURRENTLY")
        }
        Statement::AlterTable(alter) => alter.cmds.iter().find_map(|cmd| match cmd {
            AlterTableCmd::DetachPartition {
                concurrently: true, ..
            } => Some("DETACH PARTITION CONCURRENTLY"),
            _ => None,
        }),
        _ => None,
    }
}

fn ban_concurrent_in_transaction(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let operation = concurrent_operation(stmt)?;
    if !ctx.in_transaction() {
        return None;
    }
    Some(
        meta.violation(ctx, format!("{operation} cannot run inside a transaction block."))
            .with_alternative("Move the statement out of BEGIN/COMMIT, or run the migration without a wrapping transaction."),
    )
}

fn ban_uncommitted_transaction(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    if !matches!(stmt, Statement::Transaction(TransactionKind::Begin)) {
        return None;
    }
    let closed = ctx.statements[ctx.index + 1..].iter().any(|s| {
        matches!(s.stmt(), Statement::Transaction(kind) if kind.ends_transaction())
    });
    if closed {
        return None;
    }
    Some(
        meta.violation(ctx, "BEGIN is never followed by COMMIT or ROLLBACK.")
            .with_alternative("End the file with COMMIT;"),
    )
}

fn no_dml_after_ddl_in_transaction(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    if !stmt.is_dml() {
        return None;
    }
    let ddl = ctx
        .transaction_statements()
        .iter()
        .find(|s| s.stmt().is_ddl())?;
    Some(
        meta.violation(
            ctx,
            format!(
                "{} runs while locks from {} on line {} are still held.",
                stmt.kind(),
                ddl.stmt().kind(),
                ddl.parsed.line
            ),
        )
        .with_alternative("Commit the schema change first and move the data change to its own transaction."),
    )
}

fn ban_vacuum_in_transaction(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    if !matches!(stmt, Statement::Vacuum(_)) || !ctx.in_transaction() {
        return None;
    }
    Some(meta.violation(ctx, "VACUUM cannot run inside a transaction block."))
}

fn variable_set<'s>(stmt: &'s Statement, name: &str) -> Option<&'s VariableSet> {
    match stmt {
        Statement::VariableSet(set) if set.name == name => Some(set),
        _ => None,
    }
}

fn no_disabled_statement_timeout(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let set = variable_set(stmt, "statement_timeout")?;
    if set.is_reset() || set.duration_ms() != Some(0) {
        return None;
    }
    Some(
        meta.violation(ctx, "statement_timeout is disabled.")
            .with_alternative("SET statement_timeout = '30s';"),
    )
}

fn require_short_lock_timeout(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let set = variable_set(stmt, "lock_timeout")?;
    if set.is_reset() {
        return None;
    }
    let max = ctx.thresholds.max_lock_timeout_ms;
    let message = match set.duration_ms()? {
        0 => "lock_timeout is disabled.".to_string(),
        ms if ms > max => format!("lock_timeout of {ms}ms exceeds the {max}ms maximum."),
        _ => return None,
    };
    Some(meta.violation(ctx, message).with_alternative("SET lock_timeout = '5s';"))
}

fn prefer_set_local_in_transaction(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let Statement::VariableSet(set) = stmt else {
        return None;
    };
    if set.local || !ctx.in_transaction() {
        return None;
    }
    Some(
        meta.violation(ctx, format!("SET {} inside a transaction outlives it.", set.name))
            .with_alternative(format!("SET LOCAL {} = '{}';", set.name, set.value)),
    )
}

fn no_validate_in_same_transaction(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let alter = alter_table(stmt)?;
    let name = alter.cmds.iter().find_map(|cmd| match cmd {
        AlterTableCmd::ValidateConstraint { name }
            if ctx.added_not_valid_in_transaction(&alter.table, name) =>
        {
            Some(name)
        }
        _ => None,
    })?;
    Some(
        meta.violation(
            ctx,
            format!("Constraint \"{}\" is validated in the transaction that added it.", name),
        )
        .with_alternative("COMMIT after adding the constraint NOT VALID, then VALIDATE in a new transaction."),
    )
}

#[cfg(test)]
mod tests {
    use crate::rules::test_support::{fired_with, fires, violation};
    use crate::rules::Severity;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_multi_ddl_only_on_later_statements() {
        let sql = "BEGIN;\nALTER TABLE t ADD COLUMN a int;\nALTER TABLE t ADD COLUMN b int;\nCOMMIT;";
        let lines: Vec<usize> = fired_with(sql, 17, None)
            .into_iter()
            .filter(|v| v.rule_id == "MP008")
            .map(|v| v.line)
            .collect();
        assert_eq!(lines, vec![3]);
        assert!(!fires("ALTER TABLE t ADD COLUMN a int; ALTER TABLE t ADD COLUMN b int;", "MP008"));
    }

    #[test]
    fn test_enum_add_value() {
        let sql = "BEGIN; ALTER TYPE mood ADD VALUE 'meh'; COMMIT;";
        assert_eq!(violation(sql, 11, "MP012").unwrap().severity, Severity::Critical);
        assert_eq!(violation(sql, 16, "MP012").unwrap().severity, Severity::Warning);
        assert!(violation("ALTER TYPE mood ADD VALUE 'meh';", 16, "MP012").is_none());
    }

    #[test]
    fn test_transaction_only_commands() {
        assert!(fires(
            "BEGIN; CREATE INDEX CONCURRENTLY idx ON users (email); COMMIT;",
            "MP025"
        ));
        assert!(!fires("CREATE INDEX CONCURRENTLY idx ON users (email);", "MP025"));
        assert!(fires("BEGIN; VACUUM users; COMMIT;", "MP055"));
        assert!(fires("BEGIN; ALTER TABLE t ADD COLUMN a int;", "MP053"));
        assert!(!fires("BEGIN; ALTER TABLE t ADD COLUMN a int; ROLLBACK;", "MP053"));
    }

    #[test]
    fn test_dml_after_ddl() {
        assert!(fires(
            "BEGIN; ALTER TABLE t ADD COLUMN a int; UPDATE t SET a = 1 WHERE id < 10; COMMIT;",
            "MP054"
        ));
        assert!(!fires(
            "BEGIN; UPDATE t SET a = 1 WHERE id < 10; ALTER TABLE t ADD COLUMN a int; COMMIT;",
            "MP054"
        ));
    }

    #[test]
    fn test_timeout_settings() {
        assert!(fires("SET statement_timeout = 0;", "MP056"));
        assert!(!fires("SET statement_timeout = '30s';", "MP056"));
        assert!(fires("SET lock_timeout = 0;", "MP057"));
        assert!(fires("SET lock_timeout = '1min';", "MP057"));
        assert!(!fires("SET lock_timeout = '5s';", "MP057"));
        assert!(fires("BEGIN; SET lock_timeout = '5s'; COMMIT;", "MP058"));
        assert!(!fires("BEGIN; SET LOCAL lock_timeout = '5s'; COMMIT;", "MP058"));
    }

    #[test]
    fn test_validate_in_same_transaction() {
        let added = "ALTER TABLE orders ADD CONSTRAINT fk FOREIGN KEY (user_id) REFERENCES users (id) NOT VALID;";
        let validate = "ALTER TABLE orders VALIDATE CONSTRAINT fk;";
        assert!(fires(&format!("BEGIN; {added} {validate} COMMIT;"), "MP074"));
        assert!(!fires(&format!("BEGIN; {added} COMMIT; BEGIN; {validate} COMMIT;"), "MP074"));
    }
}
