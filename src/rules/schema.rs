//! Schema hygiene: naming, idempotence and table properties.

use super::{alter_table, BuiltinRule, RuleContext, RuleMeta, Severity, Violation};
use crate::ast::*;

pub(super) const RULES: &[BuiltinRule] = &[
    BuiltinRule::new(
        RuleMeta {
            id: "MP023",
            name: "require-if-not-exists",
            severity: Severity::Warning,
            description: "CREATE without IF NOT EXISTS.",
            why_it_matters: "A migration that is retried after a partial failure stops at \
                the first object that already exists.",
        },
        require_if_not_exists,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP024",
            name: "no-rename-enum-value",
            severity: Severity::Warning,
            description: "Renaming an enum value breaks code that still writes the old label.",
            why_it_matters: "Inserts and comparisons using the old label fail as soon as the \
                rename commits.",
        },
        no_rename_enum_value,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP041",
            name: "require-index-name",
            severity: Severity::Warning,
            description: "CREATE INDEX without an explicit name.",
            why_it_matters: "Generated names differ between environments, so later migrations \
                cannot reliably drop or rename the index.",
        },
        require_index_name,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP044",
            name: "require-primary-key",
            severity: Severity::Warning,
            description: "CREATE TABLE without a primary key.",
            why_it_matters: "Logical replication cannot replicate UPDATE and DELETE, and \
                duplicate rows cannot be told apart.",
        },
        require_primary_key,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP046",
            name: "ban-set-logged-unlogged",
            severity: Severity::Critical,
            description: "SET LOGGED / SET UNLOGGED rewrites the table.",
            why_it_matters: "The whole table is copied under ACCESS EXCLUSIVE, and an unlogged \
                table is emptied after a crash.",
        },
        ban_set_logged_unlogged,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP047",
            name: "ban-set-tablespace",
            severity: Severity::Critical,
            description: "SET TABLESPACE copies the table under ACCESS EXCLUSIVE.",
            why_it_matters: "Reads and writes are blocked while every data file is copied.",
        },
        ban_set_tablespace,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP069",
            name: "ban-create-unlogged-table",
            severity: Severity::Warning,
            description: "CREATE UNLOGGED TABLE.",
            why_it_matters: "Unlogged tables are truncated after a crash and are not replicated.",
        },
        ban_create_unlogged_table,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP078",
            name: "ban-create-trigger",
            severity: Severity::Warning,
            description: "CREATE TRIGGER on an existing table.",
            why_it_matters: "The trigger runs inside every write to the table from the moment \
                it commits, adding latency and hidden behaviour.",
        },
        ban_create_trigger,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP079",
            name: "ban-disable-trigger",
            severity: Severity::Warning,
            description: "ALTER TABLE ... DISABLE TRIGGER.",
            why_it_matters: "Writes made while the trigger is off skip its side effects, and \
                disabling system triggers turns off foreign key checks.",
        },
        ban_disable_trigger,
    ),
];

fn require_if_not_exists(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let (kind, name) = match stmt {
        Statement::CreateTable(create) if !create.if_not_exists => {
            ("TABLE", create.name.to_string())
        }
        Statement::CreateIndex(idx) if !idx.if_not_exists => (
            "INDEX",
            idx.name.clone().unwrap_or_else(|| format!("on {}", idx.table)),
        ),
        Statement::CreateSequence(seq) if !seq.if_not_exists => ("SEQUENCE", seq.name.to_string()),
        Statement::CreateExtension(ext) if !ext.if_not_exists => ("EXTENSION", ext.name.clone()),
        _ => return None,
    };
    Some(
        meta.violation(ctx, format!("CREATE {} {} without IF NOT EXISTS.", kind, name))
            .with_alternative(format!("CREATE {kind} IF NOT EXISTS ...")),
    )
}

fn no_rename_enum_value(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    match stmt {
        Statement::AlterEnum(AlterEnum {
            name,
            action: AlterEnumAction::RenameValue { from, to },
        }) => Some(
            meta.violation(
                ctx,
                format!("Enum {} value '{}' renamed to '{}'.", name, from, to),
            )
            .with_alternative(format!(
                "ALTER TYPE {name} ADD VALUE '{to}'; migrate rows and code, then stop using '{from}'."
            )),
        ),
        _ => None,
    }
}

fn require_index_name(meta: &RuleMeta, stmt: &Statement, ctx: &RuleContext<'_>) -> Option<Violation> {
    let Statement::CreateIndex(idx) = stmt else {
        return None;
    };
    if idx.name.is_some() {
        return None;
    }
    let suggested = format!("{}_{}_idx", idx.table.name, idx.columns.join("_"));
    Some(
        meta.violation(ctx, format!("Index on \"{}\" has no explicit name.", idx.table))
            .with_alternative(format!("CREATE INDEX {suggested} ON {} (...);", idx.table)),
    )
}

fn require_primary_key(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let Statement::CreateTable(create) = stmt else {
        return None;
    };
    if create.primary_key().is_some()
        || create.partition_of.is_some()
        || create.as_query
        || create.temporary
    {
        return None;
    }
    Some(
        meta.violation(ctx, format!("Table \"{}\" has no primary key.", create.name))
            .with_alternative("id bigint GENERATED ALWAYS AS IDENTITY PRIMARY KEY"),
    )
}

fn ban_set_logged_unlogged(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let alter = alter_table(stmt)?;
    let mode = alter.cmds.iter().find_map(|cmd| match cmd {
        AlterTableCmd::SetLogged => Some("LOGGED"),
        AlterTableCmd::SetUnlogged => Some("UNLOGGED"),
        _ => None,
    })?;
    Some(meta.violation(
        ctx,
        format!("SET {} rewrites \"{}\" under ACCESS EXCLUSIVE.", mode, alter.table),
    ))
}

fn ban_set_tablespace(meta: &RuleMeta, stmt: &Statement, ctx: &RuleContext<'_>) -> Option<Violation> {
    let alter = alter_table(stmt)?;
    let tablespace = alter.cmds.iter().find_map(|cmd| match cmd {
        AlterTableCmd::SetTablespace { tablespace } => Some(tablespace),
        _ => None,
    })?;
    Some(
        meta.violation(
            ctx,
            format!("Moving \"{}\" to tablespace {} copies it under ACCESS EXCLUSIVE.", alter.table, tablespace),
        )
        .with_alternative("Use pg_repack with --tablespace to move the table online."),
    )
}

fn ban_create_unlogged_table(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    match stmt {
        Statement::CreateTable(create) if create.unlogged => Some(meta.violation(
            ctx,
            format!("Table \"{}\" is created UNLOGGED.", create.name),
        )),
        _ => None,
    }
}

fn ban_create_trigger(meta: &RuleMeta, stmt: &Statement, ctx: &RuleContext<'_>) -> Option<Violation> {
    let Statement::CreateTrigger(trigger) = stmt else {
        return None;
    };
    if ctx.table_created_in_file(&trigger.table) {
        return None;
    }
    Some(meta.violation(
        ctx,
        format!("Trigger \"{}\" added to existing table \"{}\".", trigger.name, trigger.table),
    ))
}

fn ban_disable_trigger(meta: &RuleMeta, stmt: &Statement, ctx: &RuleContext<'_>) -> Option<Violation> {
    let alter = alter_table(stmt)?;
    let name = alter.cmds.iter().find_map(|cmd| match cmd {
        AlterTableCmd::DisableTrigger { name } => Some(name),
        _ => None,
    })?;
    Some(meta.violation(
        ctx,
        format!("Trigger {} disabled on \"{}\".", name, alter.table),
    ))
}

#[cfg(test)]
mod tests {
    use crate::rules::test_support::{fires, violation};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_if_not_exists() {
        assert!(fires("CREATE TABLE t (id bigint PRIMARY KEY);", "MP023"));
        assert!(!fires("CREATE TABLE IF NOT EXISTS t (id bigint PRIMARY KEY);", "MP023"));
        assert!(fires("CREATE EXTENSION pgcrypto;", "MP023"));
        assert!(fires("CREATE SEQUENCE s;", "MP023"));
    }

    #[test]
    fn test_enum_rename() {
        assert!(fires("ALTER TYPE mood RENAME VALUE 'sad' TO 'blue';", "MP024"));
    }

    #[test]
    fn test_index_name() {
        let v = violation("CREATE INDEX ON users (email);", 17, "MP041").unwrap();
        assert_eq!(
            v.safe_alternative.as_deref(),
            Some("CREATE INDEX users_email_idx ON users (...);")
        );
    }

    #[test]
    fn test_primary_key() {
        assert!(fires("CREATE TABLE t (name text);", "MP044"));
        assert!(!fires("CREATE TABLE t (id bigint, PRIMARY KEY (id));", "MP044"));
        assert!(!fires("CREATE TEMPORARY TABLE t (name text);", "MP044"));
    }

    #[test]
    fn test_table_properties() {
        assert!(fires("ALTER TABLE t SET UNLOGGED;", "MP046"));
        assert!(fires("ALTER TABLE t SET LOGGED;", "MP046"));
        assert!(fires("ALTER TABLE t SET TABLESPACE fast;", "MP047"));
        assert!(fires("CREATE UNLOGGED TABLE t (id bigint PRIMARY KEY);", "MP069"));
    }

    #[test]
    fn test_triggers() {
        let create = "CREATE TRIGGER audit AFTER INSERT ON users FOR EACH ROW EXECUTE FUNCTION log();";
        assert!(fires(create, "MP078"));
        assert!(!fires(
            &format!("CREATE TABLE users (id bigint PRIMARY KEY); {create}"),
            "MP078"
        ));
        assert!(fires("ALTER TABLE users DISABLE TRIGGER audit;", "MP079"));
    }
}
