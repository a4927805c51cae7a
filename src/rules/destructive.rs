//! Statements that destroy data or objects, or rewrite rows wholesale.

use super::{alter_cmds, BuiltinRule, RuleContext, RuleMeta, Severity, Violation};
use crate::ast::*;

pub(super) const RULES: &[BuiltinRule] = &[
    BuiltinRule::new(
        RuleMeta {
            id: "MP011",
            name: "unbatched-backfill",
            severity: Severity::Warning,
            description: "UPDATE without WHERE touches every row in one transaction.",
            why_it_matters: "Every row is locked until commit and the table bloats by its own \
                size; replicas lag behind the single huge write.",
        },
        unbatched_backfill,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP022",
            name: "no-drop-cascade",
            severity: Severity::Critical,
            description: "CASCADE drops dependent objects silently.",
            why_it_matters: "Views, foreign keys and other objects that depend on the target \
                disappear without being named in the migration.",
        },
        no_drop_cascade,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP026",
            name: "ban-drop-table",
            severity: Severity::Critical,
            description: "DROP TABLE removes the table and its data.",
            why_it_matters: "Running code that still queries the table fails, and the data is \
                only recoverable from backup.",
        },
        ban_drop_table,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP028",
            name: "no-rename-table",
            severity: Severity::Warning,
            description: "Renaming a table breaks code that still uses the old name.",
            why_it_matters: "Deployed application instances keep querying the old name until \
                they are replaced.",
        },
        no_rename_table,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP033",
            name: "ban-drop-database",
            severity: Severity::Critical,
            description: "DROP DATABASE in a migration.",
            why_it_matters: "Everything in the database is lost.",
        },
        ban_drop_database,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP034",
            name: "ban-drop-schema",
            severity: Severity::Critical,
            description: "DROP SCHEMA in a migration.",
            why_it_matters: "Every object in the schema goes with it when CASCADE is used, and \
                the statement fails halfway otherwise.",
        },
        ban_drop_schema,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP035",
            name: "ban-truncate",
            severity: Severity::Critical,
            description: "TRUNCATE deletes every row under ACCESS EXCLUSIVE.",
            why_it_matters: "The data is gone and the table is locked while it happens.",
        },
        ban_truncate,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP059",
            name: "no-delete-without-where",
            severity: Severity::Critical,
            description: "DELETE without WHERE removes every row.",
            why_it_matters: "All rows are locked until commit and the data is gone.",
        },
        no_delete_without_where,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP061",
            name: "ban-drop-extension",
            severity: Severity::Critical,
            description: "DROP EXTENSION removes its types, functions and operators.",
            why_it_matters: "Columns and indexes built on the extension break or are dropped.",
        },
        ban_drop_extension,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP062",
            name: "ban-drop-materialized-view",
            severity: Severity::Warning,
            description: "DROP MATERIALIZED VIEW.",
            why_it_matters: "Readers fail until it is recreated, and rebuilding it can take long.",
        },
        ban_drop_materialized_view,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP063",
            name: "ban-drop-sequence",
            severity: Severity::Warning,
            description: "DROP SEQUENCE.",
            why_it_matters: "Defaults that call nextval on it start failing.",
        },
        ban_drop_sequence,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP064",
            name: "ban-drop-type",
            severity: Severity::Warning,
            description: "DROP TYPE or DROP DOMAIN.",
            why_it_matters: "Columns and functions using the type block the drop, or are \
                dropped with it under CASCADE.",
        },
        ban_drop_type,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP071",
            name: "require-if-exists-on-drop",
            severity: Severity::Warning,
            description: "DROP without IF EXISTS.",
            why_it_matters: "A rerun, or a database where the object is already gone, fails \
                the whole migration.",
        },
        require_if_exists_on_drop,
    ),
];

fn drop_of(stmt: &Statement, object_type: ObjectType) -> Option<&DropObject> {
    match stmt {
        Statement::Drop(drop) if drop.object_type == object_type => Some(drop),
        _ => None,
    }
}

fn names(drop: &DropObject) -> String {
    drop.names
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn unbatched_backfill(meta: &RuleMeta, stmt: &Statement, ctx: &RuleContext<'_>) -> Option<Violation> {
    let Statement::Update(update) = stmt else {
        return None;
    };
    if update.has_where {
        return None;
    }
    Some(
        meta.violation(ctx, format!("UPDATE of every row in \"{}\".", update.table))
            .with_alternative(format!(
                "Update in batches by key range, one transaction per batch:\n\
                 UPDATE {} SET ... WHERE id BETWEEN $1 AND $2;",
                update.table
            )),
    )
}

fn no_drop_cascade(meta: &RuleMeta, stmt: &Statement, ctx: &RuleContext<'_>) -> Option<Violation> {
    let what = match stmt {
        Statement::Drop(drop) if drop.cascade => format!("DROP {} {}", drop.object_type, names(drop)),
        Statement::Truncate(truncate) if truncate.cascade => "TRUNCATE".to_string(),
        Statement::AlterDomain(AlterDomain {
            name,
            action: AlterDomainAction::DropConstraint { name: constraint, cascade: true },
        }) => format!("DROP CONSTRAINT {constraint} on domain {name}"),
        Statement::AlterTable(_) => alter_cmds(stmt).iter().find_map(|cmd| match cmd {
            AlterTableCmd::DropColumn { column, cascade: true, .. } => {
                Some(format!("DROP COLUMN {column}"))
            }
            AlterTableCmd::DropConstraint { name, cascade: true, .. } => {
                Some(format!("DROP CONSTRAINT {name}"))
            }
            _ => None,
        })?,
        _ => return None,
    };
    Some(
        meta.violation(ctx, format!("{what} ... CASCADE drops dependent objects."))
            .with_alternative("Drop the dependent objects explicitly, then drop without CASCADE."),
    )
}

fn ban_drop_table(meta: &RuleMeta, stmt: &Statement, ctx: &RuleContext<'_>) -> Option<Violation> {
    let drop = drop_of(stmt, ObjectType::Table)?;
    Some(
        meta.violation(ctx, format!("DROP TABLE {}.", names(drop)))
            .with_alternative("Rename the table first and drop it in a later migration once nothing reads it."),
    )
}

fn no_rename_table(meta: &RuleMeta, stmt: &Statement, ctx: &RuleContext<'_>) -> Option<Violation> {
    match stmt {
        Statement::Rename(Rename {
            object_type: ObjectType::Table,
            target,
            kind: RenameKind::Object { new_name },
        }) => Some(
            meta.violation(ctx, format!("Renaming table \"{}\" to \"{}\".", target, new_name))
                .with_alternative(format!(
                    "Rename, then CREATE VIEW {target} AS SELECT * FROM {new_name}; until all code uses the new name."
                )),
        ),
        _ => None,
    }
}

fn ban_drop_database(meta: &RuleMeta, stmt: &Statement, ctx: &RuleContext<'_>) -> Option<Violation> {
    let drop = drop_of(stmt, ObjectType::Database)?;
    Some(meta.violation(ctx, format!("DROP DATABASE {}.", names(drop))))
}

fn ban_drop_schema(meta: &RuleMeta, stmt: &Statement, ctx: &RuleContext<'_>) -> Option<Violation> {
    let drop = drop_of(stmt, ObjectType::Schema)?;
    Some(meta.violation(ctx, format!("DROP SCHEMA {}.", names(drop))))
}

fn ban_truncate(meta: &RuleMeta, stmt: &Statement, ctx: &RuleContext<'_>) -> Option<Violation> {
    let Statement::Truncate(truncate) = stmt else {
        return None;
    };
    let tables = truncate
        .tables
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    Some(
        meta.violation(ctx, format!("TRUNCATE {tables}."))
            .with_alternative("Delete rows in batches if the data really has to go."),
    )
}

fn no_delete_without_where(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let Statement::Delete(delete) = stmt else {
        return None;
    };
    if delete.has_where {
        return None;
    }
    Some(
        meta.violation(ctx, format!("DELETE of every row in \"{}\".", delete.table))
            .with_alternative(format!(
                "DELETE FROM {} WHERE id IN (SELECT id FROM {} LIMIT 1000); -- repeat until done",
                delete.table, delete.table
            )),
    )
}

fn ban_drop_extension(meta: &RuleMeta, stmt: &Statement, ctx: &RuleContext<'_>) -> Option<Violation> {
    let drop = drop_of(stmt, ObjectType::Extension)?;
    Some(meta.violation(ctx, format!("DROP EXTENSION {}.", names(drop))))
}

fn ban_drop_materialized_view(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let drop = drop_of(stmt, ObjectType::MaterializedView)?;
    Some(meta.violation(ctx, format!("DROP MATERIALIZED VIEW {}.", names(drop))))
}

fn ban_drop_sequence(meta: &RuleMeta, stmt: &Statement, ctx: &RuleContext<'_>) -> Option<Violation> {
    let drop = drop_of(stmt, ObjectType::Sequence)?;
    Some(meta.violation(ctx, format!("DROP SEQUENCE {}.", names(drop))))
}

fn ban_drop_type(meta: &RuleMeta, stmt: &Statement, ctx: &RuleContext<'_>) -> Option<Violation> {
    let drop = drop_of(stmt, ObjectType::Type).or_else(|| drop_of(stmt, ObjectType::Domain))?;
    Some(meta.violation(ctx, format!("DROP {} {}.", drop.object_type, names(drop))))
}

fn require_if_exists_on_drop(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let Statement::Drop(drop) = stmt else {
        return None;
    };
    if drop.if_exists {
        return None;
    }
    Some(
        meta.violation(ctx, format!("DROP {} {} without IF EXISTS.", drop.object_type, names(drop)))
            .with_alternative(format!("DROP {} IF EXISTS {};", drop.object_type, names(drop))),
    )
}
