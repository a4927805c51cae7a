//! Column-level ALTER TABLE rules.

use super::{added_columns, alter_table, BuiltinRule, RuleContext, RuleMeta, Severity, Violation};
use crate::ast::*;

pub(super) const RULES: &[BuiltinRule] = &[
    BuiltinRule::new(
        RuleMeta {
            id: "MP003",
            name: "volatile-default-rewrite",
            severity: Severity::Critical,
            description: "ADD COLUMN with a default that forces a table rewrite.",
            why_it_matters: "Before PostgreSQL 11 any default rewrites the table; afterwards a \
                volatile default still does. The rewrite holds ACCESS EXCLUSIVE throughout.",
        },
        volatile_default_rewrite,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP007",
            name: "no-column-type-change",
            severity: Severity::Critical,
            description: "ALTER COLUMN TYPE rewrites the table and its indexes.",
            why_it_matters: "Reads and writes are blocked for the whole rewrite, and running \
                application code may not handle the new type.",
        },
        no_column_type_change,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP010",
            name: "no-rename-column",
            severity: Severity::Warning,
            description: "Renaming a column breaks code that still uses the old name.",
            why_it_matters: "Deployed application instances keep querying the old name until \
                they are replaced.",
        },
        no_rename_column,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP015",
            name: "no-add-column-serial",
            severity: Severity::Critical,
            description: "Adding a serial column rewrites the table.",
            why_it_matters: "Every existing row gets a sequence value under ACCESS EXCLUSIVE.",
        },
        no_add_column_serial,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP017",
            name: "no-drop-column",
            severity: Severity::Warning,
            description: "Dropping a column breaks code that still reads it.",
            why_it_matters: "Deployed application instances fail on queries that name the \
                column, including SELECTs with an explicit column list.",
        },
        no_drop_column,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP029",
            name: "ban-drop-not-null",
            severity: Severity::Warning,
            description: "DROP NOT NULL lets NULLs into a column code assumes is set.",
            why_it_matters: "Readers that do not expect NULL start failing once one is written.",
        },
        ban_drop_not_null,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP043",
            name: "no-data-loss-type-narrowing",
            severity: Severity::Critical,
            description: "Changing a column to a bounded type can fail or truncate.",
            why_it_matters: "Existing values that do not fit abort the migration midway \
                through a rewrite, or lose precision.",
        },
        no_data_loss_type_narrowing,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP051",
            name: "ban-add-column-unique-or-pk",
            severity: Severity::Critical,
            description: "ADD COLUMN with inline UNIQUE or PRIMARY KEY builds an index under lock.",
            why_it_matters: "The index is built while ACCESS EXCLUSIVE is held.",
        },
        ban_add_column_unique_or_pk,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP052",
            name: "ban-add-column-generated-stored",
            severity: Severity::Critical,
            description: "Adding a stored generated column rewrites the table.",
            why_it_matters: "The value is computed for every existing row under ACCESS EXCLUSIVE.",
        },
        ban_add_column_generated_stored,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP068",
            name: "ban-add-not-null-column-without-default",
            severity: Severity::Critical,
            description: "ADD COLUMN NOT NULL without a DEFAULT fails on a non-empty table.",
            why_it_matters: "Existing rows would hold NULL, so PostgreSQL rejects the statement.",
        },
        ban_add_not_null_column_without_default,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP075",
            name: "ban-add-column-inline-fk",
            severity: Severity::Critical,
            description: "ADD COLUMN ... REFERENCES validates the foreign key immediately.",
            why_it_matters: "An inline reference cannot be NOT VALID, so both tables are \
                locked while it is checked.",
        },
        ban_add_column_inline_fk,
    ),
];

/// Columns added to a table that existed before this file.
fn added_to_existing<'s>(
    stmt: &'s Statement,
    ctx: &RuleContext<'_>,
) -> Option<(&'s QualifiedName, Vec<&'s ColumnDef>)> {
    let alter = alter_table(stmt)?;
    if ctx.table_created_in_file(&alter.table) {
        return None;
    }
    let columns: Vec<&ColumnDef> = added_columns(stmt).collect();
    (!columns.is_empty()).then_some((&alter.table, columns))
}

fn volatile_default_rewrite(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let (table, columns) = added_to_existing(stmt, ctx)?;
    columns.into_iter().find_map(|column| {
        let default = column.default_expr().filter(|d| !d.is_null())?;
        let violation = if ctx.pg_version < 11 {
            meta.violation(
                ctx,
                format!(
                    "ADD COLUMN \"{}\" with DEFAULT rewrites \"{}\" on PostgreSQL {}.",
                    column.name, table, ctx.pg_version
                ),
            )
        } else if default.is_volatile() {
            meta.violation(
                ctx,
                format!(
                    "Volatile default {} on \"{}\" is evaluated per row and rewrites \"{}\".",
                    default.raw, column.name, table
                ),
            )
            .with_severity(Severity::Warning)
        } else {
            return None;
        };
        Some(violation.with_alternative(format!(
            "ALTER TABLE {table} ADD COLUMN {name} {ty};\n\
             ALTER TABLE {table} ALTER COLUMN {name} SET DEFAULT {default};\n\
             -- backfill existing rows in batches",
            name = column.name,
            ty = column.data_type,
            default = default.raw
        )))
    })
}

fn no_column_type_change(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let alter = alter_table(stmt)?;
    if ctx.table_created_in_file(&alter.table) {
        return None;
    }
    alter.cmds.iter().find_map(|cmd| match cmd {
        AlterTableCmd::AlterColumnType {
            column, data_type, ..
        } => Some(
            meta.violation(
                ctx,
                format!(
                    "Changing \"{}\".\"{}\" to {} rewrites the table under ACCESS EXCLUSIVE.",
                    alter.table, column, data_type
                ),
            )
            .with_alternative(format!(
                "Add a new {data_type} column, backfill it in batches, switch reads over, then drop \"{column}\"."
            )),
        ),
        _ => None,
    })
}

fn no_rename_column(meta: &RuleMeta, stmt: &Statement, ctx: &RuleContext<'_>) -> Option<Violation> {
    match stmt {
        Statement::Rename(Rename {
            target,
            kind: RenameKind::Column { from, to },
            ..
        }) => Some(
            meta.violation(
                ctx,
                format!("Renaming \"{}\".\"{}\" to \"{}\" breaks running code.", target, from, to),
            )
            .with_alternative(format!(
                "Add \"{to}\", write to both columns, backfill, move reads to \"{to}\", then drop \"{from}\"."
            )),
        ),
        _ => None,
    }
}

fn no_add_column_serial(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let (table, columns) = added_to_existing(stmt, ctx)?;
    let column = columns.into_iter().find(|c| c.data_type.is_serial())?;
    Some(
        meta.violation(
            ctx,
            format!("ADD COLUMN \"{}\" {} rewrites \"{}\".", column.name, column.data_type, table),
        )
        .with_alternative(format!(
            "ALTER TABLE {table} ADD COLUMN {name} bigint;\n\
             CREATE SEQUENCE {table_name}_{name}_seq OWNED BY {table}.{name};\n\
             ALTER TABLE {table} ALTER COLUMN {name} SET DEFAULT nextval('{table_name}_{name}_seq');\n\
             -- backfill existing rows in batches",
            name = column.name,
            table_name = table.name
        )),
    )
}

fn no_drop_column(meta: &RuleMeta, stmt: &Statement, ctx: &RuleContext<'_>) -> Option<Violation> {
    let alter = alter_table(stmt)?;
    alter.cmds.iter().find_map(|cmd| match cmd {
        AlterTableCmd::DropColumn { column, .. } => Some(
            meta.violation(ctx, format!("Dropping \"{}\".\"{}\".", alter.table, column))
                .with_alternative(
                    "Stop reading and writing the column in a deploy first, then drop it in a later migration.",
                ),
        ),
        _ => None,
    })
}

fn ban_drop_not_null(meta: &RuleMeta, stmt: &Statement, ctx: &RuleContext<'_>) -> Option<Violation> {
    let alter = alter_table(stmt)?;
    alter.cmds.iter().find_map(|cmd| match cmd {
        AlterTableCmd::DropNotNull { column } => Some(meta.violation(
            ctx,
            format!("DROP NOT NULL on \"{}\".\"{}\".", alter.table, column),
        )),
        _ => None,
    })
}

fn no_data_loss_type_narrowing(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let alter = alter_table(stmt)?;
    alter.cmds.iter().find_map(|cmd| match cmd {
        AlterTableCmd::AlterColumnType {
            column, data_type, ..
        } if data_type.is_bounded() => Some(meta.violation(
            ctx,
            format!(
                "\"{}\".\"{}\" is changed to bounded type {}; values that do not fit fail the migration.",
                alter.table, column, data_type
            ),
        )),
        _ => None,
    })
}

fn ban_add_column_unique_or_pk(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let (table, columns) = added_to_existing(stmt, ctx)?;
    let column = columns
        .into_iter()
        .find(|c| c.is_unique() || c.is_primary_key())?;
    let kind = if column.is_primary_key() { "PRIMARY KEY" } else { "UNIQUE" };
    Some(
        meta.violation(
            ctx,
            format!("ADD COLUMN \"{}\" {} on \"{}\" builds an index under ACCESS EXCLUSIVE.", column.name, kind, table),
        )
        .with_alternative(format!(
            "ALTER TABLE {table} ADD COLUMN {name} {ty};\n\
             CREATE UNIQUE INDEX CONCURRENTLY {table_name}_{name}_idx ON {table} ({name});\n\
             ALTER TABLE {table} ADD CONSTRAINT {table_name}_{name}_key {kind} USING INDEX {table_name}_{name}_idx;",
            name = column.name,
            ty = column.data_type,
            table_name = table.name
        )),
    )
}

fn ban_add_column_generated_stored(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let (table, columns) = added_to_existing(stmt, ctx)?;
    let column = columns.into_iter().find(|c| c.generated_expr().is_some())?;
    Some(
        meta.violation(
            ctx,
            format!("Stored generated column \"{}\" rewrites \"{}\".", column.name, table),
        )
        .with_alternative("Add a plain column, backfill it in batches, and keep it current with a trigger."),
    )
}

fn ban_add_not_null_column_without_default(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let (table, columns) = added_to_existing(stmt, ctx)?;
    let column = columns.into_iter().find(|c| {
        c.is_not_null()
            && !c.has_default()
            && !c.is_identity()
            && !c.data_type.is_serial()
            && c.generated_expr().is_none()
    })?;
    Some(
        meta.violation(
            ctx,
            format!("NOT NULL column \"{}\" without DEFAULT cannot be added to \"{}\" once it has rows.", column.name, table),
        )
        .with_alternative(format!(
            "ALTER TABLE {table} ADD COLUMN {name} {ty} DEFAULT <value> NOT NULL;",
            name = column.name,
            ty = column.data_type
        )),
    )
}

fn ban_add_column_inline_fk(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let (table, columns) = added_to_existing(stmt, ctx)?;
    let (column, referenced) = columns
        .into_iter()
        .find_map(|c| c.references().map(|r| (c, r)))?;
    Some(
        meta.violation(
            ctx,
            format!(
                "ADD COLUMN \"{}\" REFERENCES \"{}\" validates the key while locking both tables.",
                column.name, referenced
            ),
        )
        .with_alternative(format!(
            "ALTER TABLE {table} ADD COLUMN {name} {ty};\n\
             ALTER TABLE {table} ADD CONSTRAINT {table_name}_{name}_fkey FOREIGN KEY ({name}) REFERENCES {referenced} NOT VALID;\n\
             ALTER TABLE {table} VALIDATE CONSTRAINT {table_name}_{name}_fkey;",
            name = column.name,
            ty = column.data_type,
            table_name = table.name
        )),
    )
}

#[cfg(test)]
mod tests {
    use crate::rules::test_support::{fires, violation};
    use crate::rules::Severity;

    #[test]
    fn test_volatile_default_by_version() {
        let sql = "ALTER TABLE t ADD COLUMN c timestamp DEFAULT now();";
        assert_eq!(violation(sql, 10, "MP003").unwrap().severity, Severity::Critical);
        assert_eq!(violation(sql, 17, "MP003").unwrap().severity, Severity::Warning);
        assert!(violation("ALTER TABLE t ADD COLUMN c int DEFAULT 0;", 17, "MP003").is_none());
        assert!(violation("ALTER TABLE t ADD COLUMN c int DEFAULT 0;", 10, "MP003").is_some());
        assert!(violation("ALTER TABLE t ADD COLUMN c int DEFAULT NULL;", 10, "MP003").is_none());
    }

    #[test]
    fn test_type_changes() {
        assert!(fires("ALTER TABLE t ALTER COLUMN c TYPE bigint;", "MP007"));
        assert!(!fires("ALTER TABLE t ALTER COLUMN c TYPE bigint;", "MP043"));
        assert!(fires("ALTER TABLE t ALTER COLUMN c TYPE varchar(10);", "MP043"));
        assert!(!fires(
            "CREATE TABLE t (c int); ALTER TABLE t ALTER COLUMN c TYPE bigint;",
            "MP007"
        ));
    }

    #[test]
    fn test_renames_and_drops() {
        assert!(fires("ALTER TABLE users RENAME COLUMN name TO full_name;", "MP010"));
        assert!(!fires("ALTER TABLE users RENAME TO people;", "MP010"));
        assert!(fires("ALTER TABLE users DROP COLUMN bio;", "MP017"));
        assert!(fires("ALTER TABLE users ALTER COLUMN bio DROP NOT NULL;", "MP029"));
    }

    #[test]
    fn test_add_column_shapes() {
        assert!(fires("ALTER TABLE t ADD COLUMN n serial;", "MP015"));
        assert!(fires("ALTER TABLE t ADD COLUMN code text UNIQUE;", "MP051"));
        assert!(fires(
            "ALTER TABLE t ADD COLUMN total numeric GENERATED ALWAYS AS (price * qty) STORED;",
            "MP052"
        ));
        assert!(fires("ALTER TABLE t ADD COLUMN flag boolean NOT NULL;", "MP068"));
        assert!(!fires("ALTER TABLE t ADD COLUMN flag boolean NOT NULL DEFAULT false;", "MP068"));
        assert!(fires("ALTER TABLE orders ADD COLUMN user_id bigint REFERENCES users (id);", "MP075"));
    }
}
