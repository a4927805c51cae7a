//! Constraint rules: validation, backing indexes and keys.

use super::{alter_cmds, alter_table, BuiltinRule, RuleContext, RuleMeta, Severity, Violation};
use crate::ast::*;

pub(super) const RULES: &[BuiltinRule] = &[
    BuiltinRule::new(
        RuleMeta {
            id: "MP002",
            name: "require-check-not-null",
            severity: Severity::Critical,
            description: "SET NOT NULL needs a validated CHECK (col IS NOT NULL) first.",
            why_it_matters: "SET NOT NULL scans the whole table under ACCESS EXCLUSIVE. \
                On PostgreSQL 12+ an existing validated CHECK lets it skip the scan.",
        },
        require_check_not_null,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP005",
            name: "require-not-valid-fk",
            severity: Severity::Critical,
            description: "Add foreign keys NOT VALID, then VALIDATE CONSTRAINT separately.",
            why_it_matters: "Validating a new foreign key scans the table while both tables \
                are locked against writes.",
        },
        require_not_valid_fk,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP016",
            name: "require-index-on-fk",
            severity: Severity::Warning,
            description: "Foreign key columns should be indexed.",
            why_it_matters: "Without an index every DELETE or key UPDATE on the referenced \
                table scans the referencing table.",
        },
        require_index_on_fk,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP018",
            name: "require-not-valid-check",
            severity: Severity::Critical,
            description: "Add CHECK constraints NOT VALID, then VALIDATE CONSTRAINT separately.",
            why_it_matters: "Adding a CHECK scans the whole table under ACCESS EXCLUSIVE.",
        },
        require_not_valid_check,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP027",
            name: "unique-constraint-requires-index",
            severity: Severity::Critical,
            description: "Add UNIQUE and PRIMARY KEY constraints USING INDEX built concurrently.",
            why_it_matters: "Without USING INDEX the unique index is built under ACCESS \
                EXCLUSIVE, blocking reads and writes for the whole build.",
        },
        unique_constraint_requires_index,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP030",
            name: "ban-exclusion-constraint",
            severity: Severity::Critical,
            description: "Adding an EXCLUDE constraint builds its index under ACCESS EXCLUSIVE.",
            why_it_matters: "Exclusion constraints cannot be added NOT VALID or USING INDEX, \
                so the table is locked for the whole build.",
        },
        ban_exclusion_constraint,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP042",
            name: "ban-alter-domain-constraint",
            severity: Severity::Critical,
            description: "ALTER DOMAIN ADD CONSTRAINT should use NOT VALID.",
            why_it_matters: "The new constraint is checked against every column of the domain \
                type in every table.",
        },
        ban_alter_domain_constraint,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP048",
            name: "require-partition-key-in-pk",
            severity: Severity::Critical,
            description: "The primary key of a partitioned table must include the partition key.",
            why_it_matters: "PostgreSQL rejects the table; unique constraints are only enforced \
                per partition.",
        },
        require_partition_key_in_pk,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP070",
            name: "require-check-before-attach-partition",
            severity: Severity::Warning,
            description: "Add a validated CHECK matching the bounds before ATTACH PARTITION.",
            why_it_matters: "Without one, ATTACH PARTITION scans the partition to verify its \
                rows while holding locks.",
        },
        require_check_before_attach_partition,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP080",
            name: "ban-drop-primary-key",
            severity: Severity::Critical,
            description: "Do not drop a primary key constraint.",
            why_it_matters: "Replication, ORMs and foreign keys rely on the primary key; \
                logical replication stops applying UPDATE and DELETE.",
        },
        ban_drop_primary_key,
    ),
];

fn require_check_not_null(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let alter = alter_table(stmt)?;
    if ctx.table_created_in_file(&alter.table) {
        return None;
    }
    alter.cmds.iter().find_map(|cmd| match cmd {
        AlterTableCmd::SetNotNull { column }
            if !ctx.has_validated_not_null_check(&alter.table, column) =>
        {
            let t = &alter.table;
            Some(
                meta.violation(
                    ctx,
                    format!("SET NOT NULL on \"{}\".\"{}\" scans the table under ACCESS EXCLUSIVE.", t, column),
                )
                .with_alternative(format!(
                    "ALTER TABLE {t} ADD CONSTRAINT {column}_not_null CHECK ({column} IS NOT NULL) NOT VALID;\n\
                     ALTER TABLE {t} VALIDATE CONSTRAINT {column}_not_null;\n\
                     ALTER TABLE {t} ALTER COLUMN {column} SET NOT NULL;\n\
                     ALTER TABLE {t} DROP CONSTRAINT {column}_not_null;"
                )),
            )
        }
        _ => None,
    })
}

/// `ADD CONSTRAINT` subcommands on an existing table.
fn added_constraints<'s>(
    stmt: &'s Statement,
    ctx: &RuleContext<'_>,
) -> impl Iterator<Item = &'s TableConstraint> {
    let existing = alter_table(stmt).is_some_and(|alter| !ctx.table_created_in_file(&alter.table));
    alter_cmds(stmt)
        .iter()
        .filter(move |_| existing)
        .filter_map(|cmd| match cmd {
            AlterTableCmd::AddConstraint(constraint) => Some(constraint),
            _ => None,
        })
}

/// `ADD CONSTRAINT ... NOT VALID` followed by `VALIDATE CONSTRAINT`.
fn not_valid_alternative(table: &QualifiedName, constraint: &TableConstraint, body: &str) -> String {
    let name = constraint.name.as_deref().unwrap_or("constraint_name");
    format!(
        "ALTER TABLE {table} ADD CONSTRAINT {name} {body} NOT VALID;\n\
         ALTER TABLE {table} VALIDATE CONSTRAINT {name};"
    )
}

fn require_not_valid_fk(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let table = &alter_table(stmt)?.table;
    added_constraints(stmt, ctx).find_map(|constraint| match &constraint.kind {
        ConstraintKind::ForeignKey {
            columns,
            ref_table,
            ref_columns,
            ..
        } if !constraint.not_valid => {
            let body = format!(
                "FOREIGN KEY ({}) REFERENCES {} ({})",
                columns.join(", "),
                ref_table,
                ref_columns.join(", ")
            );
            Some(
                meta.violation(
                    ctx,
                    format!(
                        "Foreign key on \"{}\" referencing \"{}\" is validated immediately, blocking writes on both tables.",
                        table, ref_table
                    ),
                )
                .with_alternative(not_valid_alternative(table, constraint, &body)),
            )
        }
        _ => None,
    })
}

fn require_index_on_fk(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let (table, foreign_keys): (&QualifiedName, Vec<Vec<String>>) = match stmt {
        Statement::CreateTable(create) => {
            let mut fks: Vec<Vec<String>> = create
                .constraints
                .iter()
                .filter_map(|c| match &c.kind {
                    ConstraintKind::ForeignKey { columns, .. } => Some(columns.clone()),
                    _ => None,
                })
                .collect();
            fks.extend(
                create
                    .columns
                    .iter()
                    .filter(|c| c.references().is_some())
                    .map(|c| vec![c.name.clone()]),
            );
            (&create.name, fks)
        }
        Statement::AlterTable(alter) => {
            let fks = alter
                .cmds
                .iter()
                .filter_map(|cmd| match cmd {
                    AlterTableCmd::AddConstraint(TableConstraint {
                        kind: ConstraintKind::ForeignKey { columns, .. },
                        ..
                    }) => Some(columns.clone()),
                    AlterTableCmd::AddColumn { column, .. } if column.references().is_some() => {
                        Some(vec![column.name.clone()])
                    }
                    _ => None,
                })
                .collect();
            (&alter.table, fks)
        }
        _ => return None,
    };

    let columns = foreign_keys
        .into_iter()
        .find(|columns| !columns.is_empty() && !ctx.has_index_covering(table, columns))?;
    let list = columns.join(", ");
    Some(
        meta.violation(
            ctx,
            format!("Foreign key column(s) ({}) on \"{}\" have no index.", list, table),
        )
        .with_alternative(format!(
            "CREATE INDEX CONCURRENTLY {}_{}_idx ON {} ({});",
            table.name,
            columns.join("_"),
            table,
            list
        )),
    )
}

fn require_not_valid_check(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let table = &alter_table(stmt)?.table;
    added_constraints(stmt, ctx).find_map(|constraint| match &constraint.kind {
        ConstraintKind::Check(expr) if !constraint.not_valid => {
            let body = format!("CHECK ({})", expr.raw);
            Some(
                meta.violation(
                    ctx,
                    format!("CHECK constraint on \"{}\" scans the table under ACCESS EXCLUSIVE.", table),
                )
                .with_alternative(not_valid_alternative(table, constraint, &body)),
            )
        }
        _ => None,
    })
}

fn unique_constraint_requires_index(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let table = &alter_table(stmt)?.table;
    added_constraints(stmt, ctx).find_map(|constraint| {
        let (kind, columns) = match &constraint.kind {
            ConstraintKind::PrimaryKey {
                columns,
                using_index: None,
            } => ("PRIMARY KEY", columns),
            ConstraintKind::Unique {
                columns,
                using_index: None,
            } => ("UNIQUE", columns),
            _ => return None,
        };
        let name = constraint.name.as_deref().unwrap_or("constraint_name");
        let list = columns.join(", ");
        Some(
            meta.violation(
                ctx,
                format!("Adding {} on \"{}\" builds its index under ACCESS EXCLUSIVE.", kind, table),
            )
            .with_alternative(format!(
                "CREATE UNIQUE INDEX CONCURRENTLY {name}_idx ON {table} ({list});\n\
                 ALTER TABLE {table} ADD CONSTRAINT {name} {kind} USING INDEX {name}_idx;"
            )),
        )
    })
}

fn ban_exclusion_constraint(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let table = &alter_table(stmt)?.table;
    added_constraints(stmt, ctx)
        .find(|constraint| matches!(constraint.kind, ConstraintKind::Exclude(_)))
        .map(|_| {
            meta.violation(
                ctx,
                format!("EXCLUDE constraint on \"{}\" is built under ACCESS EXCLUSIVE.", table),
            )
        })
}

fn ban_alter_domain_constraint(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    match stmt {
        Statement::AlterDomain(AlterDomain {
            name,
            action: AlterDomainAction::AddConstraint {
                not_valid: false, ..
            },
        }) => Some(
            meta.violation(
                ctx,
                format!("ALTER DOMAIN {} ADD CONSTRAINT checks every column using the domain.", name),
            )
            .with_alternative(format!(
                "ALTER DOMAIN {name} ADD CONSTRAINT ... NOT VALID;\nALTER DOMAIN {name} VALIDATE CONSTRAINT ...;"
            )),
        ),
        _ => None,
    }
}

fn require_partition_key_in_pk(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let Statement::CreateTable(create) = stmt else {
        return None;
    };
    let keys = create.partition_by.as_ref()?;
    let pk = create.primary_key()?;
    let missing: Vec<&str> = keys
        .iter()
        .filter(|key| !pk.iter().any(|col| col.eq_ignore_ascii_case(key)))
        .map(String::as_str)
        .collect();
    if missing.is_empty() {
        return None;
    }
    Some(
        meta.violation(
            ctx,
            format!(
                "Primary key of partitioned table \"{}\" is missing partition key column(s): {}.",
                create.name,
                missing.join(", ")
            ),
        )
        .with_alternative(format!("PRIMARY KEY ({}, {})", pk.join(", "), missing.join(", "))),
    )
}

fn require_check_before_attach_partition(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    alter_cmds(stmt).iter().find_map(|cmd| match cmd {
        AlterTableCmd::AttachPartition { partition } if !ctx.has_validated_check(partition) => {
            Some(
                meta.violation(
                    ctx,
                    format!("ATTACH PARTITION \"{}\" without a validated CHECK scans the partition.", partition),
                )
                .with_alternative(format!(
                    "ALTER TABLE {partition} ADD CONSTRAINT {name}_bounds CHECK (...) NOT VALID;\n\
                     ALTER TABLE {partition} VALIDATE CONSTRAINT {name}_bounds;\n\
                     -- then ATTACH PARTITION and drop the CHECK",
                    name = partition.name
                )),
            )
        }
        _ => None,
    })
}

fn ban_drop_primary_key(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let table = &alter_table(stmt)?.table;
    alter_cmds(stmt).iter().find_map(|cmd| match cmd {
        AlterTableCmd::DropConstraint { name, .. } if name.to_lowercase().ends_with("_pkey") => {
            Some(meta.violation(
                ctx,
                format!("Dropping primary key \"{}\" on \"{}\".", name, table),
            ))
        }
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use crate::rules::test_support::{fires, violation};

    #[test]
    fn test_set_not_null() {
        assert!(fires("ALTER TABLE users ALTER COLUMN email SET NOT NULL;", "MP002"));
        assert!(!fires(
            "ALTER TABLE users ADD CONSTRAINT email_nn CHECK (email IS NOT NULL) NOT VALID;
             ALTER TABLE users VALIDATE CONSTRAINT email_nn;
             ALTER TABLE users ALTER COLUMN email SET NOT NULL;",
            "MP002"
        ));
        assert!(!fires(
            "CREATE TABLE users (email text); ALTER TABLE users ALTER COLUMN email SET NOT NULL;",
            "MP002"
        ));
    }

    #[test]
    fn test_not_valid_fk_and_check() {
        let v = violation(
            "ALTER TABLE orders ADD CONSTRAINT fk_user FOREIGN KEY (user_id) REFERENCES users (id);",
            17,
            "MP005",
        )
        .unwrap();
        let alternative = v.safe_alternative.unwrap();
        assert!(alternative.contains("NOT VALID"));
        assert!(alternative.contains("VALIDATE CONSTRAINT fk_user"));
        assert!(!fires(
            "ALTER TABLE orders ADD CONSTRAINT fk FOREIGN KEY (user_id) REFERENCES users (id) NOT VALID;",
            "MP005"
        ));
        assert!(fires("ALTER TABLE t ADD CONSTRAINT c CHECK (n > 0);", "MP018"));
        assert!(!fires("ALTER TABLE t ADD CONSTRAINT c CHECK (n > 0) NOT VALID;", "MP018"));
    }

    #[test]
    fn test_index_on_fk() {
        assert!(fires(
            "CREATE TABLE orders (id bigint PRIMARY KEY, user_id bigint REFERENCES users (id));",
            "MP016"
        ));
        assert!(!fires(
            "CREATE INDEX CONCURRENTLY orders_user_idx ON orders (user_id);
             ALTER TABLE orders ADD CONSTRAINT fk FOREIGN KEY (user_id) REFERENCES users (id) NOT VALID;",
            "MP016"
        ));
        assert!(!fires(
            "CREATE TABLE orders (id bigint PRIMARY KEY, user_id bigint UNIQUE REFERENCES users (id));",
            "MP016"
        ));
    }

    #[test]
    fn test_index_created_after_fk_does_not_count() {
        assert!(fires(
            "ALTER TABLE orders ADD CONSTRAINT fk FOREIGN KEY (user_id) REFERENCES users (id) NOT VALID;
             CREATE INDEX CONCURRENTLY orders_user_idx ON orders (user_id);",
            "MP016"
        ));
    }

    #[test]
    fn test_unique_and_exclusion() {
        assert!(fires("ALTER TABLE users ADD CONSTRAINT u UNIQUE (email);", "MP027"));
        assert!(!fires(
            "ALTER TABLE users ADD CONSTRAINT u UNIQUE USING INDEX users_email_idx;",
            "MP027"
        ));
        assert!(fires(
            "ALTER TABLE rooms ADD CONSTRAINT no_overlap EXCLUDE USING gist (room WITH =, during WITH &&);",
            "MP030"
        ));
    }

    #[test]
    fn test_domain_and_partition_key() {
        assert!(fires("ALTER DOMAIN positive ADD CONSTRAINT p CHECK (VALUE > 0);", "MP042"));
        assert!(!fires(
            "ALTER DOMAIN positive ADD CONSTRAINT p CHECK (VALUE > 0) NOT VALID;",
            "MP042"
        ));
        assert!(fires(
            "CREATE TABLE m (id bigint PRIMARY KEY, at date) PARTITION BY RANGE (at);",
            "MP048"
        ));
        assert!(!fires(
            "CREATE TABLE m (id bigint, at date, PRIMARY KEY (id, at)) PARTITION BY RANGE (at);",
            "MP048"
        ));
    }

    #[test]
    fn test_attach_partition_and_drop_pkey() {
        assert!(fires("ALTER TABLE m ATTACH PARTITION m_2024 FOR VALUES FROM ('2024-01-01') TO ('2025-01-01');", "MP070"));
        assert!(!fires(
            "ALTER TABLE m_2024 ADD CONSTRAINT b CHECK (at >= '2024-01-01') NOT VALID;
             ALTER TABLE m_2024 VALIDATE CONSTRAINT b;
             ALTER TABLE m ATTACH PARTITION m_2024 FOR VALUES FROM ('2024-01-01') TO ('2025-01-01');",
            "MP070"
        ));
        assert!(fires("ALTER TABLE users DROP CONSTRAINT users_pkey;", "MP080"));
        assert!(!fires("ALTER TABLE users DROP CONSTRAINT users_email_key;", "MP080"));
    }
}
