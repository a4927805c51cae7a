//! Tables touched by a statement.

use serde::Serialize;

use crate::ast::*;

/// A table a statement operates on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableTarget {
    pub table: String,
    pub schema: Option<String>,
    /// What the statement does to it, e.g. `ALTER TABLE` or `REFERENCES`.
    pub operation: String,
}

impl TableTarget {
    fn new(name: &QualifiedName, operation: impl Into<String>) -> Self {
        Self {
            table: name.name.clone(),
            schema: name.schema.clone(),
            operation: operation.into(),
        }
    }

    pub fn qualified_name(&self) -> QualifiedName {
        QualifiedName {
            schema: self.schema.clone(),
            name: self.table.clone(),
        }
    }
}

/// Extract target tables, the primary one first.
///
/// Foreign keys also target the referenced table, since adding one locks
/// it (SHARE ROW EXCLUSIVE) while the constraint is checked.
pub fn extract_targets(stmt: &Statement) -> Vec<TableTarget> {
    let kind = stmt.kind();
    let mut targets = Vec::new();
    let mut push = |name: &QualifiedName, operation: &str| {
        if !name.name.is_empty() {
            targets.push(TableTarget::new(name, operation));
        }
    };

    match stmt {
        Statement::CreateIndex(idx) => push(&idx.table, &kind),
        Statement::CreateTable(table) => {
            push(&table.name, &kind);
            if let Some(parent) = &table.partition_of {
                push(parent, "PARTITION OF");
            }
            for column in &table.columns {
                if let Some(referenced) = column.references() {
                    push(referenced, "REFERENCES");
                }
            }
            for constraint in &table.constraints {
                if let ConstraintKind::ForeignKey { ref_table, .. } = &constraint.kind {
                    push(ref_table, "REFERENCES");
                }
            }
        }
        Statement::AlterTable(alter) => {
            push(&alter.table, &kind);
            for cmd in &alter.cmds {
                match cmd {
                    AlterTableCmd::AddColumn { column, .. } => {
                        if let Some(referenced) = column.references() {
                            push(referenced, "REFERENCES");
                        }
                    }
                    AlterTableCmd::AddConstraint(TableConstraint {
                        kind: ConstraintKind::ForeignKey { ref_table, .. },
                        ..
                    }) => push(ref_table, "REFERENCES"),
                    AlterTableCmd::AttachPartition { partition } => {
                        push(partition, "ATTACH PARTITION")
                    }
                    AlterTableCmd::DetachPartition { partition, .. } => {
                        push(partition, "DETACH PARTITION")
                    }
                    _ => {}
                }
            }
        }
        Statement::Drop(drop) => match drop.object_type {
            ObjectType::Table
            | ObjectType::View
            | ObjectType::MaterializedView
            | ObjectType::Index
            | ObjectType::Sequence
            | ObjectType::Trigger => {
                for name in &drop.names {
                    push(name, &kind);
                }
            }
            _ => {}
        },
        Statement::Rename(rename) => match rename.object_type {
            ObjectType::Table | ObjectType::View | ObjectType::MaterializedView => {
                push(&rename.target, &kind)
            }
            _ => {}
        },
        Statement::Truncate(t) => t.tables.iter().for_each(|name| push(name, &kind)),
        Statement::Vacuum(v) => v.tables.iter().for_each(|name| push(name, &kind)),
        Statement::Analyze(a) => a.tables.iter().for_each(|name| push(name, &kind)),
        Statement::LockTable(l) => l.tables.iter().for_each(|name| push(name, &kind)),
        Statement::Reindex(r) => {
            if matches!(r.target, ReindexTarget::Table | ReindexTarget::Index) {
                push(&r.name, &kind);
            }
        }
        Statement::Cluster(c) => {
            if let Some(table) = &c.table {
                push(table, &kind);
            }
        }
        Statement::RefreshMaterializedView(r) => push(&r.name, &kind),
        Statement::CreateTrigger(t) => push(&t.table, &kind),
        Statement::Update(u) => push(&u.table, &kind),
        Statement::Delete(d) => push(&d.table, &kind),
        Statement::Insert(i) => push(&i.table, &kind),
        Statement::VariableSet(_)
        | Statement::VariableShow(_)
        | Statement::Transaction(_)
        | Statement::CreateDomain(_)
        | Statement::AlterDomain(_)
        | Statement::CreateSequence(_)
        | Statement::CreateEnum(_)
        | Statement::AlterEnum(_)
        | Statement::CreateExtension(_)
        | Statement::CreateView(_)
        | Statement::Other { .. } => {}
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_sql;
    use pretty_assertions::assert_eq;

    fn targets_of(sql: &str) -> Vec<(String, String)> {
        let stmts = parse_sql(sql).unwrap();
        extract_targets(&stmts[0].stmt)
            .into_iter()
            .map(|t| (t.qualified_name().to_string(), t.operation))
            .collect()
    }

    #[test]
    fn test_foreign_key_targets_both_tables() {
        assert_eq!(
            targets_of("ALTER TABLE orders ADD CONSTRAINT fk FOREIGN KEY (user_id) REFERENCES public.users (id)"),
            vec![
                ("orders".to_string(), "ALTER TABLE".to_string()),
                ("public.users".to_string(), "REFERENCES".to_string()),
            ]
        );
    }

    #[test]
    fn test_simple_targets() {
        assert_eq!(
            targets_of("CREATE INDEX idx ON app.users (email)"),
            vec![("app.users".to_string(), "CREATE INDEX".to_string())]
        );
        assert_eq!(targets_of("TRUNCATE a, b").len(), 2);
        assert_eq!(
            targets_of("DROP TABLE IF EXISTS old_users"),
            vec![("old_users".to_string(), "DROP TABLE".to_string())]
        );
        assert!(targets_of("SET lock_timeout = '1s'").is_empty());
        assert!(targets_of("REINDEX DATABASE").is_empty());
    }
}
