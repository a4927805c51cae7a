//! Per-statement view handed to rules.

use std::ops::Range;

use crate::ast::*;
use crate::config::Thresholds;
use crate::lock::LockClassification;
use crate::production::{AffectedQuery, ProductionContext, TableFacts, TableStats};
use crate::targets::extract_targets;

/// A parsed statement with its lock classification.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedStatement {
    pub parsed: ParsedStatement,
    pub lock: LockClassification,
}

impl ClassifiedStatement {
    pub fn stmt(&self) -> &Statement {
        &self.parsed.stmt
    }
}

/// Everything a rule may look at besides the statement itself.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub lock: LockClassification,
    pub sql: &'a str,
    pub line: usize,
    pub pg_version: u32,
    /// The whole file, in source order.
    pub statements: &'a [ClassifiedStatement],
    /// Position of the current statement in `statements`.
    pub index: usize,
    pub facts: TableFacts<'a>,
    pub thresholds: &'a Thresholds,
}

impl<'a> RuleContext<'a> {
    pub fn new(
        statements: &'a [ClassifiedStatement],
        index: usize,
        pg_version: u32,
        production: Option<&'a ProductionContext>,
        thresholds: &'a Thresholds,
    ) -> Self {
        let current = &statements[index];
        Self {
            lock: current.lock,
            sql: &current.parsed.sql,
            line: current.parsed.line,
            pg_version,
            statements,
            index,
            facts: TableFacts::resolve(production, current.stmt()),
            thresholds,
        }
    }

    pub fn table_stats(&self) -> Option<&'a TableStats> {
        self.facts.table_stats
    }

    pub fn affected_queries(&self) -> Option<&'a [AffectedQuery]> {
        self.facts.affected_queries
    }

    pub fn active_connections(&self) -> Option<u32> {
        self.facts.active_connections
    }

    /// Byte range of the current statement in the source.
    pub fn span(&self) -> Range<usize> {
        let parsed = &self.statements[self.index].parsed;
        parsed.offset..parsed.offset + parsed.length
    }

    /// Statements before the current one.
    pub fn previous(&self) -> &'a [ClassifiedStatement] {
        &self.statements[..self.index]
    }

    /// Index of the `BEGIN` opening the transaction the current statement
    /// runs in.
    fn open_transaction_start(&self) -> Option<usize> {
        let mut open = None;
        for (i, s) in self.previous().iter().enumerate() {
            match s.stmt() {
                Statement::Transaction(TransactionKind::Begin) => open = Some(i),
                Statement::Transaction(kind) if kind.ends_transaction() => open = None,
                _ => {}
            }
        }
        open
    }

    /// Whether an explicit transaction block is open.
    pub fn in_transaction(&self) -> bool {
        self.open_transaction_start().is_some()
    }

    /// Earlier statements of the open transaction, excluding its `BEGIN`.
    pub fn transaction_statements(&self) -> &'a [ClassifiedStatement] {
        match self.open_transaction_start() {
            Some(begin) => &self.statements[begin + 1..self.index],
            None => &[],
        }
    }

    /// Value of the most recent earlier `SET <name>`, in milliseconds.
    /// `Some(0)` when it was disabled or reset.
    fn timeout_ms(&self, name: &str) -> Option<u64> {
        self.previous().iter().rev().find_map(|s| match s.stmt() {
            Statement::VariableSet(set) if set.name == name => {
                Some(if set.is_reset() { 0 } else { set.duration_ms().unwrap_or(0) })
            }
            _ => None,
        })
    }

    /// Whether an earlier statement left a non-zero `lock_timeout` in place.
    pub fn has_lock_timeout(&self) -> bool {
        self.timeout_ms("lock_timeout").is_some_and(|ms| ms > 0)
    }

    pub fn has_statement_timeout(&self) -> bool {
        self.timeout_ms("statement_timeout").is_some_and(|ms| ms > 0)
    }

    fn earlier_create_table(&self, table: &QualifiedName) -> Option<&'a CreateTable> {
        self.previous().iter().find_map(|s| match s.stmt() {
            Statement::CreateTable(create) if create.name.matches(table) => Some(create),
            _ => None,
        })
    }

    /// Whether `table` was created earlier in this file.
    pub fn table_created_in_file(&self, table: &QualifiedName) -> bool {
        self.earlier_create_table(table).is_some()
    }

    /// Whether the statement's first target table already existed before
    /// this file. Statements without a table target return false.
    pub fn targets_existing_table(&self, stmt: &Statement) -> bool {
        extract_targets(stmt)
            .first()
            .is_some_and(|target| !self.table_created_in_file(&target.qualified_name()))
    }

    /// Whether `table` was created as a partitioned table earlier in this file.
    pub fn is_partitioned_in_file(&self, table: &QualifiedName) -> bool {
        self.earlier_create_table(table)
            .is_some_and(|create| create.partition_by.is_some())
    }

    /// Earlier `ALTER TABLE` subcommands on `table`.
    fn earlier_alter_cmds(&self, table: &QualifiedName) -> Vec<&'a AlterTableCmd> {
        self.previous()
            .iter()
            .filter_map(|s| match s.stmt() {
                Statement::AlterTable(alter) if alter.table.matches(table) => Some(&alter.cmds),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Whether a CHECK constraint on `table` is in force before this
    /// statement: added without NOT VALID, or validated afterwards.
    /// `filter` selects which CHECK bodies count.
    fn has_validated_check_where(
        &self,
        table: &QualifiedName,
        filter: impl Fn(&Expr) -> bool,
    ) -> bool {
        if let Some(create) = self.earlier_create_table(table) {
            let table_level = create.constraints.iter().any(|c| match &c.kind {
                ConstraintKind::Check(expr) => filter(expr),
                _ => false,
            });
            let column_level = create.columns.iter().any(|col| {
                col.constraints
                    .iter()
                    .any(|c| matches!(c, ColumnConstraint::Check(expr) if filter(expr)))
            });
            if table_level || column_level {
                return true;
            }
        }

        let mut pending: Vec<&str> = Vec::new();
        for cmd in self.earlier_alter_cmds(table) {
            match cmd {
                AlterTableCmd::AddConstraint(TableConstraint {
                    name,
                    kind: ConstraintKind::Check(expr),
                    not_valid,
                }) if filter(expr) => {
                    if !*not_valid {
                        return true;
                    }
                    if let Some(name) = name {
                        pending.push(name);
                    }
                }
                AlterTableCmd::ValidateConstraint { name } if pending.contains(&name.as_str()) => {
                    return true;
                }
                _ => {}
            }
        }
        false
    }

    /// Whether a validated `CHECK (column IS NOT NULL)` exists on `table`.
    pub fn has_validated_not_null_check(&self, table: &QualifiedName, column: &str) -> bool {
        self.has_validated_check_where(table, |expr| expr.is_not_null_check_for(column))
    }

    /// Whether any validated CHECK constraint exists on `table`.
    pub fn has_validated_check(&self, table: &QualifiedName) -> bool {
        self.has_validated_check_where(table, |_| true)
    }

    /// Whether an index, primary key or unique constraint created earlier
    /// in the file, or by the current statement, has `columns` as its
    /// leading columns.
    pub fn has_index_covering(&self, table: &QualifiedName, columns: &[String]) -> bool {
        let covers = |keys: &[String]| {
            keys.len() >= columns.len()
                && keys
                    .iter()
                    .zip(columns)
                    .all(|(key, col)| key.eq_ignore_ascii_case(col))
        };
        let single = |name: &str| covers(&[name.to_string()][..]);

        self.statements[..=self.index].iter().any(|s| match s.stmt() {
            Statement::CreateIndex(idx) => idx.table.matches(table) && covers(&idx.columns),
            Statement::CreateTable(create) if create.name.matches(table) => {
                create
                    .constraints
                    .iter()
                    .filter_map(TableConstraint::key_columns)
                    .any(|keys| covers(keys))
                    || create
                        .columns
                        .iter()
                        .any(|c| (c.is_primary_key() || c.is_unique()) && single(&c.name))
            }
            Statement::AlterTable(alter) if alter.table.matches(table) => {
                alter.cmds.iter().any(|cmd| match cmd {
                    AlterTableCmd::AddConstraint(constraint) => {
                        constraint.key_columns().is_some_and(|keys| covers(keys))
                    }
                    AlterTableCmd::AddColumn { column, .. } => {
                        (column.is_primary_key() || column.is_unique()) && single(&column.name)
                    }
                    _ => false,
                })
            }
            _ => false,
        })
    }

    /// Whether constraint `name` on `table` was added NOT VALID earlier in
    /// the open transaction.
    pub fn added_not_valid_in_transaction(&self, table: &QualifiedName, name: &str) -> bool {
        self.transaction_statements().iter().any(|s| match s.stmt() {
            Statement::AlterTable(alter) if alter.table.matches(table) => {
                alter.cmds.iter().any(|cmd| {
                    matches!(
                        cmd,
                        AlterTableCmd::AddConstraint(TableConstraint {
                            name: Some(added),
                            not_valid: true,
                            ..
                        }) if added == name
                    )
                })
            }
            _ => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::test_support::classified;

    fn with_ctx<T>(sql: &str, index: usize, f: impl FnOnce(&RuleContext<'_>) -> T) -> T {
        let statements = classified(sql, 17);
        let thresholds = Thresholds::default();
        let ctx = RuleContext::new(&statements, index, 17, None, &thresholds);
        f(&ctx)
    }

    #[test]
    fn test_transaction_tracking() {
        let sql = "BEGIN; CREATE TABLE a (id int); COMMIT; SELECT 1;";
        assert!(!with_ctx(sql, 0, |ctx| ctx.in_transaction()));
        assert!(with_ctx(sql, 1, |ctx| ctx.in_transaction()));
        assert!(with_ctx(sql, 2, |ctx| ctx.in_transaction()));
        assert!(!with_ctx(sql, 3, |ctx| ctx.in_transaction()));
        assert_eq!(with_ctx(sql, 2, |ctx| ctx.transaction_statements().len()), 1);
    }

    #[test]
    fn test_timeouts() {
        let sql = "SET lock_timeout = '2s'; SET statement_timeout = 0; SELECT 1; RESET lock_timeout; SELECT 1;";
        assert!(with_ctx(sql, 2, |ctx| ctx.has_lock_timeout()));
        assert!(!with_ctx(sql, 2, |ctx| ctx.has_statement_timeout()));
        assert!(!with_ctx(sql, 4, |ctx| ctx.has_lock_timeout()));
    }

    #[test]
    fn test_validated_not_null_check() {
        let table = QualifiedName::new("users");
        let sql = "ALTER TABLE users ADD CONSTRAINT c CHECK (email IS NOT NULL) NOT VALID;
                   SELECT 1;
                   ALTER TABLE users VALIDATE CONSTRAINT c;
                   SELECT 1;";
        assert!(!with_ctx(sql, 1, |ctx| ctx.has_validated_not_null_check(&table, "email")));
        assert!(with_ctx(sql, 3, |ctx| ctx.has_validated_not_null_check(&table, "email")));
        assert!(!with_ctx(sql, 3, |ctx| ctx.has_validated_not_null_check(&table, "name")));
    }

    #[test]
    fn test_index_covering() {
        let sql = "CREATE TABLE orders (id bigint PRIMARY KEY, user_id bigint, UNIQUE (user_id, id));
                   CREATE INDEX idx ON payments (order_id, created_at);
                   SELECT 1;";
        let cols = |c: &[&str]| c.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let orders = QualifiedName::new("orders");
        let payments = QualifiedName::new("payments");
        with_ctx(sql, 0, |ctx| {
            assert!(ctx.has_index_covering(&orders, &cols(&["id"])));
            assert!(ctx.has_index_covering(&orders, &cols(&["user_id"])));
            // Not created yet.
            assert!(!ctx.has_index_covering(&payments, &cols(&["order_id"])));
        });
        with_ctx(sql, 2, |ctx| {
            assert!(ctx.has_index_covering(&payments, &cols(&["order_id"])));
            assert!(!ctx.has_index_covering(&payments, &cols(&["created_at"])));
        });
    }

    #[test]
    fn test_table_created_in_file() {
        let sql = "CREATE TABLE app.events (id bigint) PARTITION BY RANGE (id); CREATE INDEX i ON events (id);";
        with_ctx(sql, 1, |ctx| {
            let events = QualifiedName::new("events");
            assert!(ctx.table_created_in_file(&events));
            assert!(ctx.is_partitioned_in_file(&events));
            assert!(!ctx.targets_existing_table(ctx.statements[1].stmt()));
        });
    }
}
