//! Maintenance, session and data-modifying statements.

use std::fmt;

use super::QualifiedName;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Vacuum {
    pub full: bool,
    pub analyze: bool,
    pub tables: Vec<QualifiedName>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Analyze {
    pub tables: Vec<QualifiedName>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReindexTarget {
    Index,
    Table,
    Schema,
    Database,
    System,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reindex {
    pub target: ReindexTarget,
    pub name: QualifiedName,
    pub concurrently: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Cluster {
    pub table: Option<QualifiedName>,
    pub index: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshMaterializedView {
    pub name: QualifiedName,
    pub concurrently: bool,
}

/// `SET`, `SET LOCAL` and `RESET`. A reset is recorded with the value `DEFAULT`.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableSet {
    /// Parameter name, lowercased.
    pub name: String,
    /// Value as written, with surrounding quotes removed.
    pub value: String,
    pub local: bool,
}

impl VariableSet {
    pub fn is_reset(&self) -> bool {
        self.value.eq_ignore_ascii_case("default")
    }

    /// Parse a timeout value into milliseconds.
    ///
    /// Bare numbers are milliseconds; `ms`, `s`, `min`, `h` and `d` units are
    /// accepted with or without a space. Returns `None` for anything else.
    pub fn duration_ms(&self) -> Option<u64> {
        parse_duration_ms(&self.value)
    }
}

pub fn parse_duration_ms(value: &str) -> Option<u64> {
    let value = value.trim().to_lowercase();
    let split = value
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let number: f64 = number.parse().ok()?;
    let factor = match unit.trim() {
        "" | "ms" => 1.0,
        "s" => 1_000.0,
        "min" => 60_000.0,
        "h" => 3_600_000.0,
        "d" => 86_400_000.0,
        _ => return None,
    };
    Some((number * factor) as u64)
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableShow {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionKind {
    Begin,
    Commit,
    Rollback,
    Savepoint(String),
    ReleaseSavepoint(String),
    RollbackToSavepoint(String),
}

impl TransactionKind {
    /// Whether this statement closes the current transaction block.
    pub fn ends_transaction(&self) -> bool {
        matches!(self, TransactionKind::Commit | TransactionKind::Rollback)
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKind::Begin => write!(f, "BEGIN"),
            TransactionKind::Commit => write!(f, "COMMIT"),
            TransactionKind::Rollback => write!(f, "ROLLBACK"),
            TransactionKind::Savepoint(_) => write!(f, "SAVEPOINT"),
            TransactionKind::ReleaseSavepoint(_) => write!(f, "RELEASE SAVEPOINT"),
            TransactionKind::RollbackToSavepoint(_) => write!(f, "ROLLBACK TO SAVEPOINT"),
        }
    }
}

/// Table lock modes accepted by `LOCK TABLE ... IN <mode> MODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TableLockMode {
    AccessShare,
    RowShare,
    RowExclusive,
    ShareUpdateExclusive,
    Share,
    ShareRowExclusive,
    Exclusive,
    #[default]
    AccessExclusive,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LockTable {
    pub tables: Vec<QualifiedName>,
    pub mode: TableLockMode,
    pub nowait: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: QualifiedName,
    pub has_where: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub table: QualifiedName,
    pub has_where: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub table: QualifiedName,
}
