//! Lock classification.
//!
//! Maps a parsed statement to the table-level lock PostgreSQL takes for it,
//! whether that lock blocks readers and/or writers, and whether it is held
//! for a long time (table rewrite or full scan).
//!
//! ```text
//! ACCESS SHARE < ROW EXCLUSIVE < SHARE UPDATE EXCLUSIVE < SHARE
//!              < SHARE ROW EXCLUSIVE < ACCESS EXCLUSIVE
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ast::*;

/// Canonical lock levels, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LockType {
    #[serde(rename = "ACCESS SHARE")]
    AccessShare = 0,
    #[serde(rename = "ROW EXCLUSIVE")]
    RowExclusive = 1,
    #[serde(rename = "SHARE UPDATE EXCLUSIVE")]
    ShareUpdateExclusive = 2,
    #[serde(rename = "SHARE")]
    Share = 3,
    #[serde(rename = "SHARE ROW EXCLUSIVE")]
    ShareRowExclusive = 4,
    #[serde(rename = "ACCESS EXCLUSIVE")]
    AccessExclusive = 5,
}

impl LockType {
    pub const ALL: [LockType; 6] = [
        LockType::AccessShare,
        LockType::RowExclusive,
        LockType::ShareUpdateExclusive,
        LockType::Share,
        LockType::ShareRowExclusive,
        LockType::AccessExclusive,
    ];

    /// Severity rank, 0 (ACCESS SHARE) to 5 (ACCESS EXCLUSIVE).
    pub fn rank(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LockType::AccessShare => "ACCESS SHARE",
            LockType::RowExclusive => "ROW EXCLUSIVE",
            LockType::ShareUpdateExclusive => "SHARE UPDATE EXCLUSIVE",
            LockType::Share => "SHARE",
            LockType::ShareRowExclusive => "SHARE ROW EXCLUSIVE",
            LockType::AccessExclusive => "ACCESS EXCLUSIVE",
        }
    }
}

impl fmt::Display for LockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The lock a statement takes and its effect on concurrent traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockClassification {
    pub lock_type: LockType,
    pub blocks_reads: bool,
    pub blocks_writes: bool,
    /// Held for the duration of a rewrite or full-table scan rather than
    /// a catalog update.
    pub long_held: bool,
}

impl LockClassification {
    pub const fn new(
        lock_type: LockType,
        blocks_reads: bool,
        blocks_writes: bool,
        long_held: bool,
    ) -> Self {
        Self {
            lock_type,
            blocks_reads,
            blocks_writes,
            long_held,
        }
    }

    /// ACCESS EXCLUSIVE, blocking everything, short.
    pub const fn conservative() -> Self {
        Self::new(LockType::AccessExclusive, true, true, false)
    }

    const fn access_share() -> Self {
        Self::new(LockType::AccessShare, false, false, false)
    }

    const fn share_update_exclusive() -> Self {
        Self::new(LockType::ShareUpdateExclusive, false, false, false)
    }

    /// Ordering key for picking the worst of several locks.
    pub fn severity_rank(&self) -> u8 {
        self.lock_type.rank() + if self.long_held { 10 } else { 0 }
    }

    /// Whether concurrent reads or writes have to wait.
    pub fn is_blocking(&self) -> bool {
        self.blocks_reads || self.blocks_writes
    }
}

/// Commands accepted as [`Statement::Other`] that only read.
const READ_ONLY_COMMANDS: &[&str] = &[
    "SELECT", "VALUES", "TABLE", "EXPLAIN", "NOTIFY", "LISTEN", "UNLISTEN", "DISCARD", "PREPARE",
    "DEALLOCATE", "FETCH", "DECLARE", "CLOSE", "MOVE", "CHECKPOINT", "LOAD",
];

/// Classify the lock taken by `stmt` on PostgreSQL `pg_version`.
pub fn classify(stmt: &Statement, pg_version: u32) -> LockClassification {
    use LockType::*;

    match stmt {
        Statement::CreateIndex(idx) if idx.concurrently => {
            LockClassification::share_update_exclusive()
        }
        Statement::CreateIndex(_) => LockClassification::new(Share, false, true, true),

        Statement::AlterTable(alter) => alter
            .cmds
            .iter()
            .map(|cmd| classify_alter_cmd(cmd, pg_version))
            .fold(None, |worst: Option<LockClassification>, lock| match worst {
                Some(w) if w.severity_rank() >= lock.severity_rank() => Some(w),
                _ => Some(lock),
            })
            .unwrap_or_else(LockClassification::conservative),

        Statement::Vacuum(v) if v.full => LockClassification::new(AccessExclusive, true, true, true),
        Statement::Vacuum(_) | Statement::Analyze(_) => {
            LockClassification::share_update_exclusive()
        }

        Statement::VariableSet(_) | Statement::VariableShow(_) | Statement::Transaction(_) => {
            LockClassification::access_share()
        }

        Statement::CreateTable(_) => LockClassification::new(AccessExclusive, false, false, false),

        Statement::Drop(d) if d.concurrently => LockClassification::share_update_exclusive(),
        Statement::Drop(_) => LockClassification::conservative(),

        Statement::Reindex(r) if r.concurrently => LockClassification::share_update_exclusive(),
        Statement::Reindex(_) => LockClassification::new(Share, false, true, true),

        Statement::Cluster(_) => LockClassification::new(AccessExclusive, true, true, true),
        Statement::RefreshMaterializedView(r) if r.concurrently => {
            LockClassification::new(ShareRowExclusive, false, true, true)
        }
        Statement::RefreshMaterializedView(_) => {
            LockClassification::new(AccessExclusive, true, true, true)
        }
        Statement::Truncate(_) => LockClassification::conservative(),

        Statement::CreateDomain(_) | Statement::AlterDomain(_) | Statement::CreateTrigger(_) => {
            LockClassification::new(ShareRowExclusive, false, true, false)
        }

        Statement::Update(u) => LockClassification::new(RowExclusive, false, false, !u.has_where),
        Statement::Delete(d) => LockClassification::new(RowExclusive, false, false, !d.has_where),
        Statement::Insert(_) => LockClassification::new(RowExclusive, false, false, false),

        Statement::LockTable(lock) => classify_lock_mode(lock.mode),

        Statement::Other { command } if READ_ONLY_COMMANDS.contains(&command.as_str()) => {
            LockClassification::access_share()
        }

        Statement::Rename(_)
        | Statement::CreateSequence(_)
        | Statement::CreateEnum(_)
        | Statement::AlterEnum(_)
        | Statement::CreateExtension(_)
        | Statement::CreateView(_)
        | Statement::Other { .. } => LockClassification::conservative(),
    }
}

fn classify_alter_cmd(cmd: &AlterTableCmd, pg_version: u32) -> LockClassification {
    use LockType::*;

    match cmd {
        AlterTableCmd::AddColumn { column, .. } => {
            LockClassification::new(AccessExclusive, true, true, add_column_rewrites(column, pg_version))
        }
        AlterTableCmd::DropColumn { .. } | AlterTableCmd::DropConstraint { .. } => {
            LockClassification::conservative()
        }
        AlterTableCmd::AlterColumnType { .. }
        | AlterTableCmd::SetNotNull { .. }
        | AlterTableCmd::SetLogged
        | AlterTableCmd::SetUnlogged
        | AlterTableCmd::SetTablespace { .. } => {
            LockClassification::new(AccessExclusive, true, true, true)
        }
        AlterTableCmd::AddConstraint(constraint) => {
            LockClassification::new(AccessExclusive, true, true, !constraint.not_valid)
        }
        AlterTableCmd::ValidateConstraint { .. }
        | AlterTableCmd::SetStatistics { .. }
        | AlterTableCmd::AttachPartition { .. } => LockClassification::share_update_exclusive(),
        AlterTableCmd::DetachPartition { concurrently: true, .. } => {
            LockClassification::share_update_exclusive()
        }
        AlterTableCmd::EnableTrigger { .. } | AlterTableCmd::DisableTrigger { .. } => {
            LockClassification::new(ShareRowExclusive, false, true, false)
        }
        AlterTableCmd::DetachPartition { .. }
        | AlterTableCmd::DropNotNull { .. }
        | AlterTableCmd::SetDefault { .. }
        | AlterTableCmd::DropDefault { .. }
        | AlterTableCmd::Other { .. } => LockClassification::conservative(),
    }
}

/// Whether adding this column rewrites the table: any default before
/// PostgreSQL 11, and afterwards only a volatile one. Serial and stored
/// generated columns compute a value per row and always rewrite.
pub fn add_column_rewrites(column: &ColumnDef, pg_version: u32) -> bool {
    if column.data_type.is_serial() || column.generated_expr().is_some() {
        return true;
    }
    match column.default_expr() {
        Some(default) if !default.is_null() => pg_version < 11 || default.is_volatile(),
        _ => false,
    }
}

/// `LOCK TABLE` modes folded onto the canonical levels. EXCLUSIVE still
/// admits plain reads, like SHARE ROW EXCLUSIVE.
fn classify_lock_mode(mode: TableLockMode) -> LockClassification {
    use LockType::*;

    match mode {
        TableLockMode::AccessShare => LockClassification::new(AccessShare, false, false, true),
        TableLockMode::RowShare | TableLockMode::RowExclusive => {
            LockClassification::new(RowExclusive, false, false, true)
        }
        TableLockMode::ShareUpdateExclusive => {
            LockClassification::new(ShareUpdateExclusive, false, false, true)
        }
        TableLockMode::Share => LockClassification::new(Share, false, true, true),
        TableLockMode::ShareRowExclusive | TableLockMode::Exclusive => {
            LockClassification::new(ShareRowExclusive, false, true, true)
        }
        TableLockMode::AccessExclusive => LockClassification::new(AccessExclusive, true, true, true),
    }
}
