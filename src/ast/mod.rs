//! Statement tree produced by the SQL front-end.
//!
//! Every top-level SQL command maps onto one [`Statement`] variant. Commands
//! the analysis does not model in detail are kept as [`Statement::Other`] so
//! the lock classifier can still treat them conservatively.

mod ddl;
mod expr;
mod utility;

pub use ddl::*;
pub use expr::*;
pub use utility::*;

use std::fmt;

/// A possibly schema-qualified object name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedName {
    pub schema: Option<String>,
    pub name: String,
}

impl QualifiedName {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    pub fn with_schema(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }

    /// Whether two names can refer to the same relation.
    ///
    /// An unqualified name matches any schema, since the search path is not
    /// known statically.
    pub fn matches(&self, other: &QualifiedName) -> bool {
        if self.name != other.name {
            return false;
        }
        match (&self.schema, &other.schema) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Kind of object addressed by DROP / RENAME.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Table,
    Index,
    View,
    MaterializedView,
    Sequence,
    Schema,
    Database,
    Type,
    Domain,
    Extension,
    Function,
    Trigger,
    Other,
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObjectType::Table => "TABLE",
            ObjectType::Index => "INDEX",
            ObjectType::View => "VIEW",
            ObjectType::MaterializedView => "MATERIALIZED VIEW",
            ObjectType::Sequence => "SEQUENCE",
            ObjectType::Schema => "SCHEMA",
            ObjectType::Database => "DATABASE",
            ObjectType::Type => "TYPE",
            ObjectType::Domain => "DOMAIN",
            ObjectType::Extension => "EXTENSION",
            ObjectType::Function => "FUNCTION",
            ObjectType::Trigger => "TRIGGER",
            ObjectType::Other => "OBJECT",
        };
        write!(f, "{}", s)
    }
}

/// A top-level SQL statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateIndex(CreateIndex),
    CreateTable(CreateTable),
    AlterTable(AlterTable),
    Drop(DropObject),
    Rename(Rename),
    Truncate(Truncate),
    Vacuum(Vacuum),
    Analyze(Analyze),
    Reindex(Reindex),
    Cluster(Cluster),
    RefreshMaterializedView(RefreshMaterializedView),
    VariableSet(VariableSet),
    VariableShow(VariableShow),
    Transaction(TransactionKind),
    CreateDomain(CreateDomain),
    AlterDomain(AlterDomain),
    CreateSequence(CreateSequence),
    CreateEnum(CreateEnum),
    AlterEnum(AlterEnum),
    CreateTrigger(CreateTrigger),
    CreateExtension(CreateExtension),
    CreateView(CreateView),
    LockTable(LockTable),
    Update(Update),
    Delete(Delete),
    Insert(Insert),
    /// A valid command the analysis does not model, e.g. `GRANT` or
    /// `CREATE FUNCTION`. `command` holds its leading keywords, uppercased.
    Other { command: String },
}

impl Statement {
    /// Short uppercase description of the command, e.g. `ALTER TABLE`.
    pub fn kind(&self) -> String {
        match self {
            Statement::CreateIndex(_) => "CREATE INDEX".into(),
            Statement::CreateTable(_) => "CREATE TABLE".into(),
            Statement::AlterTable(_) => "ALTER TABLE".into(),
            Statement::Drop(d) => format!("DROP {}", d.object_type),
            Statement::Rename(r) => format!("ALTER {} RENAME", r.object_type),
            Statement::Truncate(_) => "TRUNCATE".into(),
            Statement::Vacuum(_) => "VACUUM".into(),
            Statement::Analyze(_) => "ANALYZE".into(),
            Statement::Reindex(_) => "REINDEX".into(),
            Statement::Cluster(_) => "CLUSTER".into(),
            Statement::RefreshMaterializedView(_) => "REFRESH MATERIALIZED VIEW".into(),
            Statement::VariableSet(_) => "SET".into(),
            Statement::VariableShow(_) => "SHOW".into(),
            Statement::Transaction(kind) => kind.to_string(),
            Statement::CreateDomain(_) => "CREATE DOMAIN".into(),
            Statement::AlterDomain(_) => "ALTER DOMAIN".into(),
            Statement::CreateSequence(_) => "CREATE SEQUENCE".into(),
            Statement::CreateEnum(_) => "CREATE TYPE".into(),
            Statement::AlterEnum(_) => "ALTER TYPE".into(),
            Statement::CreateTrigger(_) => "CREATE TRIGGER".into(),
            Statement::CreateExtension(_) => "CREATE EXTENSION".into(),
            Statement::CreateView(v) if v.materialized => "CREATE MATERIALIZED VIEW".into(),
            Statement::CreateView(_) => "CREATE VIEW".into(),
            Statement::LockTable(_) => "LOCK TABLE".into(),
            Statement::Update(_) => "UPDATE".into(),
            Statement::Delete(_) => "DELETE".into(),
            Statement::Insert(_) => "INSERT".into(),
            Statement::Other { command } => command.clone(),
        }
    }

    /// Whether the statement changes schema objects.
    pub fn is_ddl(&self) -> bool {
        match self {
            Statement::CreateIndex(_)
            | Statement::CreateTable(_)
            | Statement::AlterTable(_)
            | Statement::Drop(_)
            | Statement::Rename(_)
            | Statement::Truncate(_)
            | Statement::Reindex(_)
            | Statement::Cluster(_)
            | Statement::RefreshMaterializedView(_)
            | Statement::CreateDomain(_)
            | Statement::AlterDomain(_)
            | Statement::CreateSequence(_)
            | Statement::CreateEnum(_)
            | Statement::AlterEnum(_)
            | Statement::CreateTrigger(_)
            | Statement::CreateExtension(_)
            | Statement::CreateView(_) => true,
            Statement::Other { command } => {
                command.starts_with("CREATE")
                    || command.starts_with("ALTER")
                    || command.starts_with("DROP")
            }
            Statement::Vacuum(_)
            | Statement::Analyze(_)
            | Statement::VariableSet(_)
            | Statement::VariableShow(_)
            | Statement::Transaction(_)
            | Statement::LockTable(_)
            | Statement::Update(_)
            | Statement::Delete(_)
            | Statement::Insert(_) => false,
        }
    }

    /// Whether the statement reads or writes rows rather than schema.
    pub fn is_dml(&self) -> bool {
        matches!(
            self,
            Statement::Update(_) | Statement::Delete(_) | Statement::Insert(_)
        )
    }
}

/// A statement together with its location in the migration source.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedStatement {
    pub stmt: Statement,
    /// Byte offset of the first token.
    pub offset: usize,
    /// Byte length up to (excluding) the terminating semicolon.
    pub length: usize,
    /// 1-based line of the first token.
    pub line: usize,
    /// Source text of the statement.
    pub sql: String,
}
