//! Schema-changing statements: CREATE / ALTER / DROP and friends.

use std::fmt;

use super::{Expr, ObjectType, QualifiedName};

/// A column data type, with aliases folded to one canonical spelling
/// (`int4` and `integer` are both `integer`, `character varying` is `varchar`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataType {
    pub name: String,
    /// Type modifiers as written, e.g. `["255"]` for `varchar(255)`.
    pub modifiers: Vec<String>,
    pub array: bool,
}

impl DataType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: canonical_type_name(&name.into()),
            modifiers: Vec::new(),
            array: false,
        }
    }

    pub fn with_modifiers(mut self, modifiers: Vec<String>) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn is(&self, name: &str) -> bool {
        self.name == name
    }

    pub fn is_serial(&self) -> bool {
        matches!(self.name.as_str(), "serial" | "bigserial" | "smallserial")
    }

    /// `varchar(n)`; an unbounded `varchar` behaves like `text`.
    pub fn is_bounded_varchar(&self) -> bool {
        self.name == "varchar" && !self.modifiers.is_empty()
    }

    pub fn is_char(&self) -> bool {
        self.name == "char"
    }

    pub fn is_timestamp_without_tz(&self) -> bool {
        self.name == "timestamp"
    }

    /// 16/32-bit integer types, including their serial forms.
    pub fn is_small_integer(&self) -> bool {
        matches!(
            self.name.as_str(),
            "smallint" | "integer" | "serial" | "smallserial"
        )
    }

    /// Types that cap the values they accept; converting to one can fail or truncate.
    pub fn is_bounded(&self) -> bool {
        match self.name.as_str() {
            "varchar" | "bit varying" => !self.modifiers.is_empty(),
            "char" | "smallint" | "integer" | "real" | "bit" => true,
            "numeric" => !self.modifiers.is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.modifiers.is_empty() {
            write!(f, "({})", self.modifiers.join(","))?;
        }
        if self.array {
            write!(f, "[]")?;
        }
        Ok(())
    }
}

/// Fold PostgreSQL type aliases to one spelling.
pub fn canonical_type_name(name: &str) -> String {
    let lower = name.to_lowercase();
    let folded = match lower.as_str() {
        "int" | "int4" | "integer" => "integer",
        "int8" | "bigint" => "bigint",
        "int2" | "smallint" => "smallint",
        "serial" | "serial4" => "serial",
        "bigserial" | "serial8" => "bigserial",
        "smallserial" | "serial2" => "smallserial",
        "varchar" | "character varying" => "varchar",
        "char" | "character" | "bpchar" => "char",
        "timestamp" | "timestamp without time zone" => "timestamp",
        "timestamptz" | "timestamp with time zone" => "timestamptz",
        "time" | "time without time zone" => "time",
        "timetz" | "time with time zone" => "timetz",
        "float8" | "double precision" | "float" => "double precision",
        "float4" | "real" => "real",
        "bool" | "boolean" => "boolean",
        "decimal" | "numeric" => "numeric",
        "varbit" | "bit varying" => "bit varying",
        other => other,
    };
    folded.to_string()
}

/// Inline column constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnConstraint {
    NotNull,
    Null,
    Default(Expr),
    PrimaryKey,
    Unique,
    Check(Expr),
    References {
        table: QualifiedName,
        columns: Vec<String>,
        on_delete: Option<String>,
    },
    /// `GENERATED ALWAYS AS (expr) STORED`
    Generated(Expr),
    /// `GENERATED { ALWAYS | BY DEFAULT } AS IDENTITY`
    Identity,
}

/// Column definition in CREATE TABLE or ADD COLUMN.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub constraints: Vec<ColumnConstraint>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            constraints: Vec::new(),
        }
    }

    pub fn default_expr(&self) -> Option<&Expr> {
        self.constraints.iter().find_map(|c| match c {
            ColumnConstraint::Default(e) => Some(e),
            _ => None,
        })
    }

    /// A default other than an explicit `DEFAULT NULL`.
    pub fn has_default(&self) -> bool {
        self.default_expr().is_some_and(|e| !e.is_null())
    }

    pub fn is_not_null(&self) -> bool {
        self.constraints
            .iter()
            .any(|c| matches!(c, ColumnConstraint::NotNull | ColumnConstraint::PrimaryKey))
    }

    pub fn is_primary_key(&self) -> bool {
        self.constraints.contains(&ColumnConstraint::PrimaryKey)
    }

    pub fn is_unique(&self) -> bool {
        self.constraints.contains(&ColumnConstraint::Unique)
    }

    pub fn is_identity(&self) -> bool {
        self.constraints.contains(&ColumnConstraint::Identity)
    }

    pub fn generated_expr(&self) -> Option<&Expr> {
        self.constraints.iter().find_map(|c| match c {
            ColumnConstraint::Generated(e) => Some(e),
            _ => None,
        })
    }

    pub fn references(&self) -> Option<&QualifiedName> {
        self.constraints.iter().find_map(|c| match c {
            ColumnConstraint::References { table, .. } => Some(table),
            _ => None,
        })
    }
}

/// Table-level constraint body.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstraintKind {
    PrimaryKey {
        columns: Vec<String>,
        using_index: Option<String>,
    },
    Unique {
        columns: Vec<String>,
        using_index: Option<String>,
    },
    Check(Expr),
    ForeignKey {
        columns: Vec<String>,
        ref_table: QualifiedName,
        ref_columns: Vec<String>,
        on_delete: Option<String>,
    },
    /// `EXCLUDE USING ...`, kept as source text.
    Exclude(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableConstraint {
    pub name: Option<String>,
    pub kind: ConstraintKind,
    /// `NOT VALID`: existing rows are not checked when the constraint is added.
    pub not_valid: bool,
}

impl TableConstraint {
    pub fn new(kind: ConstraintKind) -> Self {
        Self {
            name: None,
            kind,
            not_valid: false,
        }
    }

    /// Columns that a unique index backs, for PRIMARY KEY / UNIQUE.
    pub fn key_columns(&self) -> Option<&[String]> {
        match &self.kind {
            ConstraintKind::PrimaryKey { columns, .. } | ConstraintKind::Unique { columns, .. } => {
                Some(columns)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateIndex {
    pub name: Option<String>,
    pub table: QualifiedName,
    pub unique: bool,
    pub concurrently: bool,
    pub if_not_exists: bool,
    /// Access method from `USING`, lowercased.
    pub method: Option<String>,
    /// Index elements: the column name for plain columns, source text for expressions.
    pub columns: Vec<String>,
    pub predicate: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CreateTable {
    pub name: QualifiedName,
    pub if_not_exists: bool,
    pub temporary: bool,
    pub unlogged: bool,
    pub columns: Vec<ColumnDef>,
    pub constraints: Vec<TableConstraint>,
    /// Partition key columns from `PARTITION BY`.
    pub partition_by: Option<Vec<String>>,
    /// Parent table from `PARTITION OF`.
    pub partition_of: Option<QualifiedName>,
    /// `CREATE TABLE ... AS query`
    pub as_query: bool,
}

impl Default for QualifiedName {
    fn default() -> Self {
        QualifiedName::new("")
    }
}

impl CreateTable {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Columns of the primary key, whether declared inline or as a table constraint.
    pub fn primary_key(&self) -> Option<Vec<String>> {
        let inline: Vec<String> = self
            .columns
            .iter()
            .filter(|c| c.is_primary_key())
            .map(|c| c.name.clone())
            .collect();
        if !inline.is_empty() {
            return Some(inline);
        }
        self.constraints.iter().find_map(|c| match &c.kind {
            ConstraintKind::PrimaryKey { columns, .. } => Some(columns.clone()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlterTable {
    pub table: QualifiedName,
    pub if_exists: bool,
    pub cmds: Vec<AlterTableCmd>,
}

/// One subcommand of `ALTER TABLE`.
#[derive(Debug, Clone, PartialEq)]
pub enum AlterTableCmd {
    AddColumn {
        column: ColumnDef,
        if_not_exists: bool,
    },
    DropColumn {
        column: String,
        if_exists: bool,
        cascade: bool,
    },
    AlterColumnType {
        column: String,
        data_type: DataType,
        using: Option<Expr>,
    },
    SetNotNull {
        column: String,
    },
    DropNotNull {
        column: String,
    },
    SetDefault {
        column: String,
        default: Expr,
    },
    DropDefault {
        column: String,
    },
    SetStatistics {
        column: String,
    },
    AddConstraint(TableConstraint),
    ValidateConstraint {
        name: String,
    },
    DropConstraint {
        name: String,
        if_exists: bool,
        cascade: bool,
    },
    AttachPartition {
        partition: QualifiedName,
    },
    DetachPartition {
        partition: QualifiedName,
        concurrently: bool,
    },
    SetLogged,
    SetUnlogged,
    SetTablespace {
        tablespace: String,
    },
    EnableTrigger {
        name: String,
    },
    DisableTrigger {
        name: String,
    },
    /// Subcommand the grammar does not model, kept as source text.
    Other {
        raw: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenameKind {
    /// `RENAME TO new_name` on the object itself.
    Object { new_name: String },
    Column { from: String, to: String },
    Constraint { from: String, to: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rename {
    pub object_type: ObjectType,
    pub target: QualifiedName,
    pub kind: RenameKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DropObject {
    pub object_type: ObjectType,
    pub names: Vec<QualifiedName>,
    pub if_exists: bool,
    pub concurrently: bool,
    pub cascade: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Truncate {
    pub tables: Vec<QualifiedName>,
    pub cascade: bool,
    pub restart_identity: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateDomain {
    pub name: QualifiedName,
    pub data_type: DataType,
    pub not_null: bool,
    pub checks: Vec<Expr>,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlterDomain {
    pub name: QualifiedName,
    pub action: AlterDomainAction,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlterDomainAction {
    AddConstraint {
        name: Option<String>,
        check: Option<Expr>,
        not_valid: bool,
    },
    DropConstraint {
        name: String,
        cascade: bool,
    },
    ValidateConstraint {
        name: String,
    },
    SetDefault(Expr),
    DropDefault,
    SetNotNull,
    DropNotNull,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateSequence {
    pub name: QualifiedName,
    pub if_not_exists: bool,
    pub data_type: Option<DataType>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateEnum {
    pub name: QualifiedName,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlterEnum {
    pub name: QualifiedName,
    pub action: AlterEnumAction,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlterEnumAction {
    AddValue { value: String, if_not_exists: bool },
    RenameValue { from: String, to: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTrigger {
    pub name: String,
    pub table: QualifiedName,
    pub or_replace: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateExtension {
    pub name: String,
    pub if_not_exists: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateView {
    pub name: QualifiedName,
    pub materialized: bool,
    pub or_replace: bool,
    pub if_not_exists: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_type_names() {
        assert_eq!(DataType::new("INT4").name, "integer");
        assert_eq!(DataType::new("character varying").name, "varchar");
        assert_eq!(DataType::new("timestamp with time zone").name, "timestamptz");
        assert_eq!(DataType::new("jsonb").name, "jsonb");
    }

    #[test]
    fn test_bounded_types() {
        let varchar = DataType::new("varchar").with_modifiers(vec!["64".into()]);
        assert!(varchar.is_bounded_varchar());
        assert!(varchar.is_bounded());
        assert!(!DataType::new("varchar").is_bounded());
        assert!(!DataType::new("text").is_bounded());
        assert!(DataType::new("smallint").is_bounded());
        assert_eq!(varchar.to_string(), "varchar(64)");
    }

    #[test]
    fn test_primary_key_lookup() {
        let mut id = ColumnDef::new("id", DataType::new("bigint"));
        id.constraints.push(ColumnConstraint::PrimaryKey);
        let table = CreateTable {
            name: QualifiedName::new("users"),
            columns: vec![id, ColumnDef::new("email", DataType::new("text"))],
            ..Default::default()
        };
        assert_eq!(table.primary_key(), Some(vec!["id".to_string()]));
        assert!(table.column("email").is_some());
    }
}
