//! ALTER statements.

use nom::{
    branch::alt,
    combinator::{cut, map, opt, value, verify},
    multi::separated_list1,
    sequence::{pair, preceded, separated_pair, terminated, tuple},
};

use super::base::{
    expr, expr_until, flag, ident, keyword, keyword_in, keywords, paren_expr, punct,
    qualified_name, raw, rest, skip_element, string_literal, with_raw, word, PResult, Tokens,
};
use super::create::{column_def, table_constraint};
use super::{drop_behavior, if_exists, if_not_exists, other, types::data_type};
use crate::ast::*;

/// Everything after `ALTER`.
pub(super) fn alter(input: Tokens<'_>) -> PResult<'_, Statement> {
    alt((
        preceded(keyword("TABLE"), cut(alter_table)),
        preceded(keyword("DOMAIN"), cut(alter_domain)),
        preceded(keyword("TYPE"), cut(alter_type)),
        preceded(keyword("INDEX"), cut(alter_object(ObjectType::Index, "ALTER INDEX"))),
        preceded(
            keyword("SEQUENCE"),
            cut(alter_object(ObjectType::Sequence, "ALTER SEQUENCE")),
        ),
        preceded(keyword("VIEW"), cut(alter_object(ObjectType::View, "ALTER VIEW"))),
        preceded(keyword("SCHEMA"), cut(alter_object(ObjectType::Schema, "ALTER SCHEMA"))),
        preceded(
            keywords(&["MATERIALIZED", "VIEW"]),
            cut(alter_object(
                ObjectType::MaterializedView,
                "ALTER MATERIALIZED VIEW",
            )),
        ),
        alter_other,
    ))(input)
}

fn alter_other(input: Tokens<'_>) -> PResult<'_, Statement> {
    let (input, object) = word(input)?;
    other(format!("ALTER {}", object.to_ascii_uppercase()))(input)
}

/// `ALTER INDEX | VIEW | ... name`; only renames are modelled.
fn alter_object<'a>(
    object_type: ObjectType,
    command: &'static str,
) -> impl FnMut(Tokens<'a>) -> PResult<'a, Statement> {
    move |input| {
        let (input, _) = if_exists(input)?;
        let (input, target) = qualified_name(input)?;
        alt((
            preceded(keyword("RENAME"), cut(rename(object_type, target))),
            other(command.to_string()),
        ))(input)
    }
}

fn rename<'a>(
    object_type: ObjectType,
    target: QualifiedName,
) -> impl FnMut(Tokens<'a>) -> PResult<'a, Statement> {
    move |input| {
        let renamed = |input: Tokens<'a>| separated_pair(ident, keyword("TO"), ident)(input);
        let (input, kind) = alt((
            map(preceded(keyword("TO"), ident), |new_name| RenameKind::Object { new_name }),
            map(preceded(keyword("CONSTRAINT"), cut(renamed)), |(from, to)| {
                RenameKind::Constraint { from, to }
            }),
            map(preceded(opt(keyword("COLUMN")), renamed), |(from, to)| {
                RenameKind::Column { from, to }
            }),
        ))(input)?;
        Ok((
            input,
            Statement::Rename(Rename {
                object_type,
                target: target.clone(),
                kind,
            }),
        ))
    }
}

fn alter_table(input: Tokens<'_>) -> PResult<'_, Statement> {
    let (input, if_exists) = if_exists(input)?;
    let (input, _) = opt(keyword("ONLY"))(input)?;
    let (input, table) = qualified_name(input)?;
    let (input, _) = opt(punct("*"))(input)?;
    alt((
        preceded(keyword("RENAME"), cut(rename(ObjectType::Table, table.clone()))),
        map(separated_list1(punct(","), alter_table_cmd), |cmds| {
            Statement::AlterTable(AlterTable {
                table: table.clone(),
                if_exists,
                cmds,
            })
        }),
    ))(input)
}

/// One subcommand. A recognized leading keyword commits to its form; an
/// unrecognized one is kept raw up to the next top-level comma.
fn alter_table_cmd(input: Tokens<'_>) -> PResult<'_, AlterTableCmd> {
    alt((
        preceded(keyword("ADD"), cut(add_cmd)),
        preceded(keyword("DROP"), cut(drop_cmd)),
        map(
            with_raw(preceded(keyword("ALTER"), cut(alter_column))),
            |(raw, cmd)| cmd.unwrap_or_else(|| AlterTableCmd::Other { raw: raw.to_string() }),
        ),
        map(
            preceded(keywords(&["VALIDATE", "CONSTRAINT"]), cut(ident)),
            |name| AlterTableCmd::ValidateConstraint { name },
        ),
        map(
            preceded(
                keywords(&["ATTACH", "PARTITION"]),
                cut(terminated(qualified_name, skip_element)),
            ),
            |partition| AlterTableCmd::AttachPartition { partition },
        ),
        map(
            preceded(
                keywords(&["DETACH", "PARTITION"]),
                cut(tuple((
                    qualified_name,
                    flag(keyword("CONCURRENTLY")),
                    opt(keyword("FINALIZE")),
                ))),
            ),
            |(partition, concurrently, _)| AlterTableCmd::DetachPartition {
                partition,
                concurrently,
            },
        ),
        value(AlterTableCmd::SetLogged, keywords(&["SET", "LOGGED"])),
        value(AlterTableCmd::SetUnlogged, keywords(&["SET", "UNLOGGED"])),
        map(
            preceded(
                keywords(&["SET", "TABLESPACE"]),
                cut(terminated(ident, opt(keyword("NOWAIT")))),
            ),
            |tablespace| AlterTableCmd::SetTablespace { tablespace },
        ),
        map(
            preceded(
                tuple((
                    keyword("ENABLE"),
                    opt(keyword_in(&["ALWAYS", "REPLICA"])),
                    keyword("TRIGGER"),
                )),
                cut(ident),
            ),
            |name| AlterTableCmd::EnableTrigger { name },
        ),
        map(
            preceded(keywords(&["DISABLE", "TRIGGER"]), cut(ident)),
            |name| AlterTableCmd::DisableTrigger { name },
        ),
        map(
            verify(raw(skip_element), |text: &str| !text.is_empty()),
            |text| AlterTableCmd::Other {
                raw: text.to_string(),
            },
        ),
    ))(input)
}

fn add_cmd(input: Tokens<'_>) -> PResult<'_, AlterTableCmd> {
    alt((
        preceded(keyword("COLUMN"), add_column),
        map(table_constraint, AlterTableCmd::AddConstraint),
        add_column,
    ))(input)
}

fn add_column(input: Tokens<'_>) -> PResult<'_, AlterTableCmd> {
    map(pair(if_not_exists, column_def), |(if_not_exists, column)| {
        AlterTableCmd::AddColumn {
            column,
            if_not_exists,
        }
    })(input)
}

fn drop_cmd(input: Tokens<'_>) -> PResult<'_, AlterTableCmd> {
    alt((
        map(
            preceded(
                keyword("CONSTRAINT"),
                cut(tuple((if_exists, ident, drop_behavior))),
            ),
            |(if_exists, name, cascade)| AlterTableCmd::DropConstraint {
                name,
                if_exists,
                cascade,
            },
        ),
        map(
            preceded(
                opt(keyword("COLUMN")),
                tuple((if_exists, ident, drop_behavior)),
            ),
            |(if_exists, column, cascade)| AlterTableCmd::DropColumn {
                column,
                if_exists,
                cascade,
            },
        ),
    ))(input)
}

#[derive(Clone)]
enum ColumnAction {
    Type(DataType, Option<Expr>),
    SetNotNull,
    DropNotNull,
    SetDefault(Expr),
    DropDefault,
    SetStatistics,
    Other,
}

/// `[COLUMN] name action`, or `None` for an action that is not modelled.
fn alter_column(input: Tokens<'_>) -> PResult<'_, Option<AlterTableCmd>> {
    let (input, _) = opt(keyword("COLUMN"))(input)?;
    let (input, column) = ident(input)?;
    let (input, action) = alt((
        map(
            preceded(
                alt((keywords(&["SET", "DATA", "TYPE"]), keyword("TYPE"))),
                cut(tuple((
                    data_type,
                    opt(preceded(keyword("COLLATE"), qualified_name)),
                    opt(preceded(keyword("USING"), expr_until(punct(",")))),
                ))),
            ),
            |(data_type, _, using)| ColumnAction::Type(data_type, using),
        ),
        value(ColumnAction::SetNotNull, keywords(&["SET", "NOT", "NULL"])),
        value(ColumnAction::DropNotNull, keywords(&["DROP", "NOT", "NULL"])),
        map(
            preceded(keywords(&["SET", "DEFAULT"]), cut(expr_until(punct(",")))),
            ColumnAction::SetDefault,
        ),
        value(ColumnAction::DropDefault, keywords(&["DROP", "DEFAULT"])),
        value(
            ColumnAction::SetStatistics,
            pair(keywords(&["SET", "STATISTICS"]), skip_element),
        ),
        value(ColumnAction::Other, skip_element),
    ))(input)?;

    let cmd = match action {
        ColumnAction::Type(data_type, using) => Some(AlterTableCmd::AlterColumnType {
            column,
            data_type,
            using,
        }),
        ColumnAction::SetNotNull => Some(AlterTableCmd::SetNotNull { column }),
        ColumnAction::DropNotNull => Some(AlterTableCmd::DropNotNull { column }),
        ColumnAction::SetDefault(default) => Some(AlterTableCmd::SetDefault { column, default }),
        ColumnAction::DropDefault => Some(AlterTableCmd::DropDefault { column }),
        ColumnAction::SetStatistics => Some(AlterTableCmd::SetStatistics { column }),
        ColumnAction::Other => None,
    };
    Ok((input, cmd))
}

fn alter_domain(input: Tokens<'_>) -> PResult<'_, Statement> {
    let (input, name) = qualified_name(input)?;
    alt((
        preceded(keyword("RENAME"), cut(rename(ObjectType::Domain, name.clone()))),
        map(domain_action, |action| {
            Statement::AlterDomain(AlterDomain {
                name: name.clone(),
                action,
            })
        }),
    ))(input)
}

fn domain_action(input: Tokens<'_>) -> PResult<'_, AlterDomainAction> {
    alt((
        preceded(keyword("ADD"), cut(domain_constraint)),
        map(
            preceded(
                keywords(&["DROP", "CONSTRAINT"]),
                cut(tuple((if_exists, ident, drop_behavior))),
            ),
            |(_, name, cascade)| AlterDomainAction::DropConstraint { name, cascade },
        ),
        map(
            preceded(keywords(&["VALIDATE", "CONSTRAINT"]), cut(ident)),
            |name| AlterDomainAction::ValidateConstraint { name },
        ),
        map(
            preceded(keywords(&["SET", "DEFAULT"]), cut(expr)),
            AlterDomainAction::SetDefault,
        ),
        value(AlterDomainAction::DropDefault, keywords(&["DROP", "DEFAULT"])),
        value(AlterDomainAction::SetNotNull, keywords(&["SET", "NOT", "NULL"])),
        value(AlterDomainAction::DropNotNull, keywords(&["DROP", "NOT", "NULL"])),
        value(AlterDomainAction::Other, rest),
    ))(input)
}

/// `[CONSTRAINT name] { CHECK (expr) | NOT NULL } [NOT VALID]`
fn domain_constraint(input: Tokens<'_>) -> PResult<'_, AlterDomainAction> {
    let (input, name) = opt(preceded(keyword("CONSTRAINT"), ident))(input)?;
    let (input, check) = alt((
        map(preceded(keyword("CHECK"), paren_expr), Some),
        map(opt(keywords(&["NOT", "NULL"])), |_| None),
    ))(input)?;
    let (input, not_valid) = flag(keywords(&["NOT", "VALID"]))(input)?;
    Ok((
        input,
        AlterDomainAction::AddConstraint {
            name,
            check,
            not_valid,
        },
    ))
}

fn alter_type(input: Tokens<'_>) -> PResult<'_, Statement> {
    let (input, name) = qualified_name(input)?;
    let enum_action = |action: AlterEnumAction| {
        Statement::AlterEnum(AlterEnum {
            name: name.clone(),
            action,
        })
    };
    alt((
        map(
            preceded(
                keywords(&["ADD", "VALUE"]),
                cut(terminated(pair(if_not_exists, string_literal), rest)),
            ),
            |(if_not_exists, label)| {
                enum_action(AlterEnumAction::AddValue {
                    value: label,
                    if_not_exists,
                })
            },
        ),
        map(
            preceded(
                keywords(&["RENAME", "VALUE"]),
                cut(separated_pair(string_literal, keyword("TO"), string_literal)),
            ),
            |(from, to)| enum_action(AlterEnumAction::RenameValue { from, to }),
        ),
        preceded(keyword("RENAME"), cut(rename(ObjectType::Type, name.clone()))),
        other("ALTER TYPE".into()),
    ))(input)
}

#[cfg(test)]
mod tests {
    use super::super::tests::parse_one;
    use crate::ast::*;
    use pretty_assertions::assert_eq;

    fn alter_cmds(sql: &str) -> Vec<AlterTableCmd> {
        match parse_one(sql) {
            Statement::AlterTable(alter) => alter.cmds,
            other => panic!("expected ALTER TABLE, got {other:?}"),
        }
    }

    #[test]
    fn test_add_column_forms() {
        let cmds = alter_cmds(
            "ALTER TABLE users ADD COLUMN IF NOT EXISTS created_at timestamp DEFAULT now() NOT NULL, ADD age int",
        );
        assert_eq!(cmds.len(), 2);
        let AlterTableCmd::AddColumn { column, if_not_exists } = &cmds[0] else {
            panic!("expected ADD COLUMN");
        };
        assert!(*if_not_exists);
        assert!(column.data_type.is_timestamp_without_tz());
        assert!(column.default_expr().unwrap().is_volatile());
        assert!(column.is_not_null());
        assert!(matches!(&cmds[1], AlterTableCmd::AddColumn { column, .. } if column.name == "age"));
    }

    #[test]
    fn test_add_constraints() {
        let cmds = alter_cmds(
            "ALTER TABLE orders ADD CONSTRAINT fk_user FOREIGN KEY (user_id) REFERENCES users (id) NOT VALID",
        );
        let AlterTableCmd::AddConstraint(constraint) = &cmds[0] else {
            panic!("expected ADD CONSTRAINT");
        };
        assert!(constraint.not_valid);
        assert!(matches!(
            &constraint.kind,
            ConstraintKind::ForeignKey { columns, .. } if columns == &vec!["user_id".to_string()]
        ));

        let cmds = alter_cmds("ALTER TABLE t ADD CONSTRAINT t_pk PRIMARY KEY USING INDEX t_idx");
        assert!(matches!(
            &cmds[0],
            AlterTableCmd::AddConstraint(TableConstraint {
                kind: ConstraintKind::PrimaryKey { using_index: Some(idx), .. },
                ..
            }) if idx == "t_idx"
        ));
    }

    #[test]
    fn test_alter_column_forms() {
        let cmds = alter_cmds(
            "ALTER TABLE t ALTER COLUMN a TYPE bigint USING a::bigint, ALTER b SET NOT NULL, \
             ALTER COLUMN c SET DEFAULT 0, ALTER c DROP DEFAULT, ALTER d SET STATISTICS 500",
        );
        assert!(matches!(&cmds[0], AlterTableCmd::AlterColumnType { data_type, using: Some(_), .. } if data_type.name == "bigint"));
        assert_eq!(cmds[1], AlterTableCmd::SetNotNull { column: "b".into() });
        assert!(matches!(&cmds[2], AlterTableCmd::SetDefault { column, .. } if column == "c"));
        assert_eq!(cmds[3], AlterTableCmd::DropDefault { column: "c".into() });
        assert_eq!(cmds[4], AlterTableCmd::SetStatistics { column: "d".into() });
    }

    #[test]
    fn test_partition_and_storage_commands() {
        let cmds = alter_cmds(
            "ALTER TABLE events DETACH PARTITION events_2023 CONCURRENTLY, SET LOGGED, SET TABLESPACE fast",
        );
        assert!(matches!(&cmds[0], AlterTableCmd::DetachPartition { concurrently: true, .. }));
        assert_eq!(cmds[1], AlterTableCmd::SetLogged);
        assert_eq!(cmds[2], AlterTableCmd::SetTablespace { tablespace: "fast".into() });

        let cmds = alter_cmds(
            "ALTER TABLE events ATTACH PARTITION events_2024 FOR VALUES FROM ('2024-01-01') TO ('2025-01-01')",
        );
        assert!(matches!(&cmds[0], AlterTableCmd::AttachPartition { partition } if partition.name == "events_2024"));
    }

    #[test]
    fn test_unmodelled_subcommand_kept_raw() {
        let cmds = alter_cmds("ALTER TABLE users ENABLE ROW LEVEL SECURITY");
        assert_eq!(
            cmds,
            vec![AlterTableCmd::Other { raw: "ENABLE ROW LEVEL SECURITY".into() }]
        );
        let cmds = alter_cmds("ALTER TABLE users DISABLE TRIGGER ALL");
        assert_eq!(cmds, vec![AlterTableCmd::DisableTrigger { name: "all".into() }]);
    }

    #[test]
    fn test_renames() {
        assert_eq!(
            parse_one("ALTER TABLE users RENAME COLUMN email TO email_address"),
            Statement::Rename(Rename {
                object_type: ObjectType::Table,
                target: QualifiedName::new("users"),
                kind: RenameKind::Column {
                    from: "email".into(),
                    to: "email_address".into()
                },
            })
        );
        assert!(matches!(
            parse_one("ALTER INDEX idx RENAME TO idx2"),
            Statement::Rename(Rename { object_type: ObjectType::Index, .. })
        ));
    }

    #[test]
    fn test_alter_enum_and_domain() {
        assert!(matches!(
            parse_one("ALTER TYPE mood ADD VALUE IF NOT EXISTS 'happy' AFTER 'ok'"),
            Statement::AlterEnum(AlterEnum { action: AlterEnumAction::AddValue { if_not_exists: true, .. }, .. })
        ));
        assert!(matches!(
            parse_one("ALTER TYPE mood RENAME VALUE 'sad' TO 'blue'"),
            Statement::AlterEnum(AlterEnum { action: AlterEnumAction::RenameValue { .. }, .. })
        ));
        assert!(matches!(
            parse_one("ALTER DOMAIN email ADD CONSTRAINT has_at CHECK (VALUE ~ '@') NOT VALID"),
            Statement::AlterDomain(AlterDomain {
                action: AlterDomainAction::AddConstraint { not_valid: true, check: Some(_), .. },
                ..
            })
        ));
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        assert!(crate::parser::parse_sql("ALTER TABLE t DROP COLUMN a b").is_err());
    }

    #[test]
    fn test_committed_subcommand_does_not_fall_back() {
        assert!(crate::parser::parse_sql("ALTER TABLE t DROP CONSTRAINT").is_err());
        assert!(crate::parser::parse_sql("ALTER TABLE t ALTER COLUMN a TYPE").is_err());
        let cmds = alter_cmds("ALTER TABLE t ALTER COLUMN a SET (n_distinct = 100)");
        assert_eq!(
            cmds,
            vec![AlterTableCmd::Other { raw: "ALTER COLUMN a SET (n_distinct = 100)".into() }]
        );
    }
}
