//! DROP, maintenance, session and DML statements.

use nom::{
    branch::alt,
    combinator::{cut, flat_map, map, not, opt, value},
    multi::{many0, many1, separated_list1},
    sequence::{delimited, pair, preceded, separated_pair, terminated},
};

use super::base::{
    any_token, balanced, failure, flag, ident, keyword, keyword_in, keywords, punct,
    qualified_name, qualified_name_list, rest, rest_raw, scan_top_level_keyword, unquote, word,
    PResult, Tokens,
};
use super::{drop_behavior, if_exists, other};
use crate::ast::*;

fn object_type(input: Tokens<'_>) -> PResult<'_, ObjectType> {
    alt((
        value(ObjectType::Table, keyword("TABLE")),
        value(ObjectType::Index, keyword("INDEX")),
        value(ObjectType::View, keyword("VIEW")),
        value(ObjectType::MaterializedView, keywords(&["MATERIALIZED", "VIEW"])),
        value(ObjectType::Sequence, keyword("SEQUENCE")),
        value(ObjectType::Schema, keyword("SCHEMA")),
        value(ObjectType::Database, keyword("DATABASE")),
        value(ObjectType::Type, keyword("TYPE")),
        value(ObjectType::Domain, keyword("DOMAIN")),
        value(ObjectType::Extension, keyword("EXTENSION")),
        value(ObjectType::Function, keyword_in(&["FUNCTION", "PROCEDURE"])),
        value(ObjectType::Trigger, keyword("TRIGGER")),
    ))(input)
}

/// Everything after `DROP`.
pub(super) fn drop(input: Tokens<'_>) -> PResult<'_, Statement> {
    alt((
        flat_map(object_type, |object_type| cut(drop_object(object_type))),
        drop_other,
    ))(input)
}

fn drop_other(input: Tokens<'_>) -> PResult<'_, Statement> {
    let (input, object) = word(input)?;
    other(format!("DROP {}", object.to_ascii_uppercase()))(input)
}

fn drop_object<'a>(object_type: ObjectType) -> impl FnMut(Tokens<'a>) -> PResult<'a, Statement> {
    move |input| {
        let (input, concurrently) = flag(keyword("CONCURRENTLY"))(input)?;
        let (input, if_exists) = if_exists(input)?;
        let (input, names) = match object_type {
            ObjectType::Function => separated_list1(
                punct(","),
                terminated(qualified_name, opt(balanced)),
            )(input)?,
            // DROP TRIGGER name ON table: the table is what gets locked.
            ObjectType::Trigger => map(
                preceded(pair(ident, keyword("ON")), qualified_name),
                |table| vec![table],
            )(input)?,
            _ => qualified_name_list(input)?,
        };
        let (input, cascade) = drop_behavior(input)?;
        let (input, _) = rest(input)?;

        Ok((
            input,
            Statement::Drop(DropObject {
                object_type,
                names,
                if_exists,
                concurrently,
                cascade,
            }),
        ))
    }
}

/// Table names that may carry a trailing `*`.
fn table_list(input: Tokens<'_>) -> PResult<'_, Vec<QualifiedName>> {
    separated_list1(
        punct(","),
        delimited(opt(keyword("ONLY")), qualified_name, opt(punct("*"))),
    )(input)
}

pub(super) fn truncate(input: Tokens<'_>) -> PResult<'_, Statement> {
    let (input, _) = opt(keyword("TABLE"))(input)?;
    let (input, tables) = table_list(input)?;
    let (input, options) = many0(alt((
        value("restart", keywords(&["RESTART", "IDENTITY"])),
        value("continue", keywords(&["CONTINUE", "IDENTITY"])),
        value("cascade", keyword("CASCADE")),
        value("restrict", keyword("RESTRICT")),
    )))(input)?;
    Ok((
        input,
        Statement::Truncate(Truncate {
            tables,
            cascade: options.contains(&"cascade"),
            restart_identity: options.contains(&"restart"),
        }),
    ))
}

/// `( option [value] [, ...] )`, returning the names of enabled options.
fn option_list(input: Tokens<'_>) -> PResult<'_, Vec<String>> {
    let setting = opt(preceded(not(alt((punct(","), punct(")")))), any_token));
    let (input, options) = delimited(
        punct("("),
        separated_list1(punct(","), pair(ident, setting)),
        punct(")"),
    )(input)?;
    let enabled = options
        .into_iter()
        .filter(|(_, setting)| {
            !setting.is_some_and(|s| matches!(s.to_ascii_lowercase().as_str(), "false" | "off" | "0"))
        })
        .map(|(name, _)| name)
        .collect();
    Ok((input, enabled))
}

/// Optional list of relations, each with an optional column list.
fn relation_list(input: Tokens<'_>) -> PResult<'_, Vec<QualifiedName>> {
    map(
        opt(separated_list1(
            punct(","),
            delimited(opt(keyword("ONLY")), qualified_name, opt(balanced)),
        )),
        Option::unwrap_or_default,
    )(input)
}

pub(super) fn vacuum(input: Tokens<'_>) -> PResult<'_, Statement> {
    let (input, options) = alt((
        option_list,
        map(
            many0(keyword_in(&["FULL", "ANALYZE", "ANALYSE", "FREEZE", "VERBOSE"])),
            |words| words.iter().map(|w| w.to_lowercase()).collect::<Vec<_>>(),
        ),
    ))(input)?;
    let (input, tables) = relation_list(input)?;
    Ok((
        input,
        Statement::Vacuum(Vacuum {
            full: options.iter().any(|o| o == "full"),
            analyze: options.iter().any(|o| o == "analyze" || o == "analyse"),
            tables,
        }),
    ))
}

pub(super) fn analyze(input: Tokens<'_>) -> PResult<'_, Statement> {
    let (input, _) = opt(balanced)(input)?;
    let (input, _) = opt(keyword("VERBOSE"))(input)?;
    let (input, tables) = relation_list(input)?;
    Ok((input, Statement::Analyze(Analyze { tables })))
}

pub(super) fn reindex(input: Tokens<'_>) -> PResult<'_, Statement> {
    let (input, options) = opt(option_list)(input)?;
    let (input, target) = alt((
        value(ReindexTarget::Index, keyword("INDEX")),
        value(ReindexTarget::Table, keyword("TABLE")),
        value(ReindexTarget::Schema, keyword("SCHEMA")),
        value(ReindexTarget::Database, keyword("DATABASE")),
        value(ReindexTarget::System, keyword("SYSTEM")),
    ))(input)?;
    let (input, concurrently) = flag(keyword("CONCURRENTLY"))(input)?;
    let (input, name) = opt(qualified_name)(input)?;
    let concurrently = concurrently
        || options.is_some_and(|options| options.iter().any(|o| o == "concurrently"));
    Ok((
        input,
        Statement::Reindex(Reindex {
            target,
            name: name.unwrap_or_default(),
            concurrently,
        }),
    ))
}

pub(super) fn cluster(input: Tokens<'_>) -> PResult<'_, Statement> {
    let (input, _) = opt(balanced)(input)?;
    let (input, _) = opt(keyword("VERBOSE"))(input)?;
    let (input, cluster) = opt(alt((
        // Pre-8.3 form: CLUSTER index ON table
        map(
            separated_pair(qualified_name, keyword("ON"), qualified_name),
            |(index, table)| Cluster {
                table: Some(table),
                index: Some(index.name),
            },
        ),
        map(
            pair(qualified_name, opt(preceded(keyword("USING"), ident))),
            |(table, index)| Cluster {
                table: Some(table),
                index,
            },
        ),
    )))(input)?;
    Ok((input, Statement::Cluster(cluster.unwrap_or_default())))
}

pub(super) fn refresh(input: Tokens<'_>) -> PResult<'_, Statement> {
    let (input, _) = keywords(&["MATERIALIZED", "VIEW"])(input)?;
    let (input, concurrently) = flag(keyword("CONCURRENTLY"))(input)?;
    let (input, name) = qualified_name(input)?;
    let (input, _) = rest(input)?;
    Ok((
        input,
        Statement::RefreshMaterializedView(RefreshMaterializedView { name, concurrently }),
    ))
}

/// `SET`, `SET LOCAL`, `SET SESSION` and `RESET`, keywords included.
pub(super) fn set(input: Tokens<'_>) -> PResult<'_, Statement> {
    map(
        alt((
            preceded(keyword("RESET"), cut(reset)),
            preceded(keyword("SET"), cut(set_value)),
        )),
        Statement::VariableSet,
    )(input)
}

fn reset(input: Tokens<'_>) -> PResult<'_, VariableSet> {
    let (input, name) = alt((map(keyword("ALL"), |_| "all".to_string()), parameter_name))(input)?;
    Ok((
        input,
        VariableSet {
            name,
            value: "DEFAULT".into(),
            local: false,
        },
    ))
}

fn set_value(input: Tokens<'_>) -> PResult<'_, VariableSet> {
    let (input, scope) = opt(keyword_in(&["LOCAL", "SESSION"]))(input)?;
    let (input, name) = alt((
        map(
            alt((
                keyword("TRANSACTION"),
                keywords(&["CHARACTERISTICS", "AS", "TRANSACTION"]),
            )),
            |_| "transaction".to_string(),
        ),
        map(keywords(&["TIME", "ZONE"]), |_| "timezone".to_string()),
        terminated(parameter_name, alt((punct("="), keyword("TO")))),
    ))(input)?;
    let (input, raw) = rest_raw(input)?;
    let value = if raw.starts_with('\'') || raw.starts_with('$') {
        unquote(raw)
    } else {
        raw.to_string()
    };
    Ok((
        input,
        VariableSet {
            name,
            value,
            local: scope.is_some_and(|s| s.eq_ignore_ascii_case("LOCAL")),
        },
    ))
}

/// A possibly dotted configuration parameter name, lowercased.
fn parameter_name(input: Tokens<'_>) -> PResult<'_, String> {
    map(separated_list1(punct("."), ident), |parts| {
        parts.join(".").to_lowercase()
    })(input)
}

pub(super) fn show(input: Tokens<'_>) -> PResult<'_, Statement> {
    map(rest_raw, |raw| {
        Statement::VariableShow(VariableShow {
            name: raw.to_lowercase(),
        })
    })(input)
}

/// Transaction control, keywords included.
pub(super) fn transaction(input: Tokens<'_>) -> PResult<'_, Statement> {
    map(
        alt((
            value(
                TransactionKind::Begin,
                pair(
                    alt((keyword("BEGIN"), keywords(&["START", "TRANSACTION"]))),
                    rest,
                ),
            ),
            value(
                TransactionKind::Commit,
                pair(keyword_in(&["COMMIT", "END"]), rest),
            ),
            preceded(keyword_in(&["ROLLBACK", "ABORT"]), cut(rollback)),
            map(
                preceded(keyword("SAVEPOINT"), cut(ident)),
                TransactionKind::Savepoint,
            ),
            map(
                preceded(pair(keyword("RELEASE"), opt(keyword("SAVEPOINT"))), cut(ident)),
                TransactionKind::ReleaseSavepoint,
            ),
        )),
        Statement::Transaction,
    )(input)
}

fn rollback(input: Tokens<'_>) -> PResult<'_, TransactionKind> {
    let (input, _) = opt(keyword_in(&["WORK", "TRANSACTION"]))(input)?;
    alt((
        map(
            preceded(pair(keyword("TO"), opt(keyword("SAVEPOINT"))), cut(ident)),
            TransactionKind::RollbackToSavepoint,
        ),
        value(TransactionKind::Rollback, rest),
    ))(input)
}

pub(super) fn lock_table(input: Tokens<'_>) -> PResult<'_, Statement> {
    let (input, _) = opt(keyword("TABLE"))(input)?;
    let (input, tables) = table_list(input)?;
    let (input, mode) = opt(preceded(
        keyword("IN"),
        cut(terminated(lock_mode, keyword("MODE"))),
    ))(input)?;
    let (input, nowait) = flag(keyword("NOWAIT"))(input)?;
    Ok((
        input,
        Statement::LockTable(LockTable {
            tables,
            mode: mode.unwrap_or_default(),
            nowait,
        }),
    ))
}

fn lock_mode(input: Tokens<'_>) -> PResult<'_, TableLockMode> {
    let (rest, words) = many1(preceded(not(keyword("MODE")), ident))(input)?;
    let words = words.join(" ").to_uppercase();
    let mode = match words.as_str() {
        "ACCESS SHARE" => TableLockMode::AccessShare,
        "ROW SHARE" => TableLockMode::RowShare,
        "ROW EXCLUSIVE" => TableLockMode::RowExclusive,
        "SHARE UPDATE EXCLUSIVE" => TableLockMode::ShareUpdateExclusive,
        "SHARE" => TableLockMode::Share,
        "SHARE ROW EXCLUSIVE" => TableLockMode::ShareRowExclusive,
        "EXCLUSIVE" => TableLockMode::Exclusive,
        "ACCESS EXCLUSIVE" => TableLockMode::AccessExclusive,
        _ => return Err(failure(input, format!("unrecognized lock mode \"{words}\""))),
    };
    Ok((rest, mode))
}

pub(super) fn update(input: Tokens<'_>) -> PResult<'_, Statement> {
    let (input, _) = opt(keyword("ONLY"))(input)?;
    let (input, table) = qualified_name(input)?;
    let (input, has_where) = scan_top_level_keyword("WHERE")(input)?;
    Ok((input, Statement::Update(Update { table, has_where })))
}

pub(super) fn delete(input: Tokens<'_>) -> PResult<'_, Statement> {
    let (input, _) = keyword("FROM")(input)?;
    let (input, _) = opt(keyword("ONLY"))(input)?;
    let (input, table) = qualified_name(input)?;
    let (input, has_where) = scan_top_level_keyword("WHERE")(input)?;
    Ok((input, Statement::Delete(Delete { table, has_where })))
}

pub(super) fn insert(input: Tokens<'_>) -> PResult<'_, Statement> {
    let (input, _) = keyword("INTO")(input)?;
    let (input, table) = qualified_name(input)?;
    let (input, _) = rest(input)?;
    Ok((input, Statement::Insert(Insert { table })))
}

#[cfg(test)]
mod tests {
    use super::super::tests::parse_one;
    use crate::ast::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_drop_forms() {
        assert_eq!(
            parse_one("DROP INDEX CONCURRENTLY IF EXISTS idx_a, public.idx_b CASCADE"),
            Statement::Drop(DropObject {
                object_type: ObjectType::Index,
                names: vec![
                    QualifiedName::new("idx_a"),
                    QualifiedName::with_schema("public", "idx_b")
                ],
                if_exists: true,
                concurrently: true,
                cascade: true,
            })
        );
        assert!(matches!(
            parse_one("DROP MATERIALIZED VIEW stats"),
            Statement::Drop(DropObject { object_type: ObjectType::MaterializedView, .. })
        ));
        assert!(matches!(
            parse_one("DROP FUNCTION f(int), g()"),
            Statement::Drop(DropObject { object_type: ObjectType::Function, names, .. }) if names.len() == 2
        ));
        assert!(matches!(
            parse_one("DROP TRIGGER audit ON users"),
            Statement::Drop(DropObject { object_type: ObjectType::Trigger, names, .. }) if names[0].name == "users"
        ));
        assert_eq!(parse_one("DROP ROLE app").kind(), "DROP ROLE");
    }

    #[test]
    fn test_vacuum_forms() {
        assert!(matches!(
            parse_one("VACUUM (FULL, ANALYZE false) users"),
            Statement::Vacuum(Vacuum { full: true, analyze: false, ref tables }) if tables.len() == 1
        ));
        assert!(matches!(
            parse_one("VACUUM FULL VERBOSE ANALYZE users (email), orders"),
            Statement::Vacuum(Vacuum { full: true, analyze: true, ref tables }) if tables.len() == 2
        ));
        assert!(matches!(parse_one("VACUUM"), Statement::Vacuum(Vacuum { full: false, .. })));
    }

    #[test]
    fn test_maintenance_forms() {
        assert!(matches!(
            parse_one("REINDEX TABLE CONCURRENTLY users"),
            Statement::Reindex(Reindex { target: ReindexTarget::Table, concurrently: true, .. })
        ));
        assert!(matches!(
            parse_one("REINDEX (CONCURRENTLY, VERBOSE) INDEX idx"),
            Statement::Reindex(Reindex { target: ReindexTarget::Index, concurrently: true, .. })
        ));
        assert!(matches!(
            parse_one("REINDEX DATABASE"),
            Statement::Reindex(Reindex { target: ReindexTarget::Database, .. })
        ));
        assert_eq!(
            parse_one("CLUSTER users USING users_pkey"),
            Statement::Cluster(Cluster {
                table: Some(QualifiedName::new("users")),
                index: Some("users_pkey".into()),
            })
        );
        assert!(matches!(
            parse_one("REFRESH MATERIALIZED VIEW CONCURRENTLY stats WITH DATA"),
            Statement::RefreshMaterializedView(RefreshMaterializedView { concurrently: true, .. })
        ));
        assert!(matches!(
            parse_one("TRUNCATE TABLE a, b RESTART IDENTITY CASCADE"),
            Statement::Truncate(Truncate { cascade: true, restart_identity: true, ref tables }) if tables.len() == 2
        ));
    }

    #[test]
    fn test_set_forms() {
        assert_eq!(
            parse_one("SET lock_timeout = '5s'"),
            Statement::VariableSet(VariableSet {
                name: "lock_timeout".into(),
                value: "5s".into(),
                local: false
            })
        );
        assert_eq!(
            parse_one("SET LOCAL statement_timeout TO 0"),
            Statement::VariableSet(VariableSet {
                name: "statement_timeout".into(),
                value: "0".into(),
                local: true
            })
        );
        assert!(matches!(
            parse_one("RESET lock_timeout"),
            Statement::VariableSet(v) if v.is_reset() && v.name == "lock_timeout"
        ));
        assert!(matches!(
            parse_one("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE"),
            Statement::VariableSet(v) if v.name == "transaction"
        ));
    }

    #[test]
    fn test_transaction_forms() {
        assert_eq!(parse_one("BEGIN ISOLATION LEVEL READ COMMITTED"), Statement::Transaction(TransactionKind::Begin));
        assert_eq!(parse_one("START TRANSACTION"), Statement::Transaction(TransactionKind::Begin));
        assert_eq!(parse_one("END"), Statement::Transaction(TransactionKind::Commit));
        assert_eq!(
            parse_one("ROLLBACK TO SAVEPOINT before_fk"),
            Statement::Transaction(TransactionKind::RollbackToSavepoint("before_fk".into()))
        );
    }

    #[test]
    fn test_lock_and_dml() {
        assert_eq!(
            parse_one("LOCK TABLE users IN SHARE ROW EXCLUSIVE MODE NOWAIT"),
            Statement::LockTable(LockTable {
                tables: vec![QualifiedName::new("users")],
                mode: TableLockMode::ShareRowExclusive,
                nowait: true,
            })
        );
        assert!(matches!(
            parse_one("LOCK users"),
            Statement::LockTable(LockTable { mode: TableLockMode::AccessExclusive, .. })
        ));
        assert!(matches!(
            parse_one("UPDATE users SET active = (SELECT true WHERE 1 = 1)"),
            Statement::Update(Update { has_where: false, .. })
        ));
        assert!(matches!(
            parse_one("UPDATE users SET active = true WHERE id < 1000"),
            Statement::Update(Update { has_where: true, .. })
        ));
        assert!(matches!(
            parse_one("DELETE FROM sessions"),
            Statement::Delete(Delete { has_where: false, .. })
        ));
    }

    #[test]
    fn test_unknown_lock_mode_is_reported() {
        let errors = crate::parser::parse_sql("LOCK users IN SIDEWAYS SHARE MODE").unwrap_err();
        assert_eq!(errors[0].message, "unrecognized lock mode \"SIDEWAYS SHARE\"");
    }
}
