//! CREATE statements and the column / constraint definitions they share
//! with ALTER TABLE.

use nom::{
    branch::alt,
    combinator::{cut, map, not, opt, value},
    multi::{many0, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
};

use super::base::{
    balanced, expr, expr_until, flag, ident, ident_list, keyword, keyword_in, keywords,
    paren_expr, punct, qualified_name, rest, skip_element, skip_to, string_literal, word,
    PResult, Tokens,
};
use super::{if_not_exists, other, types::data_type};
use crate::ast::*;

/// Everything after `CREATE`.
pub(super) fn create(input: Tokens<'_>) -> PResult<'_, Statement> {
    let (input, or_replace) = flag(keywords(&["OR", "REPLACE"]))(input)?;
    alt((
        preceded(keyword("INDEX"), cut(create_index(false))),
        preceded(keywords(&["UNIQUE", "INDEX"]), cut(create_index(true))),
        create_object(or_replace),
    ))(input)
}

fn create_object<'a>(or_replace: bool) -> impl FnMut(Tokens<'a>) -> PResult<'a, Statement> {
    move |input| {
        let (input, modifiers) = many0(keyword_in(&[
            "GLOBAL", "LOCAL", "TEMP", "TEMPORARY", "UNLOGGED", "RECURSIVE",
        ]))(input)?;
        let has = |kws: &[&str]| {
            modifiers
                .iter()
                .any(|m| kws.iter().any(|kw| m.eq_ignore_ascii_case(kw)))
        };
        let temporary = has(&["TEMP", "TEMPORARY"]);
        let unlogged = has(&["UNLOGGED"]);

        alt((
            preceded(keyword("TABLE"), cut(create_table(temporary, unlogged))),
            preceded(
                keywords(&["MATERIALIZED", "VIEW"]),
                cut(create_view(or_replace, true)),
            ),
            preceded(keyword("VIEW"), cut(create_view(or_replace, false))),
            preceded(keyword("DOMAIN"), cut(create_domain)),
            preceded(keyword("SEQUENCE"), cut(create_sequence)),
            preceded(keyword("TYPE"), cut(create_type)),
            preceded(
                pair(opt(keyword("CONSTRAINT")), keyword("TRIGGER")),
                cut(create_trigger(or_replace)),
            ),
            preceded(keyword("EXTENSION"), cut(create_extension)),
            create_other,
        ))(input)
    }
}

fn create_other(input: Tokens<'_>) -> PResult<'_, Statement> {
    let (input, object) = word(input)?;
    other(format!("CREATE {}", object.to_ascii_uppercase()))(input)
}

fn create_index<'a>(unique: bool) -> impl FnMut(Tokens<'a>) -> PResult<'a, Statement> {
    move |input| {
        let (input, concurrently) = flag(keyword("CONCURRENTLY"))(input)?;
        let (input, if_not_exists) = if_not_exists(input)?;
        let (input, name) = opt(preceded(not(keyword("ON")), ident))(input)?;
        let (input, _) = keyword("ON")(input)?;
        let (input, _) = opt(keyword("ONLY"))(input)?;
        let (input, table) = qualified_name(input)?;
        let (input, method) = opt(preceded(keyword("USING"), ident))(input)?;
        let (input, columns) = element_list(input)?;
        let (input, clauses) = many0(alt((
            map(preceded(keyword_in(&["INCLUDE", "WITH"]), balanced), |_| None),
            map(preceded(keyword("TABLESPACE"), ident), |_| None),
            map(preceded(keyword("WHERE"), expr), Some),
            map(
                alt((
                    keywords(&["NULLS", "NOT", "DISTINCT"]),
                    keywords(&["NULLS", "DISTINCT"]),
                )),
                |_| None,
            ),
        )))(input)?;

        Ok((
            input,
            Statement::CreateIndex(CreateIndex {
                name,
                table,
                unique,
                concurrently,
                if_not_exists,
                method,
                columns,
                predicate: clauses.into_iter().flatten().last(),
            }),
        ))
    }
}

/// `( element [, ...] )` of an index or partition key.
fn element_list(input: Tokens<'_>) -> PResult<'_, Vec<String>> {
    delimited(
        punct("("),
        separated_list1(punct(","), map(expr_until(punct(",")), |e| element_name(&e))),
        punct(")"),
    )(input)
}

/// Column name of a plain element (`email DESC NULLS LAST` is `email`),
/// or the source text of an expression element.
fn element_name(element: &Expr) -> String {
    let raw = element.raw.trim();
    if raw.starts_with('(') || !element.functions.is_empty() {
        return raw.to_string();
    }
    let first = raw.split_whitespace().next().unwrap_or(raw);
    match first.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        Some(quoted) => quoted.to_string(),
        None => first.to_lowercase(),
    }
}

#[derive(Clone)]
enum TableClause {
    PartitionBy(Vec<String>),
    AsQuery,
    Ignored,
}

fn create_table<'a>(temporary: bool, unlogged: bool) -> impl FnMut(Tokens<'a>) -> PResult<'a, Statement> {
    move |input| {
        let (input, if_not_exists) = if_not_exists(input)?;
        let (input, name) = qualified_name(input)?;
        let mut table = CreateTable {
            name,
            if_not_exists,
            temporary,
            unlogged,
            ..Default::default()
        };

        let (input, body) = opt(alt((
            map(
                preceded(
                    keywords(&["PARTITION", "OF"]),
                    pair(qualified_name, opt(table_elements)),
                ),
                |(parent, elements)| (Some(parent), elements),
            ),
            map(
                preceded(keyword("OF"), pair(qualified_name, opt(balanced))),
                |_| (None, None),
            ),
            map(table_elements, |elements| (None, Some(elements))),
        )))(input)?;
        if let Some((partition_of, elements)) = body {
            table.partition_of = partition_of;
            if let Some((columns, constraints)) = elements {
                table.columns = columns;
                table.constraints = constraints;
            }
        }

        let (input, clauses) = many0(alt((
            map(
                preceded(pair(keywords(&["PARTITION", "BY"]), ident), element_list),
                TableClause::PartitionBy,
            ),
            value(TableClause::AsQuery, pair(keyword("AS"), rest)),
            value(
                TableClause::Ignored,
                pair(
                    keywords(&["FOR", "VALUES"]),
                    skip_to(keywords(&["PARTITION", "BY"])),
                ),
            ),
            value(TableClause::Ignored, keyword("DEFAULT")),
            value(
                TableClause::Ignored,
                pair(keyword_in(&["INHERITS", "WITH"]), balanced),
            ),
            value(TableClause::Ignored, keywords(&["WITHOUT", "OIDS"])),
            value(
                TableClause::Ignored,
                pair(keyword_in(&["USING", "TABLESPACE"]), ident),
            ),
            value(
                TableClause::Ignored,
                tuple((keywords(&["ON", "COMMIT"]), ident, opt(keyword("ROWS")))),
            ),
        )))(input)?;
        for clause in clauses {
            match clause {
                TableClause::PartitionBy(key) => table.partition_by = Some(key),
                TableClause::AsQuery => table.as_query = true,
                TableClause::Ignored => {}
            }
        }

        Ok((input, Statement::CreateTable(table)))
    }
}

enum TableElement {
    Column(ColumnDef),
    Constraint(TableConstraint),
    Like,
}

fn table_elements(input: Tokens<'_>) -> PResult<'_, (Vec<ColumnDef>, Vec<TableConstraint>)> {
    let (input, elements) = preceded(
        punct("("),
        cut(terminated(
            separated_list0(
                punct(","),
                alt((
                    map(table_constraint, TableElement::Constraint),
                    map(pair(keyword("LIKE"), skip_element), |_| TableElement::Like),
                    map(column_def, TableElement::Column),
                )),
            ),
            punct(")"),
        )),
    )(input)?;

    let mut columns = Vec::new();
    let mut constraints = Vec::new();
    for element in elements {
        match element {
            TableElement::Column(column) => columns.push(column),
            TableElement::Constraint(constraint) => constraints.push(constraint),
            TableElement::Like => {}
        }
    }
    Ok((input, (columns, constraints)))
}

/// `name type [constraint ...]`
pub(super) fn column_def(input: Tokens<'_>) -> PResult<'_, ColumnDef> {
    let (input, name) = ident(input)?;
    let (input, data_type) = data_type(input)?;
    let (input, constraints) = column_constraints(input)?;
    let mut column = ColumnDef::new(name, data_type);
    column.constraints = constraints;
    Ok((input, column))
}

fn ends_column_default(input: Tokens<'_>) -> PResult<'_, ()> {
    alt((
        punct(","),
        keywords(&["NOT", "NULL"]),
        map(
            keyword_in(&[
                "NULL", "PRIMARY", "UNIQUE", "CHECK", "REFERENCES", "CONSTRAINT", "GENERATED",
                "COLLATE",
            ]),
            |_| (),
        ),
    ))(input)
}

fn column_constraints(input: Tokens<'_>) -> PResult<'_, Vec<ColumnConstraint>> {
    let (input, constraints) = many0(alt((
        map(preceded(keyword("CONSTRAINT"), ident), |_| None),
        value(Some(ColumnConstraint::NotNull), keywords(&["NOT", "NULL"])),
        value(Some(ColumnConstraint::Null), keyword("NULL")),
        map(
            preceded(keyword("DEFAULT"), expr_until(ends_column_default)),
            |e| Some(ColumnConstraint::Default(e)),
        ),
        value(
            Some(ColumnConstraint::PrimaryKey),
            pair(keywords(&["PRIMARY", "KEY"]), index_parameters),
        ),
        value(
            Some(ColumnConstraint::Unique),
            tuple((keyword("UNIQUE"), nulls_distinct, index_parameters)),
        ),
        map(
            delimited(keyword("CHECK"), paren_expr, opt(keywords(&["NO", "INHERIT"]))),
            |e| Some(ColumnConstraint::Check(e)),
        ),
        map(
            preceded(keyword("REFERENCES"), references),
            |(table, columns, on_delete)| {
                Some(ColumnConstraint::References {
                    table,
                    columns,
                    on_delete,
                })
            },
        ),
        preceded(keyword("GENERATED"), cut(generated)),
        map(preceded(keyword("COLLATE"), qualified_name), |_| None),
        map(preceded(keyword_in(&["STORAGE", "COMPRESSION"]), ident), |_| None),
        map(constraint_attribute, |_| None),
    )))(input)?;
    Ok((input, constraints.into_iter().flatten().collect()))
}

/// `{ALWAYS | BY DEFAULT} AS { IDENTITY [(...)] | (expr) [STORED | VIRTUAL] }`.
/// Virtual columns take no storage and are dropped.
fn generated(input: Tokens<'_>) -> PResult<'_, Option<ColumnConstraint>> {
    let (input, _) = alt((keyword("ALWAYS"), keywords(&["BY", "DEFAULT"])))(input)?;
    let (input, _) = keyword("AS")(input)?;
    alt((
        value(
            Some(ColumnConstraint::Identity),
            pair(keyword("IDENTITY"), opt(balanced)),
        ),
        map(
            pair(paren_expr, opt(keyword_in(&["STORED", "VIRTUAL"]))),
            |(expr, storage)| {
                let virtual_column = storage.is_some_and(|s| s.eq_ignore_ascii_case("VIRTUAL"));
                (!virtual_column).then_some(ColumnConstraint::Generated(expr))
            },
        ),
    ))(input)
}

/// `DEFERRABLE`, `INITIALLY DEFERRED` and similar; consumed and ignored.
fn constraint_attribute(input: Tokens<'_>) -> PResult<'_, ()> {
    alt((
        keyword("DEFERRABLE"),
        keywords(&["NOT", "DEFERRABLE"]),
        keywords(&["INITIALLY", "DEFERRED"]),
        keywords(&["INITIALLY", "IMMEDIATE"]),
        keywords(&["NO", "INHERIT"]),
        keywords(&["NOT", "ENFORCED"]),
        keyword("ENFORCED"),
    ))(input)
}

fn nulls_distinct(input: Tokens<'_>) -> PResult<'_, ()> {
    map(
        opt(alt((
            keywords(&["NULLS", "NOT", "DISTINCT"]),
            keywords(&["NULLS", "DISTINCT"]),
        ))),
        |_| (),
    )(input)
}

/// `INCLUDE (...)`, `WITH (...)`, `USING INDEX TABLESPACE name`
fn index_parameters(input: Tokens<'_>) -> PResult<'_, ()> {
    map(
        many0(alt((
            preceded(keyword_in(&["INCLUDE", "WITH"]), balanced),
            map(
                preceded(keywords(&["USING", "INDEX", "TABLESPACE"]), ident),
                |_| (),
            ),
        ))),
        |_| (),
    )(input)
}

/// Target of `REFERENCES table [(cols)] [MATCH ...] [ON DELETE ...] [ON UPDATE ...]`.
fn references(input: Tokens<'_>) -> PResult<'_, (QualifiedName, Vec<String>, Option<String>)> {
    let (input, table) = qualified_name(input)?;
    let (input, columns) = opt(ident_list)(input)?;
    let (input, actions) = many0(alt((
        map(preceded(keyword("MATCH"), ident), |_| None),
        map(preceded(keyword("ON"), pair(ident, referential_action)), Some),
    )))(input)?;
    let on_delete = actions
        .into_iter()
        .flatten()
        .filter(|(event, _)| event == "delete")
        .map(|(_, action)| action)
        .last();
    Ok((input, (table, columns.unwrap_or_default(), on_delete)))
}

fn referential_action(input: Tokens<'_>) -> PResult<'_, String> {
    alt((
        map(keywords(&["NO", "ACTION"]), |_| "NO ACTION".to_string()),
        map(
            delimited(keyword("SET"), ident, opt(balanced)),
            |what| format!("SET {}", what.to_uppercase()),
        ),
        map(ident, |action| action.to_uppercase()),
    ))(input)
}

/// Table-level constraint, also used by `ALTER TABLE ... ADD`.
pub(super) fn table_constraint(input: Tokens<'_>) -> PResult<'_, TableConstraint> {
    let (input, name) = opt(preceded(keyword("CONSTRAINT"), ident))(input)?;
    let (input, kind) = alt((
        map(
            preceded(keywords(&["PRIMARY", "KEY"]), key_columns),
            |(columns, using_index)| ConstraintKind::PrimaryKey {
                columns,
                using_index,
            },
        ),
        map(
            preceded(pair(keyword("UNIQUE"), nulls_distinct), key_columns),
            |(columns, using_index)| ConstraintKind::Unique {
                columns,
                using_index,
            },
        ),
        map(preceded(keyword("CHECK"), paren_expr), ConstraintKind::Check),
        map(
            preceded(
                keywords(&["FOREIGN", "KEY"]),
                pair(ident_list, preceded(keyword("REFERENCES"), references)),
            ),
            |(columns, (ref_table, ref_columns, on_delete))| ConstraintKind::ForeignKey {
                columns,
                ref_table,
                ref_columns,
                on_delete,
            },
        ),
        map(
            preceded(
                keyword("EXCLUDE"),
                expr_until(alt((punct(","), keywords(&["NOT", "VALID"])))),
            ),
            |body| ConstraintKind::Exclude(body.raw),
        ),
    ))(input)?;
    let (input, attributes) = many0(alt((
        value(true, keywords(&["NOT", "VALID"])),
        value(false, constraint_attribute),
    )))(input)?;

    let mut constraint = TableConstraint::new(kind);
    constraint.name = name;
    constraint.not_valid = attributes.contains(&true);
    Ok((input, constraint))
}

/// Column list of a key constraint, or the index named by `USING INDEX`.
fn key_columns(input: Tokens<'_>) -> PResult<'_, (Vec<String>, Option<String>)> {
    alt((
        map(preceded(keywords(&["USING", "INDEX"]), ident), |index| {
            (Vec::new(), Some(index))
        }),
        map(terminated(ident_list, index_parameters), |columns| {
            (columns, None)
        }),
    ))(input)
}

fn create_view<'a>(
    or_replace: bool,
    materialized: bool,
) -> impl FnMut(Tokens<'a>) -> PResult<'a, Statement> {
    move |input| {
        let (input, if_not_exists) = if_not_exists(input)?;
        let (input, name) = qualified_name(input)?;
        let (input, _) = rest(input)?;
        Ok((
            input,
            Statement::CreateView(CreateView {
                name,
                materialized,
                or_replace,
                if_not_exists,
            }),
        ))
    }
}

#[derive(Clone)]
enum DomainClause {
    NotNull,
    Check(Expr),
    Default(Expr),
    Ignored,
}

fn create_domain(input: Tokens<'_>) -> PResult<'_, Statement> {
    let (input, name) = qualified_name(input)?;
    let (input, _) = opt(keyword("AS"))(input)?;
    let (input, data_type) = data_type(input)?;
    let (input, clauses) = many0(alt((
        map(preceded(keyword("CONSTRAINT"), ident), |_| DomainClause::Ignored),
        value(DomainClause::NotNull, keywords(&["NOT", "NULL"])),
        value(DomainClause::Ignored, keyword("NULL")),
        map(preceded(keyword("CHECK"), paren_expr), DomainClause::Check),
        map(
            preceded(keyword("DEFAULT"), expr_until(ends_column_default)),
            DomainClause::Default,
        ),
        map(preceded(keyword("COLLATE"), qualified_name), |_| {
            DomainClause::Ignored
        }),
    )))(input)?;

    let mut domain = CreateDomain {
        name,
        data_type,
        not_null: false,
        checks: Vec::new(),
        default: None,
    };
    for clause in clauses {
        match clause {
            DomainClause::NotNull => domain.not_null = true,
            DomainClause::Check(check) => domain.checks.push(check),
            DomainClause::Default(default) => domain.default = Some(default),
            DomainClause::Ignored => {}
        }
    }
    Ok((input, Statement::CreateDomain(domain)))
}

fn create_sequence(input: Tokens<'_>) -> PResult<'_, Statement> {
    let (input, if_not_exists) = if_not_exists(input)?;
    let (input, name) = qualified_name(input)?;
    let (input, data_type) = opt(preceded(keyword("AS"), data_type))(input)?;
    let (input, _) = rest(input)?;
    Ok((
        input,
        Statement::CreateSequence(CreateSequence {
            name,
            if_not_exists,
            data_type,
        }),
    ))
}

/// Enums are modelled; composite, range and base types pass through.
fn create_type(input: Tokens<'_>) -> PResult<'_, Statement> {
    let (input, name) = qualified_name(input)?;
    let (input, values) = opt(preceded(
        keywords(&["AS", "ENUM"]),
        cut(delimited(
            punct("("),
            separated_list0(punct(","), string_literal),
            punct(")"),
        )),
    ))(input)?;
    match values {
        Some(values) => Ok((input, Statement::CreateEnum(CreateEnum { name, values }))),
        None => other("CREATE TYPE".into())(input),
    }
}

fn create_trigger<'a>(or_replace: bool) -> impl FnMut(Tokens<'a>) -> PResult<'a, Statement> {
    move |input| {
        let (input, name) = ident(input)?;
        let (input, _) = skip_to(keyword("ON"))(input)?;
        let (input, _) = keyword("ON")(input)?;
        let (input, table) = qualified_name(input)?;
        let (input, _) = rest(input)?;
        Ok((
            input,
            Statement::CreateTrigger(CreateTrigger {
                name,
                table,
                or_replace,
            }),
        ))
    }
}

fn create_extension(input: Tokens<'_>) -> PResult<'_, Statement> {
    let (input, if_not_exists) = if_not_exists(input)?;
    let (input, name) = ident(input)?;
    let (input, _) = rest(input)?;
    Ok((
        input,
        Statement::CreateExtension(CreateExtension {
            name,
            if_not_exists,
        }),
    ))
}
