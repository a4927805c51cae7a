//! Column type choices.

use super::{declared_types, BuiltinRule, RuleContext, RuleMeta, Severity, Violation};
use crate::ast::{DataType, Statement};

pub(super) const RULES: &[BuiltinRule] = &[
    BuiltinRule::new(
        RuleMeta {
            id: "MP036",
            name: "prefer-text-over-varchar",
            severity: Severity::Warning,
            description: "VARCHAR(n) where TEXT would do.",
            why_it_matters: "Raising the length limit later is a type change; TEXT with a CHECK \
                constraint can be relaxed without touching the table.",
        },
        prefer_text_over_varchar,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP037",
            name: "prefer-bigint-over-int",
            severity: Severity::Warning,
            description: "32-bit integer for an identifier column.",
            why_it_matters: "Identifiers outgrow 2^31 and widening the column later rewrites \
                the table and every referencing one.",
        },
        prefer_bigint_over_int,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP038",
            name: "prefer-identity-over-serial",
            severity: Severity::Warning,
            description: "SERIAL column in a new table.",
            why_it_matters: "Identity columns own their sequence properly and are the SQL \
                standard spelling.",
        },
        prefer_identity_over_serial,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP039",
            name: "prefer-timestamptz",
            severity: Severity::Warning,
            description: "TIMESTAMP without time zone.",
            why_it_matters: "Values are stored without an offset and silently change meaning \
                when the session time zone differs.",
        },
        prefer_timestamptz,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP040",
            name: "ban-char-field",
            severity: Severity::Warning,
            description: "CHAR(n) column.",
            why_it_matters: "Values are blank-padded, which breaks comparisons and wastes space.",
        },
        ban_char_field,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP065",
            name: "prefer-jsonb-over-json",
            severity: Severity::Warning,
            description: "JSON column where JSONB is usually wanted.",
            why_it_matters: "JSON is reparsed on every access and cannot be indexed with GIN.",
        },
        prefer_jsonb_over_json,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP066",
            name: "ban-money-type",
            severity: Severity::Warning,
            description: "MONEY column.",
            why_it_matters: "Formatting and precision depend on lc_monetary, so the same data \
                reads differently across servers.",
        },
        ban_money_type,
    ),
    BuiltinRule::new(
        RuleMeta {
            id: "MP067",
            name: "ban-timetz",
            severity: Severity::Warning,
            description: "TIME WITH TIME ZONE column.",
            why_it_matters: "A time of day with an offset cannot account for daylight saving \
                and is discouraged by PostgreSQL itself.",
        },
        ban_timetz,
    ),
];

/// First declared column whose type matches `pred`.
fn find_declared<'s>(
    stmt: &'s Statement,
    pred: impl Fn(&str, &DataType) -> bool,
) -> Option<(&'s str, &'s DataType)> {
    declared_types(stmt)
        .into_iter()
        .find(|(name, ty)| pred(*name, *ty))
}

fn prefer_text_over_varchar(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let (column, ty) = find_declared(stmt, |_, ty| ty.is_bounded_varchar())?;
    Some(
        meta.violation(ctx, format!("Column \"{}\" is {}.", column, ty))
            .with_alternative(format!(
                "{column} text CHECK (char_length({column}) <= {})",
                ty.modifiers.join(",")
            )),
    )
}

fn is_identifier_column(name: &str) -> bool {
    let name = name.to_lowercase();
    name == "id" || name.ends_with("_id")
}

fn prefer_bigint_over_int(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let (column, ty) =
        find_declared(stmt, |name, ty| is_identifier_column(name) && ty.is_small_integer())?;
    let wider = if ty.is_serial() { "bigserial" } else { "bigint" };
    Some(
        meta.violation(ctx, format!("Identifier column \"{}\" is {}.", column, ty))
            .with_alternative(format!("{column} {wider}")),
    )
}

fn prefer_identity_over_serial(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let Statement::CreateTable(create) = stmt else {
        return None;
    };
    let column = create.columns.iter().find(|c| c.data_type.is_serial())?;
    let base = if column.data_type.is("bigserial") { "bigint" } else { "integer" };
    Some(
        meta.violation(ctx, format!("Column \"{}\" is {}.", column.name, column.data_type))
            .with_alternative(format!(
                "{} {base} GENERATED ALWAYS AS IDENTITY",
                column.name
            )),
    )
}

fn prefer_timestamptz(meta: &RuleMeta, stmt: &Statement, ctx: &RuleContext<'_>) -> Option<Violation> {
    let (column, _) = find_declared(stmt, |_, ty| ty.is_timestamp_without_tz())?;
    Some(
        meta.violation(ctx, format!("Column \"{}\" is timestamp without time zone.", column))
            .with_alternative(format!("{column} timestamptz")),
    )
}

fn ban_char_field(meta: &RuleMeta, stmt: &Statement, ctx: &RuleContext<'_>) -> Option<Violation> {
    let (column, ty) = find_declared(stmt, |_, ty| ty.is_char())?;
    Some(
        meta.violation(ctx, format!("Column \"{}\" is {}.", column, ty))
            .with_alternative(format!("{column} text")),
    )
}

fn prefer_jsonb_over_json(
    meta: &RuleMeta,
    stmt: &Statement,
    ctx: &RuleContext<'_>,
) -> Option<Violation> {
    let (column, _) = find_declared(stmt, |_, ty| ty.is("json"))?;
    Some(
        meta.violation(ctx, format!("Column \"{}\" is json.", column))
            .with_alternative(format!("{column} jsonb")),
    )
}

fn ban_money_type(meta: &RuleMeta, stmt: &Statement, ctx: &RuleContext<'_>) -> Option<Violation> {
    let (column, _) = find_declared(stmt, |_, ty| ty.is("money"))?;
    Some(
        meta.violation(ctx, format!("Column \"{}\" is money.", column))
            .with_alternative(format!("{column} numeric(12,2)")),
    )
}

fn ban_timetz(meta: &RuleMeta, stmt: &Statement, ctx: &RuleContext<'_>) -> Option<Violation> {
    let (column, _) = find_declared(stmt, |_, ty| ty.is("timetz"))?;
    Some(
        meta.violation(ctx, format!("Column \"{}\" is time with time zone.", column))
            .with_alternative(format!("{column} timestamptz")),
    )
}

#[cfg(test)]
mod tests {
    use crate::rules::test_support::{fired, fires, violation};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_varchar_and_char() {
        assert!(fires("CREATE TABLE t (name varchar(64));", "MP036"));
        assert!(!fires("CREATE TABLE t (name varchar);", "MP036"));
        assert!(fires("ALTER TABLE t ADD COLUMN code char(2);", "MP040"));
        let v = violation("CREATE TABLE t (name varchar(64));", 17, "MP036").unwrap();
        assert_eq!(
            v.safe_alternative.as_deref(),
            Some("name text CHECK (char_length(name) <= 64)")
        );
    }

    #[test]
    fn test_identifier_width() {
        assert!(fires("CREATE TABLE t (id int PRIMARY KEY);", "MP037"));
        assert!(fires("ALTER TABLE t ADD COLUMN account_id integer;", "MP037"));
        assert!(!fires("CREATE TABLE t (id bigint PRIMARY KEY);", "MP037"));
        assert!(!fires("CREATE TABLE t (count int);", "MP037"));
    }

    #[test]
    fn test_serial_in_new_table() {
        assert!(fires("CREATE TABLE t (id bigserial PRIMARY KEY);", "MP038"));
        assert!(!fires("CREATE TABLE t (id bigint GENERATED ALWAYS AS IDENTITY);", "MP038"));
    }

    #[test]
    fn test_discouraged_types() {
        let ids = fired(
            "CREATE TABLE t (at timestamp, doc json, price money, opens timetz, seen timestamptz);",
        );
        for id in ["MP039", "MP065", "MP066", "MP067"] {
            assert!(ids.iter().any(|fired| fired == id), "{id} missing");
        }
        assert!(!fires("CREATE TABLE t (seen timestamptz);", "MP039"));
    }
}
