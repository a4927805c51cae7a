//! Data type names.

use nom::{
    branch::alt,
    combinator::{map, not, opt, value},
    multi::{many0, separated_list1},
    sequence::{delimited, preceded},
};

use super::base::{any_token, expr_until, flag, ident, keyword, keyword_in, keywords, paren_expr, punct, PResult, Tokens};
use crate::ast::DataType;

const INTERVAL_FIELDS: &[&str] = &["YEAR", "MONTH", "DAY", "HOUR", "MINUTE", "SECOND", "TO"];

/// Parse a type name such as `varchar(255)`, `timestamp(3) with time zone`
/// or `public.citext[]`. Schema qualifiers are dropped.
pub(super) fn data_type(input: Tokens<'_>) -> PResult<'_, DataType> {
    let (input, mut parts) = separated_list1(punct("."), ident)(input)?;
    let base = parts.pop().unwrap_or_default();

    let (input, mut name) = match base.as_str() {
        "double" => map(keyword("PRECISION"), |_| "double precision".to_string())(input)?,
        "character" | "char" => map(flag(keyword("VARYING")), |varying| {
            if varying { "character varying".to_string() } else { base.clone() }
        })(input)?,
        "bit" => map(flag(keyword("VARYING")), |varying| {
            if varying { "bit varying".to_string() } else { base.clone() }
        })(input)?,
        "national" => {
            let (input, next) = ident(input)?;
            let (input, varying) = flag(keyword("VARYING"))(input)?;
            (input, if varying { "character varying".to_string() } else { next })
        }
        _ => (input, base.clone()),
    };

    let (input, modifiers) = opt(delimited(
        punct("("),
        separated_list1(punct(","), map(expr_until(punct(",")), |e| e.raw)),
        punct(")"),
    ))(input)?;
    let mut modifiers = modifiers.unwrap_or_default();

    let (input, zone) = if base == "timestamp" || base == "time" {
        opt(alt((
            value(" with time zone", keywords(&["WITH", "TIME", "ZONE"])),
            value(" without time zone", keywords(&["WITHOUT", "TIME", "ZONE"])),
        )))(input)?
    } else {
        (input, None)
    };
    if let Some(zone) = zone {
        name.push_str(zone);
    }

    let input = if base == "interval" {
        let (input, _) = many0(keyword_in(INTERVAL_FIELDS))(input)?;
        let (input, precision) = if modifiers.is_empty() {
            opt(paren_expr)(input)?
        } else {
            (input, None)
        };
        modifiers.extend(precision.map(|p| p.raw));
        input
    } else {
        input
    };

    let (input, bounds) = many0(delimited(
        punct("["),
        opt(preceded(not(punct("]")), any_token)),
        punct("]"),
    ))(input)?;
    let (input, array_keyword) = flag(preceded(
        keyword("ARRAY"),
        opt(delimited(punct("["), any_token, punct("]"))),
    ))(input)?;

    let mut data_type = DataType::new(name).with_modifiers(modifiers);
    data_type.array = !bounds.is_empty() || array_keyword;
    Ok((input, data_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::grammar::base::{parse_all, tests::significant};
    use pretty_assertions::assert_eq;

    fn parse_type(src: &str) -> DataType {
        let toks = significant(src);
        parse_all(data_type, Tokens::new(src, &toks)).unwrap()
    }

    #[test]
    fn test_multi_word_types() {
        assert_eq!(parse_type("double precision").name, "double precision");
        assert_eq!(parse_type("character varying(40)").to_string(), "varchar(40)");
        assert_eq!(parse_type("timestamp(3) with time zone").name, "timestamptz");
        assert_eq!(parse_type("TIMESTAMP WITHOUT TIME ZONE").name, "timestamp");
        assert_eq!(parse_type("time with time zone").name, "timetz");
        assert_eq!(parse_type("interval day to second").name, "interval");
    }

    #[test]
    fn test_modifiers_and_arrays() {
        assert_eq!(
            parse_type("numeric(10, 2)").modifiers,
            vec!["10".to_string(), "2".to_string()]
        );
        assert!(parse_type("text[]").array);
        assert!(parse_type("int4[3]").array);
        assert_eq!(parse_type("pg_catalog.int4").name, "integer");
        assert_eq!(parse_type("char(2)").name, "char");
    }

    #[test]
    fn test_double_requires_precision() {
        let src = "double";
        let toks = significant(src);
        let err = parse_all(data_type, Tokens::new(src, &toks)).unwrap_err();
        assert_eq!(err.message, "syntax error at end of input");
    }
}
