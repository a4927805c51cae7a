//! nom grammar over the significant tokens of one statement.
//!
//! Each parser consumes one construct and returns the rest of the input.
//! The grammar is lenient about trailing clauses it does not model (storage
//! parameters, tablespaces, `WITH [NO] DATA`) but rejects unknown leading
//! keywords, so typos like `SELEC` still fail the file.

mod alter;
mod base;
mod create;
mod types;
mod utility;

pub use base::{unquote, Tokens};

use nom::{
    branch::alt,
    combinator::{cut, success, value},
    sequence::preceded,
};

use self::base::{flag, keyword, keyword_in, keywords, parse_all, rest, PResult};
use super::ParseError;
use crate::ast::Statement;

/// Top-level commands accepted without a detailed model.
const PASSTHROUGH: &[&str] = &[
    "SELECT", "VALUES", "TABLE", "WITH", "GRANT", "REVOKE", "COMMENT", "DO", "COPY", "CALL",
    "EXPLAIN", "NOTIFY", "LISTEN", "UNLISTEN", "DISCARD", "PREPARE", "EXECUTE", "DEALLOCATE",
    "SECURITY", "IMPORT", "REASSIGN", "CHECKPOINT", "LOAD", "MERGE", "FETCH", "DECLARE",
    "CLOSE", "MOVE",
];

/// Parse one statement; every token must be consumed.
pub fn statement(input: Tokens<'_>) -> Result<Statement, ParseError> {
    parse_all(command, input)
}

fn command(input: Tokens<'_>) -> PResult<'_, Statement> {
    alt((
        preceded(keyword("CREATE"), cut(create::create)),
        preceded(keyword("ALTER"), cut(alter::alter)),
        preceded(keyword("DROP"), cut(utility::drop)),
        preceded(keyword("TRUNCATE"), cut(utility::truncate)),
        preceded(keyword("VACUUM"), cut(utility::vacuum)),
        preceded(keyword_in(&["ANALYZE", "ANALYSE"]), cut(utility::analyze)),
        preceded(keyword("REINDEX"), cut(utility::reindex)),
        preceded(keyword("CLUSTER"), cut(utility::cluster)),
        preceded(keyword("REFRESH"), cut(utility::refresh)),
        utility::set,
        preceded(keyword("SHOW"), cut(utility::show)),
        utility::transaction,
        preceded(keyword("LOCK"), cut(utility::lock_table)),
        preceded(keyword("UPDATE"), cut(utility::update)),
        preceded(keyword("DELETE"), cut(utility::delete)),
        preceded(keyword("INSERT"), cut(utility::insert)),
        passthrough,
    ))(input)
}

fn passthrough(input: Tokens<'_>) -> PResult<'_, Statement> {
    let (input, command) = keyword_in(PASSTHROUGH)(input)?;
    other(command.to_ascii_uppercase())(input)
}

/// Accept the rest of the statement as an unmodelled command.
fn other<'a>(command: String) -> impl FnMut(Tokens<'a>) -> PResult<'a, Statement> {
    move |input| {
        let (input, _) = rest(input)?;
        Ok((
            input,
            Statement::Other {
                command: command.clone(),
            },
        ))
    }
}

/// `CASCADE` or `RESTRICT`; true for cascade.
fn drop_behavior(input: Tokens<'_>) -> PResult<'_, bool> {
    alt((
        value(true, keyword("CASCADE")),
        value(false, keyword("RESTRICT")),
        success(false),
    ))(input)
}

fn if_exists(input: Tokens<'_>) -> PResult<'_, bool> {
    flag(keywords(&["IF", "EXISTS"]))(input)
}

fn if_not_exists(input: Tokens<'_>) -> PResult<'_, bool> {
    flag(keywords(&["IF", "NOT", "EXISTS"]))(input)
}
