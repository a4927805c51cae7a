//! SQL front-end.
//!
//! Turns a migration file into [`ParsedStatement`]s. The analysis only
//! depends on the [`SqlParser`] trait, so a different parser can be plugged
//! in; [`DdlParser`] is the built-in implementation:
//!
//! ```text
//! source ──lexer──► tokens ──split on ';'──► statements ──grammar──► Statement
//! ```
//!
//! The grammar models the DDL and utility commands that matter for lock
//! analysis in detail and accepts other valid top-level commands as
//! [`Statement::Other`](crate::ast::Statement::Other).

mod grammar;
pub mod lexer;

pub use grammar::unquote;

use serde::Serialize;
use thiserror::Error;

use crate::ast::ParsedStatement;
use lexer::{tokenize, Token, TokenKind};

/// A parser-reported problem.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub message: String,
    /// Byte offset into the source.
    pub offset: usize,
    /// 1-based line.
    pub line: usize,
}

impl ParseError {
    pub fn new(message: impl Into<String>, offset: usize, line: usize) -> Self {
        Self {
            message: message.into(),
            offset,
            line,
        }
    }
}

/// Anything that can split a migration into parsed statements.
pub trait SqlParser: Send + Sync {
    /// Parse a whole file. On failure, every error found is returned.
    fn parse(&self, sql: &str) -> Result<Vec<ParsedStatement>, Vec<ParseError>>;
}

/// Built-in PostgreSQL DDL parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct DdlParser;

impl SqlParser for DdlParser {
    fn parse(&self, sql: &str) -> Result<Vec<ParsedStatement>, Vec<ParseError>> {
        parse_sql(sql)
    }
}

/// 1-based line number of a byte offset.
pub fn line_at(src: &str, offset: usize) -> usize {
    let offset = offset.min(src.len());
    src.as_bytes()[..offset].iter().filter(|&&b| b == b'\n').count() + 1
}

/// Parse a migration file into statements.
///
/// Statements are split on top-level `;`. A statement's span starts at its
/// first token, so comment lines above it are not part of it. Errors in one
/// statement do not stop the others from being checked; all errors are
/// returned together.
pub fn parse_sql(src: &str) -> Result<Vec<ParsedStatement>, Vec<ParseError>> {
    let tokens = tokenize(src).map_err(|e| {
        vec![ParseError::new(e.message, e.offset, line_at(src, e.offset))]
    })?;
    let significant: Vec<Token> = tokens.into_iter().filter(|t| !t.is_trivia()).collect();

    let mut statements = Vec::new();
    let mut errors = Vec::new();

    for chunk in significant.split(|t| t.kind == TokenKind::Op && t.text(src) == ";") {
        let (Some(first), Some(last)) = (chunk.first(), chunk.last()) else {
            continue;
        };
        match grammar::statement(grammar::Tokens::new(src, chunk)) {
            Ok(stmt) => statements.push(ParsedStatement {
                stmt,
                offset: first.offset,
                length: last.end() - first.offset,
                line: line_at(src, first.offset),
                sql: src[first.offset..last.end()].to_string(),
            }),
            Err(e) => errors.push(e),
        }
    }

    if errors.is_empty() {
        Ok(statements)
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;

    #[test]
    fn test_statement_spans() {
        let src = "-- add index\nCREATE INDEX idx ON users (email);\n\nALTER TABLE users\n  ADD COLUMN age int;";
        let stmts = parse_sql(src).unwrap();
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0].line, 2);
        assert_eq!(stmts[0].sql, "CREATE INDEX idx ON users (email)");
        assert_eq!(stmts[1].line, 4);
        assert_eq!(stmts[1].sql, "ALTER TABLE users\n  ADD COLUMN age int");
        assert_eq!(&src[stmts[1].offset..stmts[1].offset + stmts[1].length], stmts[1].sql);
    }

    #[test]
    fn test_semicolon_inside_function_body() {
        let src = "CREATE FUNCTION f() RETURNS int AS $$ SELECT 1; $$ LANGUAGE sql; SELECT 1;";
        let stmts = parse_sql(src).unwrap();
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0].stmt.kind(), "CREATE FUNCTION");
    }

    #[test]
    fn test_errors_are_aggregated() {
        let errors = parse_sql("SELEC 1;\nCREATE INDEX ON users (id);\nFOO bar;").unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].line, 1);
        assert_eq!(errors[1].line, 3);
        assert_eq!(errors[1].to_string(), "line 3: syntax error at or near \"FOO\"");
    }

    #[test]
    fn test_lex_error_reported_with_line() {
        let errors = parse_sql("SELECT 1;\nSELECT 'open;").unwrap_err();
        assert_eq!(errors, vec![ParseError::new("unterminated quoted string", 17, 2)]);
    }

    #[test]
    fn test_empty_statements_skipped() {
        let stmts = DdlParser.parse(";;\n-- only a comment\n").unwrap();
        assert!(stmts.is_empty());
    }

    #[test]
    fn test_line_at() {
        assert_eq!(line_at("a\nb\nc", 0), 1);
        assert_eq!(line_at("a\nb\nc", 2), 2);
        assert_eq!(line_at("a\nb\nc", 100), 3);
    }

    #[test]
    fn test_trait_object() {
        let parser: Box<dyn SqlParser> = Box::new(DdlParser);
        let stmts = parser.parse("VACUUM FULL users;").unwrap();
        assert!(matches!(&stmts[0].stmt, Statement::Vacuum(v) if v.full));
    }
}
