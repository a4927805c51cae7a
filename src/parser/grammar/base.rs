//! nom input, error type and primitive parsers over the significant tokens
//! of one statement.

use nom::{
    combinator::{all_consuming, map, opt},
    error::ErrorKind,
    multi::separated_list1,
    sequence::delimited,
    IResult, InputLength, Parser,
};

use crate::ast::{Expr, QualifiedName};
use crate::parser::lexer::{Token, TokenKind};
use crate::parser::{line_at, ParseError};

/// Remaining tokens of a statement, plus the source they point into.
#[derive(Debug, Clone, Copy)]
pub struct Tokens<'a> {
    src: &'a str,
    toks: &'a [Token],
    /// End offset of the statement, for errors at end of input.
    end: usize,
}

impl<'a> Tokens<'a> {
    /// `toks` must not contain whitespace or comments; `src` is the whole file.
    pub fn new(src: &'a str, toks: &'a [Token]) -> Self {
        let end = toks.last().map_or(0, Token::end);
        Self { src, toks, end }
    }

    pub fn is_empty(&self) -> bool {
        self.toks.is_empty()
    }

    fn split_first(&self) -> Option<(&'a Token, Tokens<'a>)> {
        let (first, toks) = self.toks.split_first()?;
        Some((first, Tokens { toks, ..*self }))
    }

    fn text(&self, tok: &Token) -> &'a str {
        tok.text(self.src)
    }

    /// Source text of the tokens consumed between `self` and `rest`.
    fn text_until(&self, rest: &Tokens<'a>) -> &'a str {
        let used = self.toks.len().saturating_sub(rest.toks.len());
        match (self.toks.first(), used.checked_sub(1).and_then(|i| self.toks.get(i))) {
            (Some(first), Some(last)) => &self.src[first.offset..last.end()],
            _ => "",
        }
    }
}

impl InputLength for Tokens<'_> {
    fn input_len(&self) -> usize {
        self.toks.len()
    }
}

/// Where parsing stopped, with an optional message replacing the generic
/// syntax error.
#[derive(Debug, Clone)]
pub struct GrammarError<'a> {
    at: Tokens<'a>,
    message: Option<String>,
}

impl<'a> GrammarError<'a> {
    fn new(at: Tokens<'a>) -> Self {
        Self { at, message: None }
    }

    /// `syntax error at or near "X"` at the failing token, or at end of input.
    pub fn into_parse_error(self) -> ParseError {
        let src = self.at.src;
        let (offset, message) = match self.at.toks.first() {
            Some(tok) => (
                tok.offset,
                self.message
                    .unwrap_or_else(|| format!("syntax error at or near \"{}\"", tok.text(src))),
            ),
            None => (
                self.at.end,
                self.message
                    .unwrap_or_else(|| "syntax error at end of input".to_string()),
            ),
        };
        ParseError::new(message, offset, line_at(src, offset))
    }
}

impl<'a> nom::error::ParseError<Tokens<'a>> for GrammarError<'a> {
    fn from_error_kind(input: Tokens<'a>, _kind: ErrorKind) -> Self {
        Self::new(input)
    }

    fn append(_input: Tokens<'a>, _kind: ErrorKind, other: Self) -> Self {
        other
    }

    /// Keep the branch that got furthest.
    fn or(self, other: Self) -> Self {
        if other.at.input_len() < self.at.input_len() {
            other
        } else {
            self
        }
    }
}

pub type PResult<'a, O> = IResult<Tokens<'a>, O, GrammarError<'a>>;

/// Run `parser` over the whole statement.
pub fn parse_all<'a, O, F>(parser: F, input: Tokens<'a>) -> Result<O, ParseError>
where
    F: Parser<Tokens<'a>, O, GrammarError<'a>>,
{
    match all_consuming(parser)(input) {
        Ok((_, out)) => Ok(out),
        Err(nom::Err::Error(e) | nom::Err::Failure(e)) => Err(e.into_parse_error()),
        Err(nom::Err::Incomplete(_)) => {
            let end = Tokens { toks: &[], ..input };
            Err(GrammarError::new(end).into_parse_error())
        }
    }
}

fn error(at: Tokens<'_>) -> nom::Err<GrammarError<'_>> {
    nom::Err::Error(GrammarError::new(at))
}

/// Unrecoverable error with a custom message at `at`.
pub fn failure(at: Tokens<'_>, message: impl Into<String>) -> nom::Err<GrammarError<'_>> {
    nom::Err::Failure(GrammarError {
        at,
        message: Some(message.into()),
    })
}

/// One token for which `pred` holds, returning its text.
fn token<'a>(input: Tokens<'a>, pred: impl Fn(&Token, &str) -> bool) -> PResult<'a, &'a str> {
    match input.split_first() {
        Some((tok, rest)) if pred(tok, input.text(tok)) => Ok((rest, input.text(tok))),
        _ => Err(error(input)),
    }
}

pub fn any_token(input: Tokens<'_>) -> PResult<'_, &str> {
    token(input, |_, _| true)
}

/// A bare word.
pub fn word(input: Tokens<'_>) -> PResult<'_, &str> {
    token(input, |tok, _| tok.kind == TokenKind::Word)
}

pub fn keyword<'a>(kw: &'static str) -> impl FnMut(Tokens<'a>) -> PResult<'a, ()> {
    move |input| {
        token(input, |tok, text| {
            tok.kind == TokenKind::Word && text.eq_ignore_ascii_case(kw)
        })
        .map(|(rest, _)| (rest, ()))
    }
}

/// All of `kws` in order, or nothing.
pub fn keywords<'a>(kws: &'static [&'static str]) -> impl FnMut(Tokens<'a>) -> PResult<'a, ()> {
    move |input| {
        let mut rest = input;
        for &kw in kws {
            rest = keyword(kw)(rest).map_err(|_| error(input))?.0;
        }
        Ok((rest, ()))
    }
}

/// Any one of `kws`, returning the word as written.
pub fn keyword_in<'a>(kws: &'static [&'static str]) -> impl FnMut(Tokens<'a>) -> PResult<'a, &'a str> {
    move |input| {
        token(input, |tok, text| {
            tok.kind == TokenKind::Word && kws.iter().any(|kw| text.eq_ignore_ascii_case(kw))
        })
    }
}

pub fn punct<'a>(p: &'static str) -> impl FnMut(Tokens<'a>) -> PResult<'a, ()> {
    move |input| {
        token(input, |tok, text| tok.kind == TokenKind::Op && text == p).map(|(rest, _)| (rest, ()))
    }
}

/// Whether `parser` matched; consumes only on a match.
pub fn flag<'a, O, F>(parser: F) -> impl FnMut(Tokens<'a>) -> PResult<'a, bool>
where
    F: Parser<Tokens<'a>, O, GrammarError<'a>>,
{
    map(opt(parser), |matched| matched.is_some())
}

/// Run `parser`, returning the source text it consumed with its output.
pub fn with_raw<'a, O, F>(mut parser: F) -> impl FnMut(Tokens<'a>) -> PResult<'a, (&'a str, O)>
where
    F: Parser<Tokens<'a>, O, GrammarError<'a>>,
{
    move |input| {
        let (rest, out) = parser.parse(input)?;
        Ok((rest, (input.text_until(&rest), out)))
    }
}

pub fn raw<'a, O, F>(parser: F) -> impl FnMut(Tokens<'a>) -> PResult<'a, &'a str>
where
    F: Parser<Tokens<'a>, O, GrammarError<'a>>,
{
    map(with_raw(parser), |(text, _)| text)
}

/// An identifier, lowercased when bare, unquoted when quoted.
pub fn ident(input: Tokens<'_>) -> PResult<'_, String> {
    match input.split_first() {
        Some((tok, rest)) if tok.kind == TokenKind::Word => {
            Ok((rest, input.text(tok).to_lowercase()))
        }
        Some((tok, rest)) if tok.kind == TokenKind::QuotedIdent => {
            let text = input.text(tok);
            Ok((rest, text[1..text.len() - 1].replace("\"\"", "\"")))
        }
        _ => Err(error(input)),
    }
}

/// `name`, `schema.name` or `db.schema.name` (the database is dropped).
pub fn qualified_name(input: Tokens<'_>) -> PResult<'_, QualifiedName> {
    let (input, mut parts) = separated_list1(punct("."), ident)(input)?;
    let name = parts.pop().unwrap_or_default();
    let qualified = match parts.pop() {
        Some(schema) => QualifiedName::with_schema(schema, name),
        None => QualifiedName::new(name),
    };
    Ok((input, qualified))
}

pub fn qualified_name_list(input: Tokens<'_>) -> PResult<'_, Vec<QualifiedName>> {
    separated_list1(punct(","), qualified_name)(input)
}

/// `( ident [, ident ...] )`
pub fn ident_list(input: Tokens<'_>) -> PResult<'_, Vec<String>> {
    delimited(punct("("), separated_list1(punct(","), ident), punct(")"))(input)
}

/// A string constant with its quotes removed.
pub fn string_literal(input: Tokens<'_>) -> PResult<'_, String> {
    let (rest, text) = token(input, |tok, _| tok.kind == TokenKind::String)?;
    Ok((rest, unquote(text)))
}

/// A parenthesized group, skipped.
pub fn balanced(input: Tokens<'_>) -> PResult<'_, ()> {
    let (mut rest, _) = punct("(")(input)?;
    let mut depth = 1usize;
    while depth > 0 {
        let Some((tok, next)) = rest.split_first() else {
            return Err(error(rest));
        };
        if tok.kind == TokenKind::Op {
            match input.text(tok) {
                "(" => depth += 1,
                ")" => depth -= 1,
                _ => {}
            }
        }
        rest = next;
    }
    Ok((rest, ()))
}

/// An expression up to a depth-0 position where `stop` matches, an
/// unbalanced `)`, or the end of the statement.
///
/// At least one token is consumed. Function calls are recorded by the name
/// preceding an opening parenthesis.
pub fn expr_until<'a, O, F>(mut stop: F) -> impl FnMut(Tokens<'a>) -> PResult<'a, Expr>
where
    F: Parser<Tokens<'a>, O, GrammarError<'a>>,
{
    move |input| {
        let mut rest = input;
        let mut depth = 0usize;
        let mut functions = Vec::new();

        while let Some((tok, next)) = rest.split_first() {
            if depth == 0 && rest.input_len() < input.input_len() && stop.parse(rest).is_ok() {
                break;
            }
            if tok.kind == TokenKind::Op {
                match input.text(tok) {
                    "(" | "[" => depth += 1,
                    ")" | "]" if depth == 0 => break,
                    ")" | "]" => depth -= 1,
                    _ => {}
                }
            }
            let calls = next
                .toks
                .first()
                .is_some_and(|n| n.kind == TokenKind::Op && input.text(n) == "(");
            if calls && matches!(tok.kind, TokenKind::Word | TokenKind::QuotedIdent) {
                functions.push(input.text(tok).trim_matches('"').to_lowercase());
            }
            rest = next;
        }

        if rest.input_len() == input.input_len() {
            return Err(error(input));
        }
        Ok((rest, Expr::new(input.text_until(&rest), functions)))
    }
}

fn never(input: Tokens<'_>) -> PResult<'_, ()> {
    Err(error(input))
}

/// An expression running to an unbalanced `)` or the end of the statement.
pub fn expr(input: Tokens<'_>) -> PResult<'_, Expr> {
    expr_until(never)(input)
}

/// `( expr )`, returning the inner expression.
pub fn paren_expr(input: Tokens<'_>) -> PResult<'_, Expr> {
    delimited(punct("("), expr, punct(")"))(input)
}

/// Source text of everything left in the statement; consumes it.
pub fn rest_raw(input: Tokens<'_>) -> PResult<'_, &str> {
    let end = Tokens {
        toks: &input.toks[input.toks.len()..],
        ..input
    };
    Ok((end, input.text_until(&end)))
}

pub fn rest(input: Tokens<'_>) -> PResult<'_, ()> {
    map(rest_raw, |_| ())(input)
}

/// Tokens up to a depth-0 `,` or an unbalanced `)`, as source text.
pub fn skip_element(input: Tokens<'_>) -> PResult<'_, &str> {
    let mut rest = input;
    let mut depth = 0usize;
    while let Some((tok, next)) = rest.split_first() {
        if tok.kind == TokenKind::Op {
            match input.text(tok) {
                "(" => depth += 1,
                ")" if depth == 0 => break,
                ")" => depth -= 1,
                "," if depth == 0 => break,
                _ => {}
            }
        }
        rest = next;
    }
    Ok((rest, input.text_until(&rest)))
}

/// Skip tokens, and whole parenthesized groups, up to where `stop` matches
/// or the statement ends. `stop` itself is not consumed.
pub fn skip_to<'a, O, F>(mut stop: F) -> impl FnMut(Tokens<'a>) -> PResult<'a, ()>
where
    F: Parser<Tokens<'a>, O, GrammarError<'a>>,
{
    move |input| {
        let mut rest = input;
        while !rest.is_empty() && stop.parse(rest).is_err() {
            rest = if punct("(")(rest).is_ok() {
                balanced(rest)?.0
            } else {
                any_token(rest)?.0
            };
        }
        Ok((rest, ()))
    }
}

/// Consume the rest of the statement, reporting whether `kw` appears
/// outside any parentheses.
pub fn scan_top_level_keyword<'a>(kw: &'static str) -> impl FnMut(Tokens<'a>) -> PResult<'a, bool> {
    move |input| {
        let mut depth = 0usize;
        let mut found = false;
        for tok in input.toks {
            match (tok.kind, input.text(tok)) {
                (TokenKind::Op, "(") => depth += 1,
                (TokenKind::Op, ")") => depth = depth.saturating_sub(1),
                (TokenKind::Word, w) if depth == 0 && w.eq_ignore_ascii_case(kw) => found = true,
                _ => {}
            }
        }
        let (rest, _) = rest(input)?;
        Ok((rest, found))
    }
}

/// Strip quotes from a string constant, undoing doubled quotes.
pub fn unquote(text: &str) -> String {
    let body = text.trim_start_matches(['e', 'E', 'n', 'N']);
    if let Some(inner) = body.strip_prefix('\'').and_then(|b| b.strip_suffix('\'')) {
        return inner.replace("''", "'");
    }
    if body.starts_with('$') {
        if let Some(open) = body[1..].find('$') {
            let delimiter = &body[..open + 2];
            if let Some(inner) = body
                .strip_prefix(delimiter)
                .and_then(|b| b.strip_suffix(delimiter))
            {
                return inner.to_string();
            }
        }
    }
    text.to_string()
}
