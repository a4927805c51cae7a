//! SQL tokenizer using nom.
//!
//! Splits PostgreSQL source into tokens that keep only their byte span; the
//! text is always sliced back out of the source, so tokens are `Copy`.
//! Comments and whitespace are kept as tokens so the caller can decide
//! where a statement starts.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_until, take_while},
    character::complete::{char, digit0, digit1, multispace1, not_line_ending, one_of, satisfy},
    combinator::{opt, recognize, value},
    error::{Error, ErrorKind},
    sequence::{pair, tuple},
    IResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Whitespace,
    LineComment,
    BlockComment,
    /// Bare identifier or keyword.
    Word,
    /// `"Quoted Identifier"`
    QuotedIdent,
    /// String constant, including `E''`, `B''`, `X''` and dollar-quoted bodies.
    String,
    Number,
    /// Positional parameter `$1`.
    Param,
    /// Operator or punctuation.
    Op,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub offset: usize,
    pub len: usize,
}

impl Token {
    pub fn text<'a>(&self, src: &'a str) -> &'a str {
        &src[self.offset..self.offset + self.len]
    }

    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    /// Whitespace and comments.
    pub fn is_trivia(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Whitespace | TokenKind::LineComment | TokenKind::BlockComment
        )
    }
}

/// Tokenization failure at a byte offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub message: String,
    pub offset: usize,
}

/// Tokenize a whole source file.
pub fn tokenize(src: &str) -> Result<Vec<Token>, LexError> {
    let mut tokens = Vec::new();
    let mut rest = src;
    while !rest.is_empty() {
        let offset = src.len() - rest.len();
        match token(rest) {
            Ok((remaining, kind)) => {
                tokens.push(Token {
                    kind,
                    offset,
                    len: rest.len() - remaining.len(),
                });
                rest = remaining;
            }
            Err(_) => {
                return Err(LexError {
                    message: describe_failure(rest),
                    offset,
                });
            }
        }
    }
    Ok(tokens)
}

fn describe_failure(rest: &str) -> String {
    if rest.starts_with("/*") {
        "unterminated /* comment".to_string()
    } else if rest.starts_with('"') {
        "unterminated quoted identifier".to_string()
    } else if rest.starts_with('\'') || starts_prefixed_string(rest) {
        "unterminated quoted string".to_string()
    } else if dollar_delimiter(rest).is_ok() {
        "unterminated dollar-quoted string".to_string()
    } else {
        let c = rest.chars().next().unwrap_or(' ');
        format!("syntax error at or near \"{}\"", c)
    }
}

fn starts_prefixed_string(rest: &str) -> bool {
    let mut chars = rest.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some('e' | 'E' | 'n' | 'N' | 'b' | 'B' | 'x' | 'X'), Some('\''))
    )
}

/// Parse one token.
fn token(input: &str) -> IResult<&str, TokenKind> {
    alt((
        value(TokenKind::Whitespace, multispace1),
        value(TokenKind::LineComment, line_comment),
        value(TokenKind::BlockComment, block_comment),
        value(TokenKind::String, dollar_string),
        value(TokenKind::Param, recognize(pair(char('$'), digit1))),
        value(TokenKind::String, escape_string),
        value(TokenKind::String, prefixed_string),
        value(TokenKind::QuotedIdent, quoted_ident),
        value(TokenKind::Number, number),
        value(TokenKind::Word, word),
        value(TokenKind::Op, operator),
    ))(input)
}

/// `-- ...` up to the end of the line.
fn line_comment(input: &str) -> IResult<&str, &str> {
    recognize(pair(tag("--"), not_line_ending))(input)
}

/// `/* ... */`, nesting as PostgreSQL does.
fn block_comment(input: &str) -> IResult<&str, &str> {
    let (mut rest, _) = tag("/*")(input)?;
    let mut depth = 1usize;
    while depth > 0 {
        if let Some(r) = rest.strip_prefix("*/") {
            depth -= 1;
            rest = r;
        } else if let Some(r) = rest.strip_prefix("/*") {
            depth += 1;
            rest = r;
        } else {
            let mut chars = rest.chars();
            if chars.next().is_none() {
                return Err(nom::Err::Error(Error::new(input, ErrorKind::TakeUntil)));
            }
            rest = chars.as_str();
        }
    }
    Ok((rest, &input[..input.len() - rest.len()]))
}

/// `$tag$` or `$$`. A tag cannot start with a digit, which keeps `$1` a parameter.
fn dollar_delimiter(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        char('$'),
        opt(pair(
            satisfy(|c| c.is_alphabetic() || c == '_'),
            take_while(|c: char| c.is_alphanumeric() || c == '_'),
        )),
        char('$'),
    )))(input)
}

fn dollar_string(input: &str) -> IResult<&str, &str> {
    let (rest, delimiter) = dollar_delimiter(input)?;
    let (rest, _) = take_until(delimiter)(rest)?;
    let (rest, _) = tag(delimiter)(rest)?;
    Ok((rest, &input[..input.len() - rest.len()]))
}

/// Quoted text where a doubled quote is an escaped quote. With
/// `backslash`, a backslash escapes the following character too.
fn quoted(input: &str, quote: char, backslash: bool) -> IResult<&str, &str> {
    let (body, _) = char(quote)(input)?;
    let mut chars = body.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if backslash && c == '\\' {
            chars.next();
        } else if c == quote {
            if matches!(chars.peek(), Some((_, next)) if *next == quote) {
                chars.next();
            } else {
                let end = input.len() - body.len() + i + c.len_utf8();
                return Ok((&input[end..], &input[..end]));
            }
        }
    }
    Err(nom::Err::Error(Error::new(input, ErrorKind::Char)))
}

fn quoted_ident(input: &str) -> IResult<&str, &str> {
    quoted(input, '"', false)
}

/// `E'...'` with C-style escapes.
fn escape_string(input: &str) -> IResult<&str, &str> {
    recognize(pair(one_of("eE"), |i| quoted(i, '\'', true)))(input)
}

/// `'...'`, `N'...'`, `B'...'`, `X'...'`
fn prefixed_string(input: &str) -> IResult<&str, &str> {
    recognize(pair(opt(one_of("nNbBxX")), |i| quoted(i, '\'', false)))(input)
}

fn number(input: &str) -> IResult<&str, &str> {
    let exponent = tuple((one_of("eE"), opt(one_of("+-")), digit1));
    alt((
        recognize(tuple((digit1, opt(pair(char('.'), digit0)), opt(exponent)))),
        recognize(pair(char('.'), digit1)),
    ))(input)
}

fn word(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c| c.is_alphabetic() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || c == '_' || c == '$'),
    ))(input)
}

fn operator(input: &str) -> IResult<&str, &str> {
    alt((
        alt((
            tag("::"),
            tag("<>"),
            tag("<="),
            tag(">="),
            tag("!="),
            tag("=>"),
            tag("->>"),
            tag("->"),
            tag("||"),
            tag("#>>"),
            tag("#>"),
            tag("@>"),
            tag("<@"),
        )),
        recognize(one_of("(),;.[]{}+-*/%<>=!~^&|#@?:")),
    ))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<(TokenKind, &str)> {
        tokenize(src)
            .unwrap()
            .into_iter()
            .filter(|t| t.kind != TokenKind::Whitespace)
            .map(|t| (t.kind, t.text(src)))
            .collect()
    }

    #[test]
    fn test_basic_tokens() {
        let toks = kinds("CREATE INDEX idx ON users (email);");
        assert_eq!(toks[0], (TokenKind::Word, "CREATE"));
        assert_eq!(toks[4], (TokenKind::Op, "("));
        assert_eq!(toks.last().unwrap(), &(TokenKind::Op, ";"));
    }

    #[test]
    fn test_strings_and_comments() {
        let toks = kinds("-- note\nSELECT 'it''s', E'a\\'b', $fn$ x; y $fn$, $1 /* c /* nested */ */");
        assert_eq!(toks[0], (TokenKind::LineComment, "-- note"));
        assert_eq!(toks[2], (TokenKind::String, "'it''s'"));
        assert_eq!(toks[4], (TokenKind::String, "E'a\\'b'"));
        assert_eq!(toks[6], (TokenKind::String, "$fn$ x; y $fn$"));
        assert_eq!(toks[8], (TokenKind::Param, "$1"));
        assert_eq!(toks[9].0, TokenKind::BlockComment);
    }

    #[test]
    fn test_quoted_identifier_and_operators() {
        let toks = kinds("\"Order Items\"::text <> x->>'k'");
        assert_eq!(toks[0], (TokenKind::QuotedIdent, "\"Order Items\""));
        assert_eq!(toks[1], (TokenKind::Op, "::"));
        assert_eq!(toks[3], (TokenKind::Op, "<>"));
        assert_eq!(toks[5], (TokenKind::Op, "->>"));
    }

    #[test]
    fn test_numbers() {
        let toks = kinds("1 2.5 .5 1e10");
        assert!(toks.iter().all(|(k, _)| *k == TokenKind::Number));
        assert_eq!(toks.len(), 4);
    }

    #[test]
    fn test_lex_errors() {
        let err = tokenize("SELECT 'oops").unwrap_err();
        assert_eq!(err.message, "unterminated quoted string");
        assert_eq!(err.offset, 7);

        let err = tokenize("/* never closed").unwrap_err();
        assert_eq!(err.message, "unterminated /* comment");

        let err = tokenize("DO $$ begin").unwrap_err();
        assert_eq!(err.message, "unterminated dollar-quoted string");
    }
}
