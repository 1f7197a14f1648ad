use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::take_while1,
    character::complete::{char, multispace0, one_of},
    combinator::{map, recognize},
    error::ErrorKind,
};

use crate::{Error, Location, ParseError, ParseErrorKind};

/// A lexical token with the position of its first byte
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Token text. String literals keep their `'` delimiters, with escapes already resolved.
    pub content: String,
    pub row: usize,
    pub column: usize,
}

impl Token {
    pub fn is_open(&self) -> bool {
        self.content == "["
    }

    pub fn is_close(&self) -> bool {
        self.content == "]"
    }

    pub fn location(&self, file: &str) -> Location {
        Location::new(file, self.row, self.column)
    }
}

/// Maps byte offsets to 1-based row/column pairs.
///
/// `\r\n` and `\n\r` are a single line break; any other `\r` or `\n` is one break each.
pub(crate) struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub(crate) fn new(input: &str) -> Self {
        let bytes = input.as_bytes();
        let mut line_starts = vec![0];
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                first @ (b'\n' | b'\r') => {
                    let paired = if first == b'\n' { b'\r' } else { b'\n' };
                    i += if bytes.get(i + 1) == Some(&paired) { 2 } else { 1 };
                    line_starts.push(i);
                }
                _ => i += 1,
            }
        }
        LineIndex { line_starts }
    }

    pub(crate) fn position(&self, offset: usize) -> (usize, usize) {
        let row = self.line_starts.partition_point(|&start| start <= offset);
        let line_start = self.line_starts[row - 1];
        (row, offset - line_start + 1)
    }
}

fn is_delimiter(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n' | '[' | ']' | '\'')
}

fn whitespace(input: &str) -> IResult<&str, &str> {
    multispace0.parse(input)
}

fn bracket(input: &str) -> IResult<&str, &str> {
    recognize(one_of("[]")).parse(input)
}

fn bare_atom(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !is_delimiter(c)).parse(input)
}

/// Lex a single-quoted string literal.
/// A backslash takes the following character verbatim; there is no escape table.
fn string_literal(input: &str) -> IResult<&str, String> {
    let (mut remaining, _) = char('\'').parse(input)?;
    let mut content = String::from("'");

    loop {
        let mut chars = remaining.chars();
        match chars.next() {
            Some('\'') => {
                content.push('\'');
                return Ok((chars.as_str(), content));
            }
            Some('\\') => match chars.next() {
                Some(escaped) => content.push(escaped),
                None => break,
            },
            Some(ch) => content.push(ch),
            None => break,
        }
        remaining = chars.as_str();
    }

    // Reported at the opening quote
    Err(nom::Err::Failure(nom::error::Error::new(input, ErrorKind::Eof)))
}

fn token(input: &str) -> IResult<&str, String> {
    alt((
        map(bracket, str::to_owned),
        string_literal,
        map(bare_atom, str::to_owned),
    ))
    .parse(input)
}

/// Convert nom lexing errors to located parse errors
fn lex_error(
    source: &str,
    index: &LineIndex,
    file: &str,
    error: nom::Err<nom::error::Error<&str>>,
) -> Error {
    let (kind, message, rest) = match error {
        nom::Err::Error(e) | nom::Err::Failure(e) => match e.code {
            ErrorKind::Eof => (
                ParseErrorKind::Incomplete,
                "unterminated string literal",
                e.input,
            ),
            _ => (ParseErrorKind::InvalidSyntax, "invalid syntax", e.input),
        },
        nom::Err::Incomplete(_) => (ParseErrorKind::Incomplete, "incomplete input", ""),
    };
    let (row, column) = index.position(source.len() - rest.len());
    ParseError::at(kind, message, Location::new(file, row, column)).into()
}

/// Split source text into tokens.
///
/// `[` and `]` are always tokens of their own. Whitespace (space, tab, CR, LF)
/// separates tokens and is dropped. Everything else is a string literal or a
/// bare atom, classified later by the parser.
pub fn tokenize(input: &str, file: &str) -> Result<Vec<Token>, Error> {
    let index = LineIndex::new(input);
    let mut tokens = Vec::new();
    let mut remaining = input;

    loop {
        let (rest, _) = whitespace(remaining).map_err(|e| lex_error(input, &index, file, e))?;
        if rest.is_empty() {
            break;
        }

        let offset = input.len() - rest.len();
        let (rest, content) = token(rest).map_err(|e| lex_error(input, &index, file, e))?;
        let (row, column) = index.position(offset);
        tokens.push(Token {
            content,
            row,
            column,
        });
        remaining = rest;
    }

    Ok(tokens)
}

/// Position just past the last byte of `input`
pub(crate) fn end_of_input(input: &str) -> (usize, usize) {
    LineIndex::new(input).position(input.len())
}
