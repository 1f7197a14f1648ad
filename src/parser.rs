//! Parser for the bracket syntax
//!
//! Source text is split into tokens by [`lexer::tokenize`] and then parsed by
//! recursive descent into a [`Value`] expression tree. `[import <path>]` forms
//! are resolved while parsing: the resolver supplies the bytes of the named
//! file, which is parsed as its own unit and spliced in at the import site.

use std::io;

use log::debug;
use nom::{
    IResult, Parser,
    bytes::complete::take_while1,
    character::complete::{char, digit0, digit1, one_of},
    combinator::{all_consuming, opt, recognize},
};

use crate::ast::{IntType, Value};
use crate::{Error, Location, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

pub mod lexer;

use lexer::{Token, end_of_input, tokenize};

/// Supplies the contents of imported files
pub trait ImportResolver {
    /// Return the raw bytes for `import_path`, imported from `base_file`
    fn resolve(&self, import_path: &str, base_file: &str) -> io::Result<Vec<u8>>;
}

impl<F> ImportResolver for F
where
    F: Fn(&str, &str) -> io::Result<Vec<u8>>,
{
    fn resolve(&self, import_path: &str, base_file: &str) -> io::Result<Vec<u8>> {
        self(import_path, base_file)
    }
}

/// Reads imports from the local filesystem.
/// The import path is used as written, relative to the process working directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSystemResolver;

impl ImportResolver for FileSystemResolver {
    fn resolve(&self, import_path: &str, base_file: &str) -> io::Result<Vec<u8>> {
        debug!("reading {import_path} (imported from {base_file})");
        std::fs::read(import_path)
    }
}

/// Parse exactly one expression, resolving imports from the filesystem.
///
/// `file` names the source in diagnostics.
pub fn parse(input: &str, file: &str) -> Result<Value, Error> {
    parse_with_resolver(input, file, &FileSystemResolver)
}

/// Parse exactly one expression, resolving imports through `resolver`
pub fn parse_with_resolver(
    input: &str,
    file: &str,
    resolver: &dyn ImportResolver,
) -> Result<Value, Error> {
    let mut import_chain = vec![file.to_owned()];
    parse_unit(input, file, resolver, &mut import_chain)
}

/// Parse one top-level unit (the main input or an imported file)
fn parse_unit(
    input: &str,
    file: &str,
    resolver: &dyn ImportResolver,
    import_chain: &mut Vec<String>,
) -> Result<Value, Error> {
    let tokens = tokenize(input, file)?;
    let (end_row, end_column) = end_of_input(input);

    let mut cursor = TokenCursor {
        tokens: &tokens,
        file,
        end: Location::new(file, end_row, end_column),
        resolver,
        import_chain,
    };
    let expr = cursor.parse_expr(0)?;

    if let [unexpected, ..] = cursor.tokens {
        let leftover: Vec<&str> = cursor.tokens.iter().map(|t| t.content.as_str()).collect();
        return Err(ParseError::at(
            ParseErrorKind::TrailingContent,
            format!("unexpected tokens after parsing: {}", leftover.join(" ")),
            unexpected.location(file),
        )
        .with_found(unexpected.content.clone())
        .into());
    }

    Ok(expr)
}

struct TokenCursor<'a> {
    tokens: &'a [Token],
    file: &'a str,
    end: Location,
    resolver: &'a dyn ImportResolver,
    /// Files currently being parsed, outermost first
    import_chain: &'a mut Vec<String>,
}

impl<'a> TokenCursor<'a> {
    fn next_token(&mut self) -> Option<&'a Token> {
        let tokens = self.tokens;
        let (token, rest) = tokens.split_first()?;
        self.tokens = rest;
        Some(token)
    }

    fn parse_expr(&mut self, depth: usize) -> Result<Value, Error> {
        let Some(token) = self.next_token() else {
            return Err(
                ParseError::at(ParseErrorKind::Incomplete, "unexpected EOF", self.end.clone())
                    .into(),
            );
        };

        if token.is_open() {
            self.parse_list(token, depth)
        } else if token.is_close() {
            Err(ParseError::at(
                ParseErrorKind::InvalidSyntax,
                "unexpected ]",
                token.location(self.file),
            )
            .with_found("]")
            .into())
        } else {
            parse_atom(token, self.file)
        }
    }

    fn parse_list(&mut self, open: &'a Token, depth: usize) -> Result<Value, Error> {
        if depth >= MAX_PARSE_DEPTH {
            return Err(ParseError::at(
                ParseErrorKind::TooDeeplyNested,
                format!("expression too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
                open.location(self.file),
            )
            .into());
        }

        let tokens = self.tokens;
        if let [keyword, path, rest @ ..] = tokens
            && keyword.content == "import"
        {
            return self.parse_import(keyword, path, rest);
        }

        let mut elements = Vec::new();
        loop {
            match self.tokens.first() {
                None => {
                    return Err(ParseError::at(
                        ParseErrorKind::Incomplete,
                        "missing ]",
                        open.location(self.file),
                    )
                    .into());
                }
                Some(token) if token.is_close() => {
                    self.next_token();
                    return Ok(Value::list(elements));
                }
                Some(_) => elements.push(self.parse_expr(depth + 1)?),
            }
        }
    }

    /// Resolve `[import <path>]` and splice in the imported expression
    fn parse_import(
        &mut self,
        keyword: &'a Token,
        path: &'a Token,
        rest: &'a [Token],
    ) -> Result<Value, Error> {
        let site = keyword.location(self.file);

        let [close, rest @ ..] = rest else {
            return Err(missing_import_close(site));
        };
        if !close.is_close() {
            return Err(missing_import_close(site));
        }
        if path.is_open() || path.is_close() {
            return Err(ParseError::at(
                ParseErrorKind::InvalidSyntax,
                "import path must be a single token",
                path.location(self.file),
            )
            .with_found(path.content.clone())
            .into());
        }
        self.tokens = rest;

        let import_path = strip_quotes(&path.content);
        if self.import_chain.iter().any(|file| file == import_path) {
            return Err(ParseError::at(
                ParseErrorKind::Import,
                format!(
                    "circular import of {import_path} (via {})",
                    self.import_chain.join(" -> ")
                ),
                site,
            )
            .into());
        }

        debug!("importing {import_path} into {}", self.file);
        let source = self
            .resolver
            .resolve(import_path, self.file)
            .map_err(|e| e.to_string())
            .and_then(|bytes| String::from_utf8(bytes).map_err(|e| e.to_string()))
            .map_err(|reason| {
                Error::from(ParseError::at(
                    ParseErrorKind::Import,
                    format!("failed to import file {import_path}: {reason}"),
                    site.clone(),
                ))
            })?;

        self.import_chain.push(import_path.to_owned());
        let imported = parse_unit(&source, import_path, self.resolver, self.import_chain);
        self.import_chain.pop();

        imported.map_err(|e| {
            ParseError::at(
                ParseErrorKind::Import,
                format!("error in imported file {import_path}: {e}"),
                site,
            )
            .into()
        })
    }
}

fn missing_import_close(site: Location) -> Error {
    ParseError::at(
        ParseErrorKind::InvalidSyntax,
        "missing ] after import statement",
        site,
    )
    .into()
}

/// Import paths may be written as string literals or bare tokens
fn strip_quotes(content: &str) -> &str {
    ['\'', '"']
        .into_iter()
        .find_map(|quote| {
            content
                .strip_prefix(quote)
                .and_then(|inner| inner.strip_suffix(quote))
        })
        .unwrap_or(content)
}

/// `-?[0-9]*\.[0-9]+([eE]-?[0-9]+)?`
fn float_literal(input: &str) -> IResult<&str, &str> {
    recognize((
        opt(char('-')),
        digit0,
        char('.'),
        digit1,
        opt((one_of("eE"), opt(char('-')), digit1)),
    ))
    .parse(input)
}

/// `-?[0-9]+`
fn int_literal(input: &str) -> IResult<&str, &str> {
    recognize((opt(char('-')), digit1)).parse(input)
}

/// `[A-Za-z0-9_-]+`
fn symbol_literal(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-').parse(input)
}

/// Classify a non-bracket token.
///
/// String literals are recognized by their delimiters; otherwise the keywords
/// `true`/`false` win, then the float, integer and symbol patterns in that order.
fn parse_atom(token: &Token, file: &str) -> Result<Value, Error> {
    let content = token.content.as_str();

    if content.len() >= 2
        && let Some(text) = content
            .strip_prefix('\'')
            .and_then(|inner| inner.strip_suffix('\''))
    {
        return Ok(Value::String(text.to_owned()));
    }

    match content {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        _ => {}
    }

    if all_consuming(float_literal).parse(content).is_ok()
        && let Ok(x) = content.parse::<f64>()
    {
        // Overflow parses as infinity, which has no literal form
        if !x.is_finite() {
            return Err(ParseError::at(
                ParseErrorKind::InvalidSyntax,
                format!("float literal out of range: {content}"),
                token.location(file),
            )
            .with_found(content)
            .into());
        }
        return Ok(Value::Float(x));
    }

    if all_consuming(int_literal).parse(content).is_ok() {
        return content.parse::<IntType>().map(Value::Int).map_err(|_| {
            ParseError::at(
                ParseErrorKind::InvalidSyntax,
                format!("integer literal out of range: {content}"),
                token.location(file),
            )
            .with_found(content)
            .into()
        });
    }

    if all_consuming(symbol_literal).parse(content).is_ok() {
        return Ok(Value::Symbol(content.to_owned()));
    }

    Err(ParseError::at(
        ParseErrorKind::InvalidSyntax,
        format!("invalid token: {content}"),
        token.location(file),
    )
    .with_found(content)
    .into())
}
