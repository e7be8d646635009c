//! Line-oriented tuple reader.
//!
//! Every line holds zero or more whitespace separated terms in N-Triples
//! syntax (`<iri>`, `_:label`, `"lexical"`, `"lexical"^^<datatype>`,
//! `"lexical"@lang`) terminated by `.`. Blank lines and `#` comment lines are
//! skipped. A malformed line is either fatal or skipped, depending on the
//! [`ParsePolicy`] the reader was built with.

use std::collections::BTreeSet;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::ops::RangeInclusive;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{Literal, Term, Tuple};

/// The kinds of syntax violation a line can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseErrorKind {
    UnterminatedIri,
    InvalidIri,
    UnterminatedLiteral,
    InvalidEscape,
    InvalidLanguageTag,
    InvalidBlankNode,
    MissingDot,
    UnexpectedCharacter,
    ArityMismatch,
}

impl ParseErrorKind {
    pub const ALL: [ParseErrorKind; 9] = [
        ParseErrorKind::UnterminatedIri,
        ParseErrorKind::InvalidIri,
        ParseErrorKind::UnterminatedLiteral,
        ParseErrorKind::InvalidEscape,
        ParseErrorKind::InvalidLanguageTag,
        ParseErrorKind::InvalidBlankNode,
        ParseErrorKind::MissingDot,
        ParseErrorKind::UnexpectedCharacter,
        ParseErrorKind::ArityMismatch,
    ];
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ParseErrorKind::UnterminatedIri => "unterminated IRI",
            ParseErrorKind::InvalidIri => "invalid character in IRI",
            ParseErrorKind::UnterminatedLiteral => "unterminated literal",
            ParseErrorKind::InvalidEscape => "invalid escape sequence",
            ParseErrorKind::InvalidLanguageTag => "invalid language tag",
            ParseErrorKind::InvalidBlankNode => "invalid blank node label",
            ParseErrorKind::MissingDot => "missing terminating '.'",
            ParseErrorKind::UnexpectedCharacter => "unexpected character",
            ParseErrorKind::ArityMismatch => "unexpected number of terms",
        };
        f.write_str(text)
    }
}

/// How a violation is handled by a reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Fatal,
    Skippable,
}

/// Names the violation kinds that only skip the offending line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsePolicy {
    pub skippable: BTreeSet<ParseErrorKind>,
}

impl ParsePolicy {
    /// Every violation is fatal.
    pub fn strict() -> Self {
        Self::default()
    }

    /// Every violation skips the line.
    pub fn lenient() -> Self {
        Self {
            skippable: ParseErrorKind::ALL.into_iter().collect(),
        }
    }

    pub fn skipping(kinds: impl IntoIterator<Item = ParseErrorKind>) -> Self {
        Self {
            skippable: kinds.into_iter().collect(),
        }
    }

    pub fn severity(&self, kind: ParseErrorKind) -> Severity {
        if self.skippable.contains(&kind) {
            Severity::Skippable
        } else {
            Severity::Fatal
        }
    }
}

/// Error produced while reading tuples.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("line {line}, column {column}: {kind} in `{text}`")]
    Syntax {
        kind: ParseErrorKind,
        line: u64,
        column: usize,
        text: String,
    },
    #[error("I/O error after line {line}: {source}")]
    Io {
        line: u64,
        #[source]
        source: io::Error,
    },
}

impl ParseError {
    pub fn kind(&self) -> Option<ParseErrorKind> {
        match self {
            ParseError::Syntax { kind, .. } => Some(*kind),
            ParseError::Io { .. } => None,
        }
    }
}

type SkipCallback = Box<dyn FnMut(&ParseError) + Send>;

/// Lazy, non-restartable reader of [`Tuple`]s.
pub struct TupleReader<R> {
    reader: R,
    buffer: String,
    line_number: u64,
    policy: ParsePolicy,
    arity: Option<RangeInclusive<usize>>,
    on_skip: Option<SkipCallback>,
    skipped: u64,
    finished: bool,
}

impl TupleReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: BufRead> TupleReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: String::new(),
            line_number: 0,
            policy: ParsePolicy::strict(),
            arity: None,
            on_skip: None,
            skipped: 0,
            finished: false,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: ParsePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Rejects tuples whose length falls outside `arity`.
    #[must_use]
    pub fn with_arity(mut self, arity: RangeInclusive<usize>) -> Self {
        self.arity = Some(arity);
        self
    }

    /// Called for every skipped line instead of the default warning.
    #[must_use]
    pub fn on_skip(mut self, callback: impl FnMut(&ParseError) + Send + 'static) -> Self {
        self.on_skip = Some(Box::new(callback));
        self
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn line_number(&self) -> u64 {
        self.line_number
    }

    fn syntax_error(&self, kind: ParseErrorKind, line: &str, position: usize) -> ParseError {
        ParseError::Syntax {
            kind,
            line: self.line_number,
            column: line[..position].chars().count() + 1,
            text: line.to_string(),
        }
    }

    fn check_arity(&self, terms: &[Term], line: &str) -> Result<(), ParseError> {
        match &self.arity {
            Some(arity) if !arity.contains(&terms.len()) => {
                Err(self.syntax_error(ParseErrorKind::ArityMismatch, line, 0))
            }
            _ => Ok(()),
        }
    }
}

impl<R: BufRead> Iterator for TupleReader<R> {
    type Item = Result<Tuple, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished {
                return None;
            }
            self.buffer.clear();
            match self.reader.read_line(&mut self.buffer) {
                Ok(0) => {
                    self.finished = true;
                    return None;
                }
                Ok(_) => self.line_number += 1,
                Err(source) => {
                    self.finished = true;
                    return Some(Err(ParseError::Io {
                        line: self.line_number,
                        source,
                    }));
                }
            }

            let line = self.buffer.trim_end_matches(['\n', '\r']);
            let content = line.trim_start();
            if content.is_empty() || content.starts_with('#') {
                continue;
            }

            let parsed = parse_line(line)
                .map_err(|(kind, position)| self.syntax_error(kind, line, position))
                .and_then(|terms| self.check_arity(&terms, line).map(|()| terms));

            match parsed {
                Ok(terms) => return Some(Ok(Tuple::new(terms))),
                Err(error) => {
                    let kind = error.kind().unwrap_or(ParseErrorKind::UnexpectedCharacter);
                    if self.policy.severity(kind) == Severity::Skippable {
                        self.skipped += 1;
                        match self.on_skip.as_mut() {
                            Some(callback) => callback(&error),
                            None => tracing::warn!(%error, "skipping malformed line"),
                        }
                        continue;
                    }
                    self.finished = true;
                    return Some(Err(error));
                }
            }
        }
    }
}

type SyntaxResult<T> = Result<T, (ParseErrorKind, usize)>;

struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(' ' | '\t')) {
            self.pos += 1;
        }
    }
}

/// Parses the terms of one line; errors carry the byte offset of the violation.
fn parse_line(line: &str) -> SyntaxResult<Vec<Term>> {
    let mut cursor = Cursor::new(line);
    let mut terms = Vec::new();
    loop {
        cursor.skip_whitespace();
        match cursor.peek() {
            None => return Err((ParseErrorKind::MissingDot, cursor.pos)),
            Some('.') => {
                cursor.bump();
                cursor.skip_whitespace();
                return match cursor.peek() {
                    None | Some('#') => Ok(terms),
                    Some(_) => Err((ParseErrorKind::UnexpectedCharacter, cursor.pos)),
                };
            }
            Some(_) => terms.push(parse_term_at(&mut cursor)?),
        }
    }
}

/// Parses a single term, e.g. the `Display` output of another RDF library.
pub fn parse_term(text: &str) -> Result<Term, ParseErrorKind> {
    let mut cursor = Cursor::new(text.trim());
    let term = parse_term_at(&mut cursor).map_err(|(kind, _)| kind)?;
    if cursor.rest().is_empty() {
        Ok(term)
    } else {
        Err(ParseErrorKind::UnexpectedCharacter)
    }
}

fn parse_term_at(cursor: &mut Cursor<'_>) -> SyntaxResult<Term> {
    match cursor.peek() {
        Some('<') => parse_iri(cursor).map(Term::Uri),
        Some('_') => parse_blank_node(cursor),
        Some('"') => parse_literal(cursor),
        _ => Err((ParseErrorKind::UnexpectedCharacter, cursor.pos)),
    }
}

fn parse_iri(cursor: &mut Cursor<'_>) -> SyntaxResult<String> {
    let start = cursor.pos;
    cursor.bump();
    let mut iri = String::new();
    loop {
        let position = cursor.pos;
        match cursor.bump() {
            None => return Err((ParseErrorKind::UnterminatedIri, start)),
            Some('>') => return Ok(iri),
            Some('\\') => match cursor.bump() {
                Some(marker @ ('u' | 'U')) => {
                    iri.push(parse_unicode_escape(cursor, marker, position)?);
                }
                _ => return Err((ParseErrorKind::InvalidEscape, position)),
            },
            Some(c) if c <= ' ' || matches!(c, '<' | '"' | '{' | '}' | '|' | '^' | '`') => {
                return Err((ParseErrorKind::InvalidIri, position));
            }
            Some(c) => iri.push(c),
        }
    }
}

fn parse_blank_node(cursor: &mut Cursor<'_>) -> SyntaxResult<Term> {
    let start = cursor.pos;
    if !cursor.rest().starts_with("_:") {
        return Err((ParseErrorKind::InvalidBlankNode, start));
    }
    cursor.pos += 2;
    let label_start = cursor.pos;
    if !matches!(cursor.peek(), Some(c) if is_label_start(c)) {
        return Err((ParseErrorKind::InvalidBlankNode, start));
    }
    while matches!(cursor.peek(), Some(c) if is_label_char(c)) {
        cursor.bump();
    }
    // A '.' closing the line terminates the tuple; anywhere else it belongs to the label.
    let label_end = cursor.pos;
    if cursor.text[label_start..label_end].ends_with('.') {
        cursor.skip_whitespace();
        if matches!(cursor.peek(), None | Some('#')) {
            cursor.pos = label_end - 1;
        } else {
            cursor.pos = label_end;
        }
    }
    if cursor.pos == label_start {
        return Err((ParseErrorKind::InvalidBlankNode, start));
    }
    let label = cursor.text[label_start..cursor.pos].to_string();
    Ok(Term::BlankNode(label))
}

/// `PN_CHARS_U` or a digit.
fn is_label_start(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, '_' | ':') || is_pn_chars_base(c)
}

fn is_label_char(c: char) -> bool {
    is_label_start(c)
        || matches!(c, '-' | '.' | '\u{b7}' | '\u{300}'..='\u{36f}' | '\u{203f}'..='\u{2040}')
}

fn is_pn_chars_base(c: char) -> bool {
    matches!(
        c,
        'A'..='Z'
            | 'a'..='z'
            | '\u{c0}'..='\u{d6}'
            | '\u{d8}'..='\u{f6}'
            | '\u{f8}'..='\u{2ff}'
            | '\u{370}'..='\u{37d}'
            | '\u{37f}'..='\u{1fff}'
            | '\u{200c}'..='\u{200d}'
            | '\u{2070}'..='\u{218f}'
            | '\u{2c00}'..='\u{2fef}'
            | '\u{3001}'..='\u{d7ff}'
            | '\u{f900}'..='\u{fdcf}'
            | '\u{fdf0}'..='\u{fffd}'
            | '\u{10000}'..='\u{effff}'
    )
}

fn parse_literal(cursor: &mut Cursor<'_>) -> SyntaxResult<Term> {
    let start = cursor.pos;
    cursor.bump();
    let mut lexical = String::new();
    loop {
        let position = cursor.pos;
        match cursor.bump() {
            None => return Err((ParseErrorKind::UnterminatedLiteral, start)),
            Some('"') => break,
            Some('\\') => {
                let unescaped = match cursor.bump() {
                    Some('t') => '\t',
                    Some('b') => '\u{8}',
                    Some('n') => '\n',
                    Some('r') => '\r',
                    Some('f') => '\u{c}',
                    Some('"') => '"',
                    Some('\'') => '\'',
                    Some('\\') => '\\',
                    Some(marker @ ('u' | 'U')) => parse_unicode_escape(cursor, marker, position)?,
                    _ => return Err((ParseErrorKind::InvalidEscape, position)),
                };
                lexical.push(unescaped);
            }
            Some(c) => lexical.push(c),
        }
    }

    if cursor.peek() == Some('@') {
        cursor.bump();
        let tag_start = cursor.pos;
        while matches!(cursor.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '-') {
            cursor.bump();
        }
        let tag = &cursor.text[tag_start..cursor.pos];
        if !language_tag_pattern().is_match(tag) {
            return Err((ParseErrorKind::InvalidLanguageTag, tag_start));
        }
        return Ok(Term::Literal(Literal::lang(lexical, tag)));
    }

    if cursor.rest().starts_with("^^") {
        cursor.pos += 2;
        if cursor.peek() != Some('<') {
            return Err((ParseErrorKind::UnexpectedCharacter, cursor.pos));
        }
        let datatype = parse_iri(cursor)?;
        return Ok(Term::Literal(Literal::typed(lexical, datatype)));
    }

    Ok(Term::Literal(Literal::simple(lexical)))
}

fn parse_unicode_escape(
    cursor: &mut Cursor<'_>,
    marker: char,
    position: usize,
) -> SyntaxResult<char> {
    let digits = if marker == 'u' { 4 } else { 8 };
    let invalid = (ParseErrorKind::InvalidEscape, position);
    let hex = cursor
        .rest()
        .get(..digits)
        .filter(|hex| hex.chars().all(|c| c.is_ascii_hexdigit()))
        .ok_or(invalid)?;
    let code = u32::from_str_radix(hex, 16).map_err(|_| invalid)?;
    let c = char::from_u32(code).ok_or(invalid)?;
    cursor.pos += digits;
    Ok(c)
}

fn language_tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-zA-Z]+(-[a-zA-Z0-9]+)*$").expect("language tag pattern is valid")
    })
}
