//! BibTeX parser implementation using nom.
//!
//! Handles the subset of BibTeX found in thesis bibliographies:
//! - All entry types, delimited by braces or parentheses
//! - `@string`, `@preamble` and `@comment` blocks
//! - Braced, quoted, numeric and macro field values
//! - String concatenation with `#`
//! - Nested braces in field values
//!
//! The parser is strict: the first malformed `@` block aborts the parse with
//! its line number. Text between blocks is ignored, as BibTeX does.

use std::collections::HashMap;

use nom::{
    branch::alt,
    bytes::complete::take_while1,
    character::complete::{char, multispace0},
    combinator::{map, opt},
    IResult,
};
use thiserror::Error;

/// Error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("line {line}: malformed block '{snippet}'")]
    Syntax { line: usize, snippet: String },
}

/// A single bibliography entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Entry type, lowercased (e.g., "article")
    pub entry_type: String,
    /// Citation key
    pub key: String,
    /// Fields in source order, names lowercased, macros expanded
    pub fields: Vec<(String, String)>,
    /// The entry exactly as it appeared in the source
    pub raw: String,
}

impl Entry {
    /// Returns the value of a field by (case-insensitive) name.
    pub fn field(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.fields
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Result of parsing a BibTeX file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bibliography {
    pub entries: Vec<Entry>,
    pub preambles: Vec<String>,
    /// `@string` macros, names lowercased
    pub strings: HashMap<String, String>,
}

impl Bibliography {
    /// Entry keys in source order, duplicates included.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.key.as_str())
    }
}

/// Parses a complete BibTeX source.
pub fn parse_bibliography(input: &str) -> Result<Bibliography, ParseError> {
    let mut bib = Bibliography::default();
    let mut remaining = input;

    while let Some(pos) = remaining.find('@') {
        remaining = &remaining[pos..];

        match parse_block(remaining, &bib.strings) {
            Ok((rest, block)) => {
                match block {
                    Block::Entry(mut entry) => {
                        entry.raw = remaining[..remaining.len() - rest.len()].to_string();
                        bib.entries.push(entry);
                    }
                    Block::String(name, value) => {
                        bib.strings.insert(name, value);
                    }
                    Block::Preamble(text) => bib.preambles.push(text),
                    Block::Comment => {}
                }
                remaining = rest;
            }
            Err(_) => {
                let offset = input.len() - remaining.len();
                return Err(ParseError::Syntax {
                    line: input[..offset].matches('\n').count() + 1,
                    snippet: snippet(remaining),
                });
            }
        }
    }

    Ok(bib)
}

/// First line of a failing block, shortened for error messages.
fn snippet(input: &str) -> String {
    input
        .lines()
        .next()
        .unwrap_or_default()
        .chars()
        .take(40)
        .collect()
}

enum Block {
    Entry(Entry),
    String(String, String),
    Preamble(String),
    Comment,
}

fn parse_block<'a>(input: &'a str, strings: &HashMap<String, String>) -> IResult<&'a str, Block> {
    let (rest, _) = char('@')(input)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, block_type) = take_while1(|c: char| c.is_ascii_alphanumeric())(rest)?;
    let block_type = block_type.to_lowercase();

    match block_type.as_str() {
        "comment" => {
            let (rest, _) = parse_comment_body(rest)?;
            Ok((rest, Block::Comment))
        }
        "string" => {
            let (rest, (name, value)) = parse_string_definition(rest, strings)?;
            Ok((rest, Block::String(name, value)))
        }
        "preamble" => {
            let (rest, text) = parse_preamble(rest, strings)?;
            Ok((rest, Block::Preamble(text)))
        }
        _ => {
            let (rest, entry) = parse_entry_body(rest, block_type, strings)?;
            Ok((rest, Block::Entry(entry)))
        }
    }
}

/// Opening delimiter of a block; returns the matching closing one.
fn open_delimiter(input: &str) -> IResult<&str, char> {
    let (rest, _) = multispace0(input)?;
    alt((map(char('{'), |_| '}'), map(char('('), |_| ')')))(rest)
}

fn close_delimiter(input: &str, close: char) -> IResult<&str, char> {
    let (rest, _) = multispace0(input)?;
    char(close)(rest)
}

/// A `@comment` is either a braced group or runs to the end of the line.
fn parse_comment_body(input: &str) -> IResult<&str, ()> {
    let (rest, _) = multispace0(input)?;
    if rest.starts_with('{') {
        let (rest, _) = parse_braced_content(rest)?;
        Ok((rest, ()))
    } else {
        let pos = rest.find('\n').unwrap_or(rest.len());
        Ok((&rest[pos..], ()))
    }
}

fn parse_string_definition<'a>(
    input: &'a str,
    strings: &HashMap<String, String>,
) -> IResult<&'a str, (String, String)> {
    let (rest, close) = open_delimiter(input)?;
    let (rest, (name, value)) = parse_single_field(rest, strings)?;
    let (rest, _) = close_delimiter(rest, close)?;
    Ok((rest, (name, value)))
}

fn parse_preamble<'a>(
    input: &'a str,
    strings: &HashMap<String, String>,
) -> IResult<&'a str, String> {
    let (rest, close) = open_delimiter(input)?;
    let (rest, value) = parse_field_value(rest, strings)?;
    let (rest, _) = close_delimiter(rest, close)?;
    Ok((rest, value))
}

fn is_key_char(c: char) -> bool {
    !c.is_whitespace() && !",{}()\"#%=".contains(c)
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "_-:.+/".contains(c)
}

fn parse_entry_body<'a>(
    input: &'a str,
    entry_type: String,
    strings: &HashMap<String, String>,
) -> IResult<&'a str, Entry> {
    let (rest, close) = open_delimiter(input)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, key) = take_while1(is_key_char)(rest)?;
    let (rest, _) = multispace0(rest)?;

    // `@misc{key}` has no fields and no comma.
    let (rest, comma) = opt(char(','))(rest)?;
    let (rest, fields) = if comma.is_some() {
        parse_fields(rest, strings)?
    } else {
        (rest, Vec::new())
    };

    let (rest, _) = close_delimiter(rest, close)?;

    Ok((
        rest,
        Entry {
            entry_type,
            key: key.to_string(),
            fields,
            raw: String::new(),
        },
    ))
}

/// Parses `name = value` pairs separated by commas, allowing a trailing comma.
fn parse_fields<'a>(
    input: &'a str,
    strings: &HashMap<String, String>,
) -> IResult<&'a str, Vec<(String, String)>> {
    let mut fields = Vec::new();
    let mut remaining = input;

    loop {
        let (rest, _) = multispace0(remaining)?;
        if rest.starts_with('}') || rest.starts_with(')') {
            return Ok((rest, fields));
        }

        let (rest, field) = parse_single_field(rest, strings)?;
        fields.push(field);

        let (rest, _) = multispace0(rest)?;
        match rest.strip_prefix(',') {
            Some(after) => remaining = after,
            None => return Ok((rest, fields)),
        }
    }
}

fn parse_single_field<'a>(
    input: &'a str,
    strings: &HashMap<String, String>,
) -> IResult<&'a str, (String, String)> {
    let (rest, _) = multispace0(input)?;
    let (rest, name) = take_while1(is_name_char)(rest)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, _) = char('=')(rest)?;
    let (rest, value) = parse_field_value(rest, strings)?;
    Ok((rest, (name.to_lowercase(), value)))
}

/// Parses a value: braced, quoted, or a bare number/macro name, joined by `#`.
/// Undefined macros (e.g. `jan`) are kept verbatim.
fn parse_field_value<'a>(
    input: &'a str,
    strings: &HashMap<String, String>,
) -> IResult<&'a str, String> {
    let mut result = String::new();
    let mut remaining = input;

    loop {
        let (rest, _) = multispace0(remaining)?;
        let (rest, part) = alt((
            parse_braced_value,
            parse_quoted_value,
            map(take_while1(is_name_char), |name: &str| {
                strings
                    .get(&name.to_lowercase())
                    .cloned()
                    .unwrap_or_else(|| name.to_string())
            }),
        ))(rest)?;
        result.push_str(&part);

        let (rest, _) = multispace0(rest)?;
        match rest.strip_prefix('#') {
            Some(after) => remaining = after,
            None => return Ok((rest, result)),
        }
    }
}

fn parse_braced_value(input: &str) -> IResult<&str, String> {
    let (rest, content) = parse_braced_content(input)?;
    Ok((rest, content[1..content.len() - 1].to_string()))
}

/// Matches a `{...}` group including nested braces. Returns the group with
/// its outer braces.
fn parse_braced_content(input: &str) -> IResult<&str, &str> {
    if !input.starts_with('{') {
        return Err(char_error(input));
    }

    let bytes = input.as_bytes();
    let mut depth = 0usize;
    let mut pos = 0;

    while pos < bytes.len() {
        match bytes[pos] {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&input[pos + 1..], &input[..pos + 1]));
                }
            }
            b'\\' => pos += 1,
            _ => {}
        }
        pos += 1;
    }

    Err(char_error(input))
}

/// Matches a `"..."` value. Quotes inside braces do not terminate it.
fn parse_quoted_value(input: &str) -> IResult<&str, String> {
    if !input.starts_with('"') {
        return Err(char_error(input));
    }

    let bytes = input.as_bytes();
    let mut depth = 0usize;
    let mut pos = 1;

    while pos < bytes.len() {
        match bytes[pos] {
            b'"' if depth == 0 => return Ok((&input[pos + 1..], input[1..pos].to_string())),
            b'{' => depth += 1,
            b'}' => depth = depth.saturating_sub(1),
            b'\\' => pos += 1,
            _ => {}
        }
        pos += 1;
    }

    Err(char_error(input))
}

fn char_error(input: &str) -> nom::Err<nom::error::Error<&str>> {
    nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Char))
}
