use crate::error::{Error, Result};
use log::warn;

/// Literal that follows the `#` of a marker comment.
pub const MARKER_KEYWORD: &str = "gitops-replacer:";

/// One line of a file: its text and the terminator that ended it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line<'a> {
    pub text: &'a str,
    pub ending: &'a str,
}

/// A file split into line records.
///
/// Concatenating every `text` + `ending` gives back the original content, so
/// an edit touches exactly one record and nothing else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document<'a> {
    lines: Vec<Line<'a>>,
}

impl<'a> Document<'a> {
    pub fn parse(content: &'a str) -> Self {
        let lines = content
            .split_inclusive('\n')
            .map(|raw| {
                let ending_len = if raw.ends_with("\r\n") {
                    2
                } else if raw.ends_with('\n') {
                    1
                } else {
                    0
                };
                let (text, ending) = raw.split_at(raw.len() - ending_len);
                Line { text, ending }
            })
            .collect();

        Self { lines }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn line(&self, index: usize) -> Option<&Line<'a>> {
        self.lines.get(index)
    }

    /// Reassembles the document with the text of line `index` swapped out.
    pub fn render_with(&self, index: usize, text: &str) -> String {
        let mut out = String::new();
        for (i, line) in self.lines.iter().enumerate() {
            out.push_str(if i == index { text } else { line.text });
            out.push_str(line.ending);
        }
        out
    }
}

/// Returns the name carried by a marker comment, if `line` is one.
pub fn marker_name(line: &str) -> Option<&str> {
    line.trim()
        .strip_prefix('#')?
        .trim_start()
        .strip_prefix(MARKER_KEYWORD)?
        .split_whitespace()
        .next()
}

/// Finds the first marker for `dep_name` and returns the index of the line
/// after it.
pub fn locate_marker(document: &Document, dep_name: &str) -> Result<usize> {
    let mut matches = document
        .lines
        .iter()
        .enumerate()
        .filter(|(_, line)| marker_name(line.text) == Some(dep_name))
        .map(|(index, _)| index);

    let marker = matches.next().ok_or_else(|| Error::MarkerNotFound {
        dep_name: dep_name.to_string(),
    })?;

    let ignored = matches.count();
    if ignored > 0 {
        warn!(
            "found {} additional marker(s) for '{}', only the first one (line {}) is used",
            ignored,
            dep_name,
            marker + 1
        );
    }

    if marker + 1 >= document.len() {
        return Err(Error::MarkerAtEof {
            dep_name: dep_name.to_string(),
            line: marker + 1,
        });
    }

    Ok(marker + 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteStyle {
    None,
    Double,
    Single,
}

impl QuoteStyle {
    fn as_str(self) -> &'static str {
        match self {
            QuoteStyle::None => "",
            QuoteStyle::Double => "\"",
            QuoteStyle::Single => "'",
        }
    }
}

/// A `key: value` line cut into the parts that must survive a substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueLine<'a> {
    /// Indentation, optional list dash, key, separator and following spaces.
    pub prefix: &'a str,
    pub quote: QuoteStyle,
    pub value: &'a str,
    /// Everything after the value (and closing quote), verbatim.
    pub suffix: &'a str,
}

impl<'a> ValueLine<'a> {
    /// `line_number` is one-based and only used for error reporting.
    pub fn parse(text: &'a str, line_number: usize) -> Result<Self> {
        let unparsable = || Error::UnparsableLine {
            line: line_number,
            text: text.to_string(),
        };

        let trimmed = text.trim_start();
        let mut key_start = text.len() - trimmed.len();
        if let Some(after_dash) = trimmed.strip_prefix('-') {
            if after_dash.starts_with(char::is_whitespace) {
                key_start = text.len() - after_dash.trim_start().len();
            }
        }

        let body = &text[key_start..];
        let quoted_key = body.starts_with(['"', '\'']);
        if body.starts_with('#') {
            return Err(unparsable());
        }

        let separator = find_separator(body).ok_or_else(unparsable)?;
        if body[..separator].trim().is_empty() {
            return Err(unparsable());
        }

        let after_separator = &body[separator + 1..];
        let spacing = after_separator.len() - after_separator.trim_start().len();
        let prefix_end = key_start + separator + 1 + spacing;
        let (prefix, rest) = text.split_at(prefix_end);

        let (quote, value, suffix) = match rest.chars().next() {
            Some(q @ ('"' | '\'')) => {
                let inner = &rest[1..];
                let close = inner.find(q).ok_or_else(unparsable)?;
                let quote = if q == '"' {
                    QuoteStyle::Double
                } else {
                    QuoteStyle::Single
                };
                (quote, &inner[..close], &inner[close + 1..])
            }
            _ => {
                let end = find_comment_start(rest).unwrap_or(rest.len());
                let mut value = rest[..end].trim_end();
                // JSON style: `"replicas": 3,` keeps its comma
                if quoted_key {
                    value = value.strip_suffix(',').map_or(value, str::trim_end);
                }
                (QuoteStyle::None, value, &rest[value.len()..])
            }
        };

        Ok(Self {
            prefix,
            quote,
            value,
            suffix,
        })
    }

    pub fn with_value(&self, new_value: &str) -> String {
        let padding = if self.quote == QuoteStyle::None
            && self.value.is_empty()
            && !self.prefix.ends_with(char::is_whitespace)
        {
            " "
        } else {
            ""
        };

        format!(
            "{}{}{q}{}{q}{}",
            self.prefix,
            padding,
            new_value,
            self.suffix,
            q = self.quote.as_str()
        )
    }
}

/// Byte offset of the key/value `:`; a quoted key is skipped as a whole.
fn find_separator(body: &str) -> Option<usize> {
    let search_from = match body.chars().next() {
        Some(q @ ('"' | '\'')) => body[1..].find(q)? + 2,
        _ => 0,
    };
    body[search_from..].find(':').map(|i| i + search_from)
}

/// A `#` opens a comment at the start of the value or after whitespace.
fn find_comment_start(rest: &str) -> Option<usize> {
    let mut previous_is_space = true;
    for (index, c) in rest.char_indices() {
        if c == '#' && previous_is_space {
            return Some(index);
        }
        previous_is_space = c.is_whitespace();
    }
    None
}

/// Outcome of replacing the value below one marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub dep_name: String,
    /// One-based number of the value line.
    pub line_number: usize,
    pub old_line: String,
    pub new_line: String,
    pub old_value: String,
    /// The whole file after the replacement.
    pub content: String,
    pub changed: bool,
}

/// Checks that `content` has a usable marker for `dep_name` without
/// computing a replacement.
pub fn check_marked_value(content: &str, dep_name: &str) -> Result<String> {
    let document = Document::parse(content);
    let index = locate_marker(&document, dep_name)?;
    let line = document.line(index).map(|l| l.text).unwrap_or_default();
    Ok(ValueLine::parse(line, index + 1)?.value.to_string())
}

pub fn replace_marked_value(content: &str, dep_name: &str, new_value: &str) -> Result<Replacement> {
    let document = Document::parse(content);
    let index = locate_marker(&document, dep_name)?;
    let old_line = document.line(index).map(|l| l.text).unwrap_or_default();
    let value_line = ValueLine::parse(old_line, index + 1)?;

    let changed = value_line.value != new_value;
    let (new_line, content) = if changed {
        let new_line = value_line.with_value(new_value);
        let content = document.render_with(index, &new_line);
        (new_line, content)
    } else {
        (old_line.to_string(), content.to_string())
    };

    Ok(Replacement {
        dep_name: dep_name.to_string(),
        line_number: index + 1,
        old_line: old_line.to_string(),
        new_line,
        old_value: value_line.value.to_string(),
        content,
        changed,
    })
}
