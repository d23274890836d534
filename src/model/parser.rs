// src/model/parser.rs

//! Line parser for system model text.
//!
//! Arguments are split the way a POSIX shell would: single quotes are
//! literal, double quotes allow backslash escapes, and an unquoted `#`
//! starts a comment running to the end of the line.

use super::{ModelOp, SearchItem, TroveOpKind};
use crate::error::{Error, Result};
use crate::label::Label;
use crate::trove::TroveSpec;
use std::str::FromStr;

/// Characters that never need quoting
fn is_plain(c: char) -> bool {
    c.is_ascii_alphanumeric() || "_-.:=/@+,~%".contains(c)
}

/// Quote `arg` with single quotes when a shell would split or expand it
pub fn shell_quote(arg: &str) -> String {
    if !arg.is_empty() && arg.chars().all(is_plain) {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Split a line into shell words, dropping any trailing comment
pub fn split_arguments(text: &str) -> std::result::Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => word.push(c),
                        None => return Err("unterminated single quote".to_string()),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\' | '$' | '`')) => word.push(c),
                            Some(c) => {
                                word.push('\\');
                                word.push(c);
                            }
                            None => return Err("unterminated double quote".to_string()),
                        },
                        Some(c) => word.push(c),
                        None => return Err("unterminated double quote".to_string()),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(c) => word.push(c),
                    None => return Err("trailing backslash".to_string()),
                }
            }
            '#' => break,
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                word.push(c);
            }
        }
    }
    if in_word {
        words.push(word);
    }
    Ok(words)
}

fn invalid(index: usize) -> Error {
    Error::ModelParse {
        line: index + 1,
        message: format!("Invalid statement on line {}", index + 1),
    }
}

fn parse_spec(text: &str, index: usize) -> Result<TroveSpec> {
    TroveSpec::parse(text).map_err(|e| Error::ModelParse {
        line: index + 1,
        message: format!("{} on line {}", e, index + 1),
    })
}

/// Parse one line; `index` is the 0-based line number
pub(super) fn parse_line(line: &str, index: usize) -> Result<ModelOp> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(ModelOp::NoOp(trimmed.to_string()));
    }

    let (verb, rest) = trimmed.split_once(char::is_whitespace).unwrap_or((trimmed, ""));
    let kind = match verb {
        "version" | "search" => None,
        verb => Some(TroveOpKind::from_str(verb).map_err(|_| Error::ModelParse {
            line: index + 1,
            message: format!("Unrecognized command \"{}\" on line {}", verb, index + 1),
        })?),
    };

    let args = split_arguments(rest).map_err(|e| Error::ModelParse {
        line: index + 1,
        message: format!("Invalid statement on line {}: {}", index + 1, e),
    })?;
    if args.is_empty() {
        return Err(invalid(index));
    }

    if let Some(kind) = kind {
        let specs = args
            .iter()
            .map(|arg| parse_spec(arg, index))
            .collect::<Result<Vec<_>>>()?;
        return Ok(ModelOp::Trove { kind, specs });
    }
    match (verb, args.as_slice()) {
        ("version", [version]) => Ok(ModelOp::Version(version.clone())),
        ("search", [item]) => {
            let label = if item.contains('=') { None } else { Label::parse(item).ok() };
            Ok(ModelOp::Search(match label {
                Some(label) => SearchItem::Label(label),
                None => SearchItem::Trove(parse_spec(item, index)?),
            }))
        }
        _ => Err(invalid(index)),
    }
}
