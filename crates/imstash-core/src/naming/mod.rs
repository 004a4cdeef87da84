//! Naming resolver: pattern string + document metadata -> relative path
//!
//! Patterns recognize the placeholders `%author`, `%title` and `%year`; `%%`
//! renders a literal percent sign, every other character passes through
//! untouched. Rendered placeholder values are escaped for the filesystem,
//! literal pattern characters are not, so a `/` in the pattern creates
//! subdirectories.

use crate::domain::DocumentMeta;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use thiserror::Error;

lazy_static! {
    static ref UNSAFE_CHARS: Regex = Regex::new(r#"[\\/:*?"<>|]"#).unwrap();
}

/// Errors in the pattern itself. Metadata content never causes a failure:
/// every placeholder has a fallback rendering.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("pattern is empty")]
    Empty,
    #[error("unknown placeholder %{0}")]
    UnknownPlaceholder(String),
    #[error("pattern resolves to an empty path")]
    ResolvesToRoot,
    #[error("pattern produces the invalid path component {0:?}")]
    InvalidComponent(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Literal(String),
    Author,
    Title,
    Year,
}

/// A parsed naming pattern
#[derive(Clone, Debug)]
pub struct Pattern {
    raw: String,
    tokens: Vec<Token>,
}

impl Pattern {
    /// Parse and validate a pattern string.
    ///
    /// Validation includes a probe resolution, so a pattern that could only
    /// ever produce an empty or invalid path is rejected before any I/O.
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        if raw.trim().is_empty() {
            return Err(PatternError::Empty);
        }

        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut chars = raw.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '%' {
                literal.push(c);
                continue;
            }
            if chars.peek() == Some(&'%') {
                chars.next();
                literal.push('%');
                continue;
            }
            let mut name = String::new();
            while let Some(&next) = chars.peek() {
                if next.is_ascii_alphabetic() {
                    name.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            let token = match name.as_str() {
                "author" => Token::Author,
                "title" => Token::Title,
                "year" => Token::Year,
                _ => return Err(PatternError::UnknownPlaceholder(name)),
            };
            if !literal.is_empty() {
                tokens.push(Token::Literal(std::mem::take(&mut literal)));
            }
            tokens.push(token);
        }
        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }

        let pattern = Self {
            raw: raw.to_string(),
            tokens,
        };
        pattern.resolve(&DocumentMeta::new("probe", "probe"))?;
        Ok(pattern)
    }

    /// The original pattern string
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Resolve the pattern against document metadata.
    ///
    /// Deterministic: identical inputs always yield identical output.
    pub fn resolve(&self, meta: &DocumentMeta) -> Result<PathBuf, PatternError> {
        let mut rendered = String::new();
        for token in &self.tokens {
            match token {
                Token::Literal(text) => rendered.push_str(text),
                Token::Author => {
                    let last_names: Vec<&str> =
                        meta.authors.iter().map(|a| a.last_name.as_str()).collect();
                    rendered.push_str(&sanitize_value(&format_authors(&last_names)));
                }
                Token::Title => {
                    let title = if meta.title.trim().is_empty() {
                        "Untitled"
                    } else {
                        meta.title.as_str()
                    };
                    rendered.push_str(&sanitize_value(title));
                }
                Token::Year => match meta.year {
                    Some(year) => rendered.push_str(&year.to_string()),
                    None => rendered.push_str("n.d."),
                },
            }
        }

        let mut path = PathBuf::new();
        for component in rendered.split('/') {
            let component = component.trim();
            if component.is_empty() || component == "." {
                continue;
            }
            if component == ".." {
                return Err(PatternError::InvalidComponent(component.to_string()));
            }
            // Leading dots would produce hidden entries that clash with the
            // engine's staging names.
            let component = component.trim_start_matches('.').trim_start();
            if component.is_empty() {
                continue;
            }
            path.push(component);
        }
        if path.as_os_str().is_empty() {
            return Err(PatternError::ResolvesToRoot);
        }
        Ok(path)
    }
}

/// Join author last names for the `%author` placeholder: up to three names
/// joined with commas and a final "&", four or more collapse to "et al.",
/// none renders as "Unknown".
pub fn format_authors(last_names: &[&str]) -> String {
    match last_names {
        [] => "Unknown".to_string(),
        [only] => (*only).to_string(),
        [init @ .., last] if last_names.len() <= 3 => {
            format!("{} & {}", init.join(", "), last)
        }
        [first, ..] => format!("{} et al.", first),
    }
}

/// Replace characters that are invalid or reserved on common filesystems.
/// Applied to rendered placeholder values only, never to pattern literals.
fn sanitize_value(value: &str) -> String {
    UNSAFE_CHARS.replace_all(value, "_").into_owned()
}

/// Sanitize a remote-supplied file name into a single safe path component.
pub(crate) fn sanitize_file_name(name: &str) -> String {
    let cleaned = sanitize_value(name);
    let trimmed = cleaned.trim().trim_start_matches('.').trim();
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Compute the path for every document, disambiguating collisions.
///
/// Two distinct documents that resolve to the same path get ` (2)`, ` (3)`, …
/// appended to the final component, assigned in document-id order so that
/// re-runs over the same library produce the same assignment. `reserved`
/// holds paths already owned by documents outside this assignment (retained
/// local copies of remotely-deleted documents); they are never claimed.
pub fn assign_paths<'a>(
    pattern: &Pattern,
    documents: impl IntoIterator<Item = &'a DocumentMeta>,
    reserved: &BTreeSet<PathBuf>,
) -> Result<BTreeMap<String, PathBuf>, PatternError> {
    let mut by_path: BTreeMap<PathBuf, Vec<&str>> = BTreeMap::new();
    for meta in documents {
        let path = pattern.resolve(meta)?;
        by_path.entry(path).or_default().push(meta.id.as_str());
    }

    let mut used: BTreeSet<PathBuf> = reserved.clone();
    let mut assigned = BTreeMap::new();
    for (path, mut ids) in by_path {
        ids.sort_unstable();
        for id in ids {
            let mut candidate = path.clone();
            let mut n = 1;
            while used.contains(&candidate) {
                n += 1;
                candidate = with_suffix(&path, n);
            }
            used.insert(candidate.clone());
            assigned.insert(id.to_string(), candidate);
        }
    }
    Ok(assigned)
}

fn with_suffix(path: &PathBuf, n: u32) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{} ({})", file_name, n))
}
