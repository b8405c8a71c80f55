//! Minimal Dockerfile reader for `LABEL` metadata.
//!
//! Only what label resolution needs is understood: line continuations,
//! comments, `FROM` stage boundaries, `ENV`/`ARG` definitions and `LABEL`
//! instructions in both the `key=value` and the legacy `key value` form.
//! Variable references (`$VAR`, `${VAR}`, `${VAR:-default}`, `${VAR:+alt}`)
//! are substituted from the current stage's environment; undefined variables
//! expand to the empty string.

use std::collections::BTreeMap;
use std::iter::Peekable;
use std::path::Path;
use std::str::Chars;

use crate::error::{Error, Result};

/// Labels and environment of the final build stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dockerfile {
    labels: BTreeMap<String, String>,
    env: BTreeMap<String, String>,
}

impl Dockerfile {
    /// Reads and parses a Dockerfile.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read.
    pub async fn read(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::io(path, e))?;
        Ok(Self::parse(&content))
    }

    /// Parses Dockerfile content.
    #[must_use]
    pub fn parse(content: &str) -> Self {
        let mut parsed = Self::default();

        for line in logical_lines(content) {
            let (instruction, args) = line
                .split_once(char::is_whitespace)
                .unwrap_or((line.as_str(), ""));
            match instruction.to_ascii_uppercase().as_str() {
                "FROM" => {
                    parsed.labels.clear();
                    parsed.env.clear();
                }
                "ENV" => {
                    for (key, value) in pairs(args, &parsed.env) {
                        parsed.env.insert(key, value);
                    }
                }
                "ARG" => {
                    for word in split_words(args, &parsed.env) {
                        if let Some((key, value)) = word.key_value() {
                            parsed.env.entry(key).or_insert(value);
                        }
                    }
                }
                "LABEL" => {
                    for (key, value) in pairs(args, &parsed.env) {
                        parsed.labels.insert(key, value);
                    }
                }
                _ => {}
            }
        }
        parsed
    }

    /// Returns all labels of the final stage.
    #[must_use]
    pub const fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Returns one label value.
    #[must_use]
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }

    /// Returns the environment of the final stage.
    #[must_use]
    pub const fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }
}

/// Joins continuation lines and drops blank and comment lines.
fn logical_lines(content: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for raw in content.lines() {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some(head) = trimmed.strip_suffix('\\') {
            current.push_str(head);
            current.push(' ');
        } else {
            current.push_str(trimmed);
            lines.push(std::mem::take(&mut current));
        }
    }
    if !current.trim().is_empty() {
        lines.push(current);
    }
    lines
}

/// Key/value pairs of an `ENV` or `LABEL` instruction.
fn pairs(args: &str, env: &BTreeMap<String, String>) -> Vec<(String, String)> {
    let words = split_words(args, env);
    match words.first() {
        None => Vec::new(),
        Some(first) if first.eq.is_none() => {
            let value = words[1..]
                .iter()
                .map(|w| w.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            vec![(first.text.clone(), value)]
        }
        Some(_) => words.into_iter().filter_map(Word::key_value).collect(),
    }
}

#[derive(Debug)]
struct Word {
    text: String,
    eq: Option<usize>,
}

impl Word {
    fn key_value(self) -> Option<(String, String)> {
        let eq = self.eq?;
        let key = self.text[..eq].to_string();
        let value = self.text[eq + 1..].to_string();
        (!key.is_empty()).then_some((key, value))
    }
}

/// Splits arguments into words, honoring quotes and substituting variables.
fn split_words(input: &str, env: &BTreeMap<String, String>) -> Vec<Word> {
    let mut words = Vec::new();
    let mut text = String::new();
    let mut eq = None;
    let mut in_word = false;
    let (mut double, mut single) = (false, false);
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' if !double => {
                single = !single;
                in_word = true;
            }
            '"' if !single => {
                double = !double;
                in_word = true;
            }
            '\\' if !single => {
                if let Some(next) = chars.next() {
                    text.push(next);
                }
                in_word = true;
            }
            '$' if !single => {
                expand(&mut chars, env, &mut text);
                in_word = true;
            }
            '=' if !single && !double && eq.is_none() => {
                eq = Some(text.len());
                text.push('=');
                in_word = true;
            }
            c if c.is_whitespace() && !single && !double => {
                if in_word {
                    words.push(Word {
                        text: std::mem::take(&mut text),
                        eq: eq.take(),
                    });
                    in_word = false;
                }
            }
            c => {
                text.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(Word { text, eq });
    }
    words
}

/// Expands the variable reference following a `$`.
fn expand(chars: &mut Peekable<Chars<'_>>, env: &BTreeMap<String, String>, out: &mut String) {
    match chars.peek().copied() {
        Some('{') => {
            chars.next();
            let mut inner = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                inner.push(c);
            }
            if !closed {
                out.push_str("${");
                out.push_str(&inner);
                return;
            }

            let (name, modifier) = if let Some(idx) = inner.find(":-") {
                (&inner[..idx], Some(('-', &inner[idx + 2..])))
            } else if let Some(idx) = inner.find(":+") {
                (&inner[..idx], Some(('+', &inner[idx + 2..])))
            } else {
                (inner.as_str(), None)
            };
            let value = env.get(name).map(String::as_str);
            let set = value.filter(|v| !v.is_empty());

            match modifier {
                None => out.push_str(value.unwrap_or_default()),
                Some(('-', default)) => out.push_str(set.unwrap_or(default)),
                Some((_, alternate)) => {
                    if set.is_some() {
                        out.push_str(alternate);
                    }
                }
            }
        }
        Some(c) if c.is_ascii_alphanumeric() || c == '_' => {
            let mut name = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    name.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            out.push_str(env.get(&name).map_or("", String::as_str));
        }
        _ => out.push('$'),
    }
}
