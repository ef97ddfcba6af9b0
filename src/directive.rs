//! Line-oriented `key value` directive store.
//!
//! The store's config file is parsed once into an in-memory line vector,
//! mutated through [`ConfigFile::set`] / [`ConfigFile::unset`], and written
//! back in a single serialize pass. Repeated application of the same intent
//! leaves the file byte-identical, so supervised restarts never accumulate
//! drift.
//!
//! A line matches a key when, after any number of leading `#` characters
//! and whitespace, the key token appears followed by whitespace. Scalar
//! keys keep at most one uncommented occurrence after a write; list keys
//! (the snapshot `save` directive) always append.

use crate::error::{CorralError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Keys where repeated directives accumulate instead of replacing.
pub const LIST_KEYS: &[&str] = &["save"];

/// Rendering of an explicitly empty value, distinguishable from an
/// absent key.
pub const EMPTY_VALUE: &str = "\"\"";

/// In-memory model of one config file.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: PathBuf,
    lines: Vec<String>,
}

/// Collapse control characters that would break the line-oriented format.
/// An empty value renders as the explicit empty-quoted token so "set to
/// empty" stays distinguishable from "absent".
pub fn sanitize_value(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| if c == '\n' || c == '\r' || c == '\t' { ' ' } else { c })
        .collect();
    if cleaned.is_empty() {
        EMPTY_VALUE.to_string()
    } else {
        cleaned
    }
}

/// Does `line` match `key`, commented or not?
fn matches_key(line: &str, key: &str) -> bool {
    let body = line.trim_start_matches('#').trim_start();
    match body.strip_prefix(key) {
        Some(rest) => rest.starts_with(|c: char| c.is_whitespace()),
        None => false,
    }
}

/// Value portion of a matching line: the remainder after the key token.
fn value_of(line: &str, key: &str) -> String {
    let body = line.trim_start_matches('#').trim_start();
    body[key.len()..].trim().to_string()
}

impl ConfigFile {
    /// Parse the file at `path`. A missing file is an empty file, not an
    /// error.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let lines = match fs::read_to_string(&path) {
            Ok(content) => content.lines().map(|l| l.to_string()).collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(CorralError::file(&path, e)),
        };
        Ok(Self { path, lines })
    }

    /// Serialize back to disk, one directive per line, trailing newline.
    pub fn save(&self) -> Result<()> {
        let mut content = self.lines.join("\n");
        content.push('\n');
        fs::write(&self.path, content).map_err(|e| CorralError::file(&self.path, e))
    }

    /// Path this file was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current lines, for containment checks.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Value of the last matching line (commented or active), or `None`.
    pub fn get(&self, key: &str) -> Option<String> {
        self.lines
            .iter()
            .rev()
            .find(|l| matches_key(l, key))
            .map(|l| value_of(l, key))
    }

    /// Write `key value`.
    ///
    /// List keys always append. For scalar keys the first matching line
    /// (commented or active) is replaced in place and any later matches
    /// are dropped, so exactly one occurrence remains; with no match the
    /// directive is appended.
    pub fn set(&mut self, key: &str, value: &str) {
        let rendered = format!("{} {}", key, sanitize_value(value));
        if LIST_KEYS.contains(&key) {
            self.lines.push(rendered);
            return;
        }

        let mut replaced = false;
        self.lines.retain_mut(|line| {
            if !matches_key(line, key) {
                return true;
            }
            if replaced {
                return false;
            }
            replaced = true;
            *line = rendered.clone();
            true
        });
        if !replaced {
            self.lines.push(rendered);
        }
    }

    /// Append `key value` unconditionally, bypassing scalar replacement.
    pub fn append(&mut self, key: &str, value: &str) {
        self.lines.push(format!("{} {}", key, sanitize_value(value)));
    }

    /// Remove every line matching `key`, commented or active.
    pub fn unset(&mut self, key: &str) {
        self.lines.retain(|l| !matches_key(l, key));
    }

    /// Whether any active line begins with the given token sequence.
    /// Used for per-argument idempotence (e.g. one rename directive per
    /// disabled command).
    pub fn has_tokens(&self, tokens: &[&str]) -> bool {
        self.lines.iter().any(|line| {
            !line.trim_start().starts_with('#')
                && line
                    .split_whitespace()
                    .take(tokens.len())
                    .eq(tokens.iter().copied())
        })
    }
}
