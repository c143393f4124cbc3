//! Child environment assembly.
//!
//! Repository location and credentials come from a shell-like file of
//! `export NAME=value` lines. Only restic and AWS credential variables are
//! picked up; everything else in the file is ignored.

use crate::restic::compile_regex;
use regex::Regex;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

static FULL_LINE_COMMENT: LazyLock<Option<Regex>> = LazyLock::new(|| compile_regex(r"^\s*#.*"));
static TRAILING_COMMENT: LazyLock<Option<Regex>> = LazyLock::new(|| compile_regex(r"\s+#.*"));
static EXPORT_LINE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile_regex(r"^\s*export\s+(RESTIC_[^\s=]+|AWS_ACCESS_KEY_ID|AWS_SECRET_ACCESS_KEY)=(.*)$")
});

/// Variables a repository cannot be reached without (one of them suffices).
const REPOSITORY_VARS: [&str; 2] = ["RESTIC_REPOSITORY", "RESTIC_REPOSITORY_FILE"];

fn strip<'a>(regex: &Option<Regex>, line: &'a str) -> Cow<'a, str> {
    match regex {
        Some(regex) => regex.replace(line, ""),
        None => Cow::Borrowed(line),
    }
}

/// Parse `export NAME=value` declarations for allow-listed names.
///
/// Comments are stripped first. A value wrapped in matching single or double
/// quotes is unquoted. Later declarations override earlier ones.
#[must_use]
pub fn parse_declarations(content: &str) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    for line in content.lines() {
        let line = strip(&FULL_LINE_COMMENT, line);
        let line = strip(&TRAILING_COMMENT, &line);
        if let Some(caps) = EXPORT_LINE.as_ref().and_then(|regex| regex.captures(&line)) {
            let name = caps[1].to_owned();
            let value = unquote(caps[2].trim_end()).to_owned();
            vars.insert(name, value);
        }
    }
    vars
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Read and parse the declaration file.
///
/// A missing or unreadable file is not fatal: the child simply inherits the
/// current environment.
#[must_use]
pub fn load_declarations(path: &Path) -> BTreeMap<String, String> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_declarations(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(
                "env file {} not found, using inherited environment",
                path.display()
            );
            BTreeMap::new()
        }
        Err(e) => {
            tracing::warn!("cannot read env file {}: {e}", path.display());
            BTreeMap::new()
        }
    }
}

/// Merge inherited variables with declared ones.
///
/// Declared values win. `LC_ALL=C` is always forced so that diagnostics are
/// printed in English and can be classified.
#[must_use]
pub fn merge_environment<I>(
    inherited: I,
    declared: &BTreeMap<String, String>,
) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut env: BTreeMap<String, String> = inherited.into_iter().collect();
    env.extend(declared.iter().map(|(k, v)| (k.clone(), v.clone())));
    env.insert("LC_ALL".to_owned(), "C".to_owned());

    if !REPOSITORY_VARS.iter().any(|name| env.contains_key(*name)) {
        tracing::warn!("RESTIC_REPOSITORY is not set, restic will likely refuse to run");
    }
    env
}

/// Build the full child environment from the process environment and `path`.
#[must_use]
pub fn child_environment(path: &Path) -> BTreeMap<String, String> {
    let inherited = std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)));
    merge_environment(inherited, &load_declarations(path))
}
