//! Environment variable expansion for config files.
//!
//! Recognised forms:
//! - `$NAME` and `${NAME}` expand to the variable, which must be set
//! - `${NAME:-fallback}` uses the fallback when NAME is unset or empty
//! - `${NAME-fallback}` uses the fallback only when NAME is unset
//! - `$$` is a literal `$`

use regex::{Captures, Regex};
use std::env;
use std::sync::LazyLock;

use crate::error::ConfigError;

static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$
        | \$\{ (?P<braced>[A-Za-z_][A-Za-z0-9_]*) (?: (?P<op>:?-) (?P<fallback>[^}]*) )? \}
        | \$ (?P<bare>[A-Za-z_][A-Za-z0-9_]*)
        ",
    )
    .expect("Invalid regex pattern")
});

/// Expand every variable reference in `input`.
///
/// All problems are collected so a single error lists every missing variable.
pub fn expand_env(input: &str) -> Result<String, ConfigError> {
    let mut problems = Vec::new();

    let expanded = REFERENCE.replace_all(input, |caps: &Captures| {
        let Some(name) = caps.name("braced").or_else(|| caps.name("bare")) else {
            return "$".to_string();
        };
        let name = name.as_str();
        let op = caps.name("op").map(|m| m.as_str());
        let fallback = caps.name("fallback").map(|m| m.as_str()).unwrap_or("");

        match (env::var(name), op) {
            (Ok(value), _) if value.contains(['\n', '\r']) => {
                problems.push(format!("environment variable '{name}' contains newlines"));
                String::new()
            }
            (Ok(value), Some(":-")) if value.is_empty() => fallback.to_string(),
            (Ok(value), _) => value,
            (Err(_), Some(_)) => fallback.to_string(),
            (Err(_), None) => {
                problems.push(format!("environment variable '{name}' is not set"));
                String::new()
            }
        }
    });

    if problems.is_empty() {
        Ok(expanded.into_owned())
    } else {
        Err(ConfigError::EnvInterpolation {
            message: problems.join("\n"),
        })
    }
}
