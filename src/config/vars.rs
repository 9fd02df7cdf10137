//! Environment variable interpolation for config files.
//!
//! Supported forms:
//! - `$VAR` / `${VAR}`: required, missing variables are reported
//! - `${VAR:-fallback}`: fallback when unset or empty
//! - `${VAR-fallback}`: fallback only when unset
//! - `$$`: a literal `$`

use regex::{Captures, Regex};
use std::env;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        (?P<escape>\$\$)
        |
        \$\{(?P<braced>[A-Za-z_][A-Za-z0-9_]*)(?:(?P<op>:?-)(?P<fallback>[^}]*))?\}
        |
        \$(?P<bare>[A-Za-z_][A-Za-z0-9_]*)
        ",
    )
    .expect("placeholder regex is valid")
});

/// Outcome of interpolating a document.
#[derive(Debug)]
pub struct InterpolationResult {
    pub text: String,
    /// Every problem found, so a user can fix all missing variables at once.
    pub errors: Vec<String>,
}

impl InterpolationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Replace placeholders in `input` with values from the process environment.
pub fn interpolate(input: &str) -> InterpolationResult {
    let mut errors = Vec::new();
    let text = PLACEHOLDER
        .replace_all(input, |caps: &Captures| resolve(caps, &mut errors))
        .into_owned();
    InterpolationResult { text, errors }
}

fn resolve(caps: &Captures, errors: &mut Vec<String>) -> String {
    if caps.name("escape").is_some() {
        return "$".to_string();
    }

    let original = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
    let Some(name) = caps.name("braced").or_else(|| caps.name("bare")) else {
        return original.to_string();
    };
    let name = name.as_str();
    let op = caps.name("op").map(|m| m.as_str());
    let fallback = caps.name("fallback").map(|m| m.as_str());

    match env::var(name) {
        Ok(value) if value.contains(['\n', '\r']) => {
            errors.push(format!(
                "environment variable '{name}' contains newlines, which is not allowed"
            ));
            original.to_string()
        }
        Ok(value) if value.is_empty() && op == Some(":-") => {
            fallback.unwrap_or_default().to_string()
        }
        Ok(value) => value,
        Err(_) => match fallback {
            Some(fallback) => fallback.to_string(),
            None => {
                errors.push(format!("environment variable '{name}' is not set"));
                original.to_string()
            }
        },
    }
}
