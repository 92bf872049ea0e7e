//! SF-003: Query template substitution.
//!
//! Templates reference bindings as `{p[name]}`. Every placeholder must have a
//! binding; unused bindings are fine. Text outside placeholders is copied
//! verbatim, so SQL braces need no escaping.

use super::types::Bindings;
use regex::Regex;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{p\[([A-Za-z_][A-Za-z0-9_]*)\]\}").expect("placeholder pattern is valid")
});

/// Substitute all `{p[name]}` placeholders.
pub fn render(template: &str, bindings: &Bindings) -> Result<String, String> {
    let mut result = String::with_capacity(template.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(template) {
        let whole = caps.get(0).ok_or("empty placeholder match")?;
        let key = &caps[1];
        let value = bindings
            .get(key)
            .ok_or_else(|| format!("unknown parameter: {}", key))?;
        result.push_str(&template[last..whole.start()]);
        result.push_str(value);
        last = whole.end();
    }
    result.push_str(&template[last..]);

    Ok(result)
}

/// Placeholder names referenced by a template, in order of first use.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in PLACEHOLDER.captures_iter(template) {
        let name = caps[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}
