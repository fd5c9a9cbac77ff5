use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::model::Property;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([^}]+)\}").expect("placeholder pattern is valid")
});

/// Replaces every `${name}` with the value of `name`.
///
/// Numeric values are inserted verbatim, anything else is wrapped in double quotes so the
/// result is a valid expression literal. Unknown names are left untouched.
pub fn substitute(content: &str, params: &HashMap<String, Property>) -> String {
    PLACEHOLDER
        .replace_all(content, |caps: &regex::Captures| {
            let name = caps[1].trim();
            match params.get(name) {
                Some(property) => literal(&property.value),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Replaces every `${name}` with the raw value of `name`. Used for script bodies.
pub fn substitute_raw(content: &str, params: &HashMap<String, Property>) -> String {
    PLACEHOLDER
        .replace_all(content, |caps: &regex::Captures| {
            match params.get(caps[1].trim()) {
                Some(property) => property.value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Names referenced by `${...}` in `content`, in order of appearance.
pub fn referenced_names(content: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(content)
        .map(|c| c[1].trim().to_string())
        .collect()
}

fn literal(value: &str) -> String {
    if is_numeric(value) {
        value.trim().to_string()
    } else {
        format!("\"{}\"", value.replace('"', "\\\""))
    }
}

fn is_numeric(value: &str) -> bool {
    let v = value.trim();
    !v.is_empty() && v.parse::<f64>().is_ok_and(|f| f.is_finite())
}
