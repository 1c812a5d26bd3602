// Virtual sensor template codec - named placeholders <-> positional placeholders
use crate::domain::errors::AlgorithmError;
use regex::{Captures, Regex};
use std::sync::LazyLock;

static NAMED_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^{}]+)\}").expect("valid placeholder pattern"));

static POSITIONAL_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\d+)\}").expect("valid positional pattern"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedTemplate {
    pub positional_template: String,
    pub sensors_in: Vec<String>,
}

/// `"{a} + ({b} - {a})"` becomes `"{0} + ({1} - {0})"` with `sensors_in = [a, b]`.
/// Positions follow first occurrence; repeated names reuse their position.
/// Empty braces are not placeholders and stay in the template as written.
pub fn extract(named_template: &str) -> Result<ExtractedTemplate, AlgorithmError> {
    let mut sensors_in: Vec<String> = Vec::new();
    for caps in NAMED_PLACEHOLDER.captures_iter(named_template) {
        let name = &caps[1];
        if !sensors_in.iter().any(|s| s == name) {
            sensors_in.push(name.to_string());
        }
    }

    if sensors_in.is_empty() {
        return Err(AlgorithmError::NoPlaceholders);
    }

    let positional_template = NAMED_PLACEHOLDER
        .replace_all(named_template, |caps: &Captures| {
            let position = sensors_in
                .iter()
                .position(|s| s == &caps[1])
                .unwrap_or_default();
            format!("{{{}}}", position)
        })
        .into_owned();

    Ok(ExtractedTemplate {
        positional_template,
        sensors_in,
    })
}

/// Inverse of [`extract`]. A position with no entry in `sensors_in` is left as is.
pub fn reconstruct(positional_template: &str, sensors_in: &[String]) -> String {
    POSITIONAL_PLACEHOLDER
        .replace_all(positional_template, |caps: &Captures| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|i| sensors_in.get(i))
                .map(|name| format!("{{{}}}", name))
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
