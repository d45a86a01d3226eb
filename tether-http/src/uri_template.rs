//! URI template expansion.
//!
//! Expansion is pluggable through [`UriTemplateExpander`]. The bundled
//! [`SimpleExpander`] handles simple string expansion (`{var}` and
//! `{var1,var2}`); expressions with operators are expanded the same way and
//! reported as errors.

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::form::{Params, escape_url_argument, scalar_to_string};

/// Why part of a template could not be expanded as written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateErrorKind {
    /// `{` without a matching `}`.
    #[error("expression ended without closing")]
    ExpressionNotClosed,
    /// `}` outside of an expression.
    #[error("closing brace outside of an expression")]
    NonExpressionFound,
    /// An operator this expander does not support.
    #[error("unsupported operator '{0}'")]
    UnsupportedOperator(char),
    /// A variable name that is empty or contains invalid characters.
    #[error("malformed variable '{0}'")]
    MalformedVarSpec(String),
}

/// A non-fatal expansion error and the byte offset it was found at.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} at offset {position}")]
pub struct TemplateError {
    /// What went wrong.
    pub kind: TemplateErrorKind,
    /// Byte offset in the template.
    pub position: usize,
}

/// Result of expanding a template: best-effort output plus the errors met.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Expansion {
    /// Expanded string.
    pub output: String,
    /// Errors, in template order.
    pub errors: Vec<TemplateError>,
}

/// Expands URI templates with named values.
pub trait UriTemplateExpander: Send + Sync {
    /// Expand `template` with `values`.
    fn expand(&self, template: &str, values: &Params) -> Expansion;
}

/// Simple string expansion.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleExpander;

const OPERATORS: &[char] = &['+', '#', '.', '/', ';', '?', '&', '=', ',', '!', '@', '|'];

fn valid_var_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '%')
}

fn expand_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Array(items) if items.is_empty() => None,
        Value::Array(items) => Some(
            items
                .iter()
                .map(|item| escape_url_argument(&scalar_to_string(item)))
                .collect::<Vec<_>>()
                .join(","),
        ),
        scalar => Some(escape_url_argument(&scalar_to_string(scalar))),
    }
}

impl SimpleExpander {
    fn expand_expression(
        &self,
        expression: &str,
        position: usize,
        values: &Params,
        errors: &mut Vec<TemplateError>,
    ) -> String {
        let mut body = expression;
        if let Some(op) = body.chars().next()
            && OPERATORS.contains(&op)
        {
            errors.push(TemplateError {
                kind: TemplateErrorKind::UnsupportedOperator(op),
                position,
            });
            body = &body[op.len_utf8()..];
        }

        let mut parts = Vec::new();
        for spec in body.split(',') {
            let name = spec.trim_end_matches('*');
            let name = name.split_once(':').map_or(name, |(name, _)| name);
            if !valid_var_name(name) {
                errors.push(TemplateError {
                    kind: TemplateErrorKind::MalformedVarSpec(spec.to_string()),
                    position,
                });
                continue;
            }
            if let Some(expanded) = values.get(name).and_then(expand_value) {
                parts.push(expanded);
            }
        }
        parts.join(",")
    }
}

impl UriTemplateExpander for SimpleExpander {
    fn expand(&self, template: &str, values: &Params) -> Expansion {
        let mut expansion = Expansion::default();
        let mut rest = template;
        let mut offset = 0;

        while let Some(open) = rest.find(['{', '}']) {
            let (literal, tail) = rest.split_at(open);
            expansion.output.push_str(literal);

            if tail.starts_with('}') {
                expansion.errors.push(TemplateError {
                    kind: TemplateErrorKind::NonExpressionFound,
                    position: offset + open,
                });
                expansion.output.push('}');
                rest = &tail[1..];
                offset += open + 1;
                continue;
            }

            let Some(close) = tail.find('}') else {
                expansion.errors.push(TemplateError {
                    kind: TemplateErrorKind::ExpressionNotClosed,
                    position: offset + open,
                });
                expansion.output.push_str(tail);
                rest = "";
                break;
            };

            let expression = &tail[1..close];
            let expanded =
                self.expand_expression(expression, offset + open, values, &mut expansion.errors);
            expansion.output.push_str(&expanded);
            rest = &tail[close + 1..];
            offset += open + close + 1;
        }
        expansion.output.push_str(rest);
        expansion
    }
}

/// Expand a template, logging any errors and returning the best-effort
/// output.
pub fn expand_uri_template(
    expander: &dyn UriTemplateExpander,
    template: &str,
    values: &Params,
) -> String {
    let expansion = expander.expand(template, values);
    for error in &expansion.errors {
        warn!(template, %error, "URI template expansion error");
    }
    expansion.output
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values() -> Params {
        json!({
            "var": "value",
            "hello": "Hello World!",
            "x": 1024,
            "list": ["red", "green"],
            "empty": "",
            "nothing": null,
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    fn expand(template: &str) -> Expansion {
        SimpleExpander.expand(template, &values())
    }

    #[test]
    fn test_simple_expansion() {
        assert_eq!(expand("{var}").output, "value");
        assert_eq!(expand("{hello}").output, "Hello%20World%21");
        assert_eq!(expand("map?{x,var}").output, "map?1024,value");
        assert_eq!(expand("/colors/{list}").output, "/colors/red,green");
        assert_eq!(expand("O{empty}X").output, "OX");
        assert_eq!(expand("/users/{undefined}/{nothing}").output, "/users//");
        assert!(expand("/a/{var}/b").errors.is_empty());
    }

    #[test]
    fn test_errors_are_best_effort() {
        let expansion = expand("/a/{var");
        assert_eq!(expansion.output, "/a/{var");
        assert_eq!(expansion.errors[0].kind, TemplateErrorKind::ExpressionNotClosed);
        assert_eq!(expansion.errors[0].position, 3);

        let expansion = expand("/a}/{+var}");
        assert_eq!(expansion.output, "/a}/value");
        assert_eq!(expansion.errors.len(), 2);
        assert_eq!(expansion.errors[0].kind, TemplateErrorKind::NonExpressionFound);
        assert_eq!(expansion.errors[1].kind, TemplateErrorKind::UnsupportedOperator('+'));

        let expansion = expand("{va r}");
        assert_eq!(expansion.output, "");
        assert!(matches!(expansion.errors[0].kind, TemplateErrorKind::MalformedVarSpec(_)));
    }

    #[test]
    fn test_expand_uri_template() {
        assert_eq!(expand_uri_template(&SimpleExpander, "/{var}", &values()), "/value");
    }
}
