//! Message rendering with `{{variable}}` placeholders.

use std::collections::HashMap;

use crate::types::MessageTemplate;

/// Subject and body ready to hand to a channel sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: Option<String>,
    pub body: String,
}

/// Renders templates and inline step content against a variable map.
///
/// Placeholders take the form `{{ key }}` (inner whitespace optional) where
/// `key` is made of ASCII alphanumerics, `_`, `.` or `-`. A placeholder whose
/// key has no variable is left untouched.
#[derive(Debug, Clone, Default)]
pub struct TemplateRenderer;

impl TemplateRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Render a stored template, letting `subject_override` replace its subject.
    pub fn render_template(
        &self,
        template: &MessageTemplate,
        subject_override: Option<&str>,
        variables: &HashMap<String, String>,
    ) -> RenderedMessage {
        let subject = subject_override
            .or(template.subject.as_deref())
            .map(|s| self.substitute(s, variables));
        RenderedMessage {
            subject,
            body: self.substitute(&template.content, variables),
        }
    }

    /// Render inline step content.
    pub fn render_inline(
        &self,
        subject: Option<&str>,
        body: &str,
        variables: &HashMap<String, String>,
    ) -> RenderedMessage {
        RenderedMessage {
            subject: subject.map(|s| self.substitute(s, variables)),
            body: self.substitute(body, variables),
        }
    }

    pub fn substitute(&self, input: &str, variables: &HashMap<String, String>) -> String {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after_open = &rest[start + 2..];
            let Some(end) = after_open.find("}}") else {
                out.push_str(&rest[start..]);
                return out;
            };
            let key = after_open[..end].trim();
            match variables.get(key) {
                Some(value) if is_placeholder_key(key) => out.push_str(value),
                _ => out.push_str(&rest[start..start + 2 + end + 2]),
            }
            rest = &after_open[end + 2..];
        }
        out.push_str(rest);
        out
    }
}

fn is_placeholder_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}
