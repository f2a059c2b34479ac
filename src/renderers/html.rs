use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::registry::HighlightedCode;
use crate::scope::Scope;
use crate::tokenizer::Token;

pub const DEFAULT_CLASS_PREFIX: &str = "hljs-";

#[derive(Debug, PartialEq, Clone)]
/// A renderer that will output proper HTML code, one `<span>` per scoped token.
/// Styling is left to a stylesheet targeting the classes.
pub struct HtmlRenderer {
    /// Prepended to the first atom of every scope: `keyword` -> `hljs-keyword`
    pub class_prefix: String,
    /// Any metadata we want to add as `<code>` data-* attribute
    pub other_metadata: BTreeMap<String, String>,
}

impl Default for HtmlRenderer {
    fn default() -> Self {
        Self {
            class_prefix: DEFAULT_CLASS_PREFIX.to_owned(),
            other_metadata: BTreeMap::new(),
        }
    }
}

impl HtmlRenderer {
    /// Renders the given highlighted code to an HTML string, escaping characters.
    pub fn render(&self, highlighted: &HighlightedCode) -> String {
        let aliases = &highlighted.grammar.class_name_aliases;
        let mut body = String::with_capacity(highlighted.source.len() * 2);
        for token in &highlighted.tokens {
            self.render_token(token, highlighted.source, aliases, &mut body);
        }

        let mut data_attrs = String::new();
        for (key, value) in &self.other_metadata {
            // lowercase and replace non-alphanumeric chars with hyphens
            let slugified_key: String = key
                .to_lowercase()
                .chars()
                .map(|c| {
                    if c.is_alphanumeric() || c == '-' {
                        c
                    } else {
                        '-'
                    }
                })
                .collect();
            data_attrs.push_str(&format!(
                r#" data-{slugified_key}="{}""#,
                HtmlEscaped(value)
            ));
        }

        format!(
            r#"<pre><code class="hljs language-{}"{data_attrs}>{body}</code></pre>"#,
            HtmlEscaped(&highlighted.language)
        )
    }

    fn render_token(
        &self,
        token: &Token,
        source: &str,
        aliases: &HashMap<String, String>,
        out: &mut String,
    ) {
        if let Some(scope) = token.scope {
            out.push_str(&format!(
                r#"<span class="{}">"#,
                self.class_names(scope, aliases)
            ));
        }

        if token.children.is_empty() {
            out.push_str(&HtmlEscaped(token.text(source)).to_string());
        } else {
            for child in &token.children {
                self.render_token(child, source, aliases, out);
            }
        }

        if token.scope.is_some() {
            out.push_str("</span>");
        }
    }

    /// `title.function` -> `hljs-title function_`, renaming the first atom with the
    /// grammar's class aliases
    fn class_names(&self, scope: Scope, aliases: &HashMap<String, String>) -> String {
        scope
            .parts()
            .iter()
            .enumerate()
            .map(|(i, atom)| {
                if i == 0 {
                    let atom = aliases.get(atom).unwrap_or(atom);
                    format!("{}{atom}", self.class_prefix)
                } else {
                    format!("{atom}{}", "_".repeat(i))
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// From syntect
pub(crate) struct HtmlEscaped<'a>(pub &'a str);
impl fmt::Display for HtmlEscaped<'_> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self(s) = *self;
        let mut last = 0;
        for (i, ch) in s.bytes().enumerate() {
            let escaped = match ch {
                b'>' => "&gt;",
                b'<' => "&lt;",
                b'&' => "&amp;",
                b'\'' => "&#39;",
                b'"' => "&quot;",
                _ => continue,
            };
            fmt.write_str(&s[last..i])?;
            fmt.write_str(escaped)?;
            last = i + 1;
        }

        if last < s.len() {
            fmt.write_str(&s[last..])?;
        }
        Ok(())
    }
}
