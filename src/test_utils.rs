use std::ops::Range;
use std::sync::Arc;

use crate::grammars::{CompiledGrammar, RawGrammar};
use crate::tokenizer::Token;

pub(crate) fn grammar(value: serde_json::Value) -> Arc<CompiledGrammar> {
    let raw: RawGrammar = serde_json::from_value(value).unwrap();
    Arc::new(raw.compile().unwrap())
}

/// One line per token: depth, span, scope and text
pub(crate) fn dump(tokens: &[Token], text: &str) -> String {
    fn walk(tokens: &[Token], text: &str, depth: usize, out: &mut Vec<String>) {
        for t in tokens {
            out.push(format!(
                "{}{:?} {} {:?}",
                "  ".repeat(depth),
                t.span,
                t.scope
                    .map(|s| s.build_string())
                    .unwrap_or_else(|| "-".into()),
                t.text(text)
            ));
            walk(&t.children, text, depth + 1, out);
        }
    }
    let mut out = Vec::new();
    walk(tokens, text, 0, &mut out);
    out.join("\n")
}

/// Tokens must cover `span` exactly, in order and without empty tokens, at every level
pub(crate) fn assert_tiles(tokens: &[Token], span: Range<usize>) {
    let mut cursor = span.start;
    for t in tokens {
        assert_eq!(t.span.start, cursor, "gap or overlap at {cursor}");
        assert!(t.span.end > t.span.start, "empty token at {cursor}");
        if !t.children.is_empty() {
            assert_tiles(&t.children, t.span.clone());
        }
        cursor = t.span.end;
    }
    assert_eq!(cursor, span.end);
}
