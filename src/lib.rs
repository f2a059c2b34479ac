mod error;
pub mod grammars;
mod registry;
mod scope;

mod renderers;
mod tokenizer;

#[cfg(test)]
mod test_utils;

pub use error::Error;
pub use grammars::{CompiledGrammar, RawGrammar, RawRule};
pub use registry::{HighlightedCode, Registry, global, register_grammar, tokenize};
pub use renderers::html::HtmlRenderer;
pub use scope::Scope;
pub use tokenizer::{CancellationToken, Token, TokenStream};
