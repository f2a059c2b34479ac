use std::fmt;
use std::path::Path;
use std::sync::{Arc, LazyLock};

#[cfg(feature = "dump")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, OcraResult};
use crate::grammars::{CompiledGrammar, RawGrammar};
use crate::tokenizer::{Token, TokenStream};

/// Grammars shipped with the crate, registered by [`Registry::with_builtin_grammars`]
const BUILTIN_GRAMMARS: &[&str] = &[
    include_str!("../grammars/ebnf.json"),
    include_str!("../grammars/fql.json"),
    include_str!("../grammars/fql-web.json"),
    include_str!("../grammars/python.json"),
];

#[cfg(feature = "dump")]
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct Dump {
    grammars: Vec<CompiledGrammar>,
    // registered name -> index in `grammars`
    names: Vec<(String, usize)>,
}

/// The fully tokenized text with the grammar that produced it
#[derive(Debug, Clone)]
pub struct HighlightedCode<'a> {
    /// The name of the grammar used, not the alias it was requested with
    pub language: String,
    pub source: &'a str,
    /// Top-level tokens tiling `source`
    pub tokens: Vec<Token>,
    /// See [`TokenStream::relevance`]
    pub relevance: u32,
    pub grammar: Arc<CompiledGrammar>,
}

/// Maps grammar names and aliases to compiled grammars.
///
/// Registration only needs a shared reference: the map is a lock-free `papaya` map and
/// grammars are handed out as `Arc`s, so a tokenization in progress keeps the grammar it
/// started with even if the name is registered again meanwhile.
pub struct Registry {
    grammars: papaya::HashMap<String, Arc<CompiledGrammar>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("grammars", &self.grammar_names())
            .finish()
    }
}

impl Registry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            grammars: papaya::HashMap::new(),
        }
    }

    /// A registry with the bundled `ebnf`, `fql`, `fql-web` and `python` grammars
    pub fn with_builtin_grammars() -> OcraResult<Self> {
        let registry = Self::new();
        for content in BUILTIN_GRAMMARS {
            registry.add_grammar_from_str(content)?;
        }
        Ok(registry)
    }

    /// Registers a compiled grammar under its name and all its aliases.
    /// Anything previously registered under one of those names is replaced.
    pub fn add_grammar(&self, grammar: CompiledGrammar) -> Arc<CompiledGrammar> {
        let grammar = Arc::new(grammar);
        let map = self.grammars.pin();
        map.insert(grammar.name.clone(), Arc::clone(&grammar));
        for alias in &grammar.aliases {
            map.insert(alias.clone(), Arc::clone(&grammar));
        }

        #[cfg(feature = "debug")]
        log::debug!(
            "[registry] registered grammar {} ({} rules, {} regexes)",
            grammar.name,
            grammar.rules.len(),
            grammar.regexes.len()
        );

        grammar
    }

    /// Compiles `raw` and registers it as `name` only, whatever name and aliases the
    /// definition carries. Nothing is registered if compilation fails.
    pub fn register(&self, name: &str, mut raw: RawGrammar) -> OcraResult<Arc<CompiledGrammar>> {
        raw.name = name.to_owned();
        raw.aliases.clear();
        let grammar = raw.compile()?;
        Ok(self.add_grammar(grammar))
    }

    /// Parses a JSON grammar definition and registers it under its own name.
    pub fn add_grammar_from_str(&self, content: &str) -> OcraResult<Arc<CompiledGrammar>> {
        let raw = RawGrammar::from_json(content)?;
        Ok(self.add_grammar(raw.compile()?))
    }

    /// Reads the file and add it as a grammar.
    pub fn add_grammar_from_path(&self, path: impl AsRef<Path>) -> OcraResult<Arc<CompiledGrammar>> {
        let raw = RawGrammar::load_from_file(path)?;
        Ok(self.add_grammar(raw.compile()?))
    }

    /// Adds an alias for the given grammar
    pub fn add_alias(&self, grammar_name: &str, alias: &str) -> OcraResult<()> {
        let grammar = self.resolve(grammar_name)?;
        self.grammars.pin().insert(alias.to_owned(), grammar);
        Ok(())
    }

    /// The grammar registered under `name`
    pub fn resolve(&self, name: &str) -> OcraResult<Arc<CompiledGrammar>> {
        self.grammars
            .pin()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownGrammar(name.to_owned()))
    }

    /// Checks whether the given name is available in the registry, as a grammar name
    /// or an alias
    pub fn contains_grammar(&self, name: &str) -> bool {
        self.grammars.pin().contains_key(name)
    }

    /// Names of the registered grammars, sorted. Aliases are not included.
    pub fn grammar_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .grammars
            .pin()
            .iter()
            .filter(|(key, grammar)| **key == grammar.name)
            .map(|(key, _)| key.clone())
            .collect();
        names.sort();
        names
    }

    /// Starts tokenizing `text`. Tokens are produced lazily as the stream is iterated.
    pub fn tokenize<'t>(&self, name: &str, text: &'t str) -> OcraResult<TokenStream<'t>> {
        Ok(TokenStream::new(self.resolve(name)?, text))
    }

    /// Tokenizes the whole text at once.
    ///
    /// This returns the raw output of the tokenizer. It's up to you to use
    /// a provided renderer or to use your own afterwards.
    pub fn highlight<'a>(&self, name: &str, text: &'a str) -> OcraResult<HighlightedCode<'a>> {
        let mut stream = self.tokenize(name, text)?;
        let tokens: Vec<Token> = stream.by_ref().collect();
        let grammar = Arc::clone(stream.grammar());

        Ok(HighlightedCode {
            language: grammar.name.clone(),
            source: text,
            tokens,
            relevance: stream.relevance(),
            grammar,
        })
    }

    /// Tokenizes `text` with every registered grammar and returns the name of the one
    /// scoring the highest relevance, the smallest name on ties.
    /// `None` if no grammar found anything relevant.
    pub fn detect_language(&self, text: &str) -> Option<String> {
        let mut best: Option<(u32, String)> = None;

        for name in self.grammar_names() {
            let Ok(mut stream) = self.tokenize(&name, text) else {
                continue;
            };
            stream.by_ref().for_each(drop);
            let score = stream.relevance();

            #[cfg(feature = "debug")]
            log::debug!("[detect_language] {name}: {score}");

            // names are sorted so the first one to reach a score keeps it
            if score > 0 && best.as_ref().is_none_or(|(s, _)| score > *s) {
                best = Some((score, name));
            }
        }

        best.map(|(_, name)| name)
    }

    #[cfg(feature = "dump")]
    /// Dump the compiled grammars to a binary file that can be loaded later
    pub fn dump_to_file(&self, path: impl AsRef<Path>) -> OcraResult<()> {
        let mut dump = Dump::default();
        let mut seen: Vec<Arc<CompiledGrammar>> = Vec::new();

        let map = self.grammars.pin();
        let mut entries: Vec<_> = map.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        for (name, grammar) in entries {
            let index = match seen.iter().position(|g| Arc::ptr_eq(g, grammar)) {
                Some(index) => index,
                None => {
                    seen.push(Arc::clone(grammar));
                    dump.grammars.push(CompiledGrammar::clone(grammar));
                    seen.len() - 1
                }
            };
            dump.names.push((name.clone(), index));
        }

        let data = bitcode::serialize(&dump)?;
        let compressed = zstd::encode_all(data.as_slice(), 0)?;
        std::fs::write(path, compressed)?;

        Ok(())
    }

    #[cfg(feature = "dump")]
    /// Read a binary dump made by [`Registry::dump_to_file`]
    pub fn load_from_file(path: impl AsRef<Path>) -> OcraResult<Self> {
        let compressed = std::fs::read(path)?;
        let data = zstd::decode_all(compressed.as_slice())?;
        let dump: Dump = bitcode::deserialize(&data)?;

        let grammars: Vec<Arc<CompiledGrammar>> = dump.grammars.into_iter().map(Arc::new).collect();
        let registry = Self::new();
        {
            let map = registry.grammars.pin();
            for (name, index) in dump.names {
                let grammar = grammars
                    .get(index)
                    .ok_or_else(|| Error::Dump(format!("grammar index {index} out of range")))?;
                map.insert(name, Arc::clone(grammar));
            }
        }
        Ok(registry)
    }
}

static GLOBAL: LazyLock<Registry> = LazyLock::new(|| {
    Registry::with_builtin_grammars().expect("bundled grammars should compile")
});

/// The process-wide registry, initialized with the bundled grammars on first use
pub fn global() -> &'static Registry {
    &GLOBAL
}

/// Registers a grammar in the process-wide registry, replacing any grammar of that name
pub fn register_grammar(name: &str, raw: RawGrammar) -> OcraResult<Arc<CompiledGrammar>> {
    global().register(name, raw)
}

/// Tokenizes `text` with a grammar of the process-wide registry
pub fn tokenize<'t>(name: &str, text: &'t str) -> OcraResult<TokenStream<'t>> {
    global().tokenize(name, text)
}
