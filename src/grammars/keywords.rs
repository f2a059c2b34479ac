use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, OcraResult};
use crate::grammars::Regex;
use crate::scope::Scope;

/// The pattern used to find classifiable words when a table doesn't give one
pub const DEFAULT_KEYWORD_PATTERN: &str = r"\w+";

/// The categories a keyword table can put a word in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeywordCategory {
    Keyword,
    BuiltIn,
    Literal,
    Type,
    Option,
}

impl KeywordCategory {
    /// Lookup order: a word listed under several categories gets the first one
    pub const PRIORITY: [KeywordCategory; 5] = [
        KeywordCategory::Keyword,
        KeywordCategory::BuiltIn,
        KeywordCategory::Literal,
        KeywordCategory::Type,
        KeywordCategory::Option,
    ];

    pub fn label(self) -> &'static str {
        match self {
            KeywordCategory::Keyword => "keyword",
            KeywordCategory::BuiltIn => "built_in",
            KeywordCategory::Literal => "literal",
            KeywordCategory::Type => "type",
            KeywordCategory::Option => "option",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::PRIORITY.into_iter().find(|c| c.label() == label)
    }

    pub fn scope(self) -> Scope {
        Scope::new(self.label())
    }
}

/// Words per category plus the pattern (`$pattern`) delimiting what counts as a word.
/// Matching is case-sensitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordTable {
    pub pattern: Regex,
    /// word -> relevance, one map per category in `KeywordCategory::PRIORITY` order
    words: Vec<(KeywordCategory, HashMap<String, u32>)>,
}

impl KeywordTable {
    pub fn new(pattern: Regex) -> Self {
        Self {
            pattern,
            words: KeywordCategory::PRIORITY
                .into_iter()
                .map(|c| (c, HashMap::new()))
                .collect(),
        }
    }

    /// Adds a word, which can carry a relevance suffix: `"print|0"`
    pub fn insert(&mut self, category: KeywordCategory, word: &str) -> OcraResult<()> {
        let (word, relevance) = match word.split_once('|') {
            Some((w, r)) => {
                let relevance = r.trim().parse().map_err(|_| {
                    Error::Json(serde::de::Error::custom(format!(
                        "keyword relevance '{r}' of '{w}' is not a number"
                    )))
                })?;
                (w, relevance)
            }
            None => (word, 1),
        };
        if word.is_empty() {
            return Ok(());
        }
        if let Some((_, words)) = self.words.iter_mut().find(|(c, _)| *c == category) {
            words.insert(word.to_owned(), relevance);
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|(_, w)| w.is_empty())
    }

    /// The category of `word` and the relevance it contributes, if it's listed at all
    pub fn classify(&self, word: &str) -> Option<(KeywordCategory, u32)> {
        self.words
            .iter()
            .find_map(|(category, words)| words.get(word).map(|r| (*category, *r)))
    }
}

/// Scope for `word` under `table`, `None` meaning plain text
pub fn classify(word: &str, table: &KeywordTable) -> Option<Scope> {
    table.classify(word).map(|(category, _)| category.scope())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: &[(KeywordCategory, &str)]) -> KeywordTable {
        let mut table = KeywordTable::new(Regex::new(DEFAULT_KEYWORD_PATTERN.to_owned()));
        for (category, word) in entries {
            table.insert(*category, word).unwrap();
        }
        table
    }

    #[test]
    fn higher_priority_category_wins() {
        let t = table(&[
            (KeywordCategory::Type, "None"),
            (KeywordCategory::Literal, "None"),
            (KeywordCategory::BuiltIn, "print"),
            (KeywordCategory::Option, "print"),
        ]);
        assert_eq!(t.classify("None").map(|x| x.0), Some(KeywordCategory::Literal));
        assert_eq!(t.classify("print").map(|x| x.0), Some(KeywordCategory::BuiltIn));
        assert_eq!(classify("None", &t), Some(Scope::new("literal")));
    }

    #[test]
    fn matching_is_case_sensitive() {
        let t = table(&[(KeywordCategory::Keyword, "nil")]);
        assert!(t.classify("nil").is_some());
        assert!(t.classify("NIL").is_none());
        assert_eq!(classify("Nil", &t), None);
    }

    #[test]
    fn reads_relevance_suffix() {
        let t = table(&[
            (KeywordCategory::Keyword, "if|0"),
            (KeywordCategory::Keyword, "lambda|10"),
            (KeywordCategory::Keyword, "def"),
        ]);
        assert_eq!(t.classify("if"), Some((KeywordCategory::Keyword, 0)));
        assert_eq!(t.classify("lambda"), Some((KeywordCategory::Keyword, 10)));
        assert_eq!(t.classify("def"), Some((KeywordCategory::Keyword, 1)));
        assert!(t.classify("if|0").is_none());
    }

    #[test]
    fn rejects_non_numeric_relevance() {
        let mut t = KeywordTable::new(Regex::new(DEFAULT_KEYWORD_PATTERN.to_owned()));
        let err = t.insert(KeywordCategory::Keyword, "x|abc").unwrap_err();
        assert!(err.to_string().contains("'abc'"), "{err}");
        assert!(t.is_empty());
        assert!(t.insert(KeywordCategory::Keyword, "x|-1").is_err());
        assert!(t.insert(KeywordCategory::Keyword, "x| 2 ").is_ok());
        assert_eq!(t.classify("x"), Some((KeywordCategory::Keyword, 2)));
    }

    #[test]
    fn labels_round_trip() {
        for category in KeywordCategory::PRIORITY {
            assert_eq!(KeywordCategory::from_label(category.label()), Some(category));
        }
        assert_eq!(KeywordCategory::from_label("keywords"), None);
    }
}
