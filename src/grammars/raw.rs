use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, OcraResult};
use crate::grammars::compiled::CompiledGrammar;
use crate::grammars::keywords::{DEFAULT_KEYWORD_PATTERN, KeywordCategory, KeywordTable};
use crate::grammars::{Regex, escape};

/// A pattern: either a single regex or a list of regexes matched one after the other,
/// each becoming its own capture group.
///
/// # Examples
/// ```json
/// "\\["
/// ```
///
/// ```json
/// ["[a-zA-Z_][\\w\\-]*", "\\s*", "="]
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawPattern {
    Single(String),
    Groups(Vec<String>),
}

/// Scope assignment: one scope for the whole lexeme or one per capture group.
/// Group keys are strings in JSON and 1-based.
///
/// # Examples
/// ```json
/// "variable"
/// ```
///
/// ```json
/// { "1": "title.function", "3": "operator" }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawScope {
    Name(String),
    Groups(BTreeMap<String, String>),
}

impl RawScope {
    /// The group map with parsed keys, `None` for a plain name
    pub(crate) fn groups(&self) -> OcraResult<Option<Vec<(usize, String)>>> {
        let RawScope::Groups(groups) = self else {
            return Ok(None);
        };
        groups
            .iter()
            .map(|(key, scope)| {
                key.parse::<usize>()
                    .map(|k| (k, scope.clone()))
                    .map_err(|_| {
                        Error::Json(serde::de::Error::custom(format!(
                            "scope group key '{key}' is not a number"
                        )))
                    })
            })
            .collect::<OcraResult<Vec<_>>>()
            .map(Some)
    }
}

/// A word list, as a JSON array or a single space-separated string
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawWords {
    Spaced(String),
    List(Vec<String>),
}

impl RawWords {
    pub fn words(&self) -> Vec<&str> {
        match self {
            RawWords::Spaced(s) => s.split_whitespace().collect(),
            RawWords::List(l) => l.iter().map(|s| s.as_str()).collect(),
        }
    }
}

/// A keyword table with its word pattern.
///
/// # Examples
/// ```json
/// {
///   "$pattern": "[^:|]+",
///   "keyword": ["any", "int", "bool"],
///   "literal": "nil true false"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct RawKeywordTable {
    #[serde(rename = "$pattern", alias = "$$pattern")]
    pub pattern: Option<String>,
    pub keyword: Option<RawWords>,
    pub built_in: Option<RawWords>,
    pub literal: Option<RawWords>,
    #[serde(rename = "type")]
    pub type_: Option<RawWords>,
    pub option: Option<RawWords>,
}

/// Keywords as a bare word list (all in the `keyword` category) or a full table
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawKeywords {
    Words(RawWords),
    Table(RawKeywordTable),
}

impl RawKeywords {
    pub(crate) fn build(&self) -> OcraResult<KeywordTable> {
        match self {
            RawKeywords::Words(words) => {
                let mut table = KeywordTable::new(Regex::compile(DEFAULT_KEYWORD_PATTERN.into())?);
                for w in words.words() {
                    table.insert(KeywordCategory::Keyword, w)?;
                }
                Ok(table)
            }
            RawKeywords::Table(t) => {
                let pattern = t.pattern.as_deref().unwrap_or(DEFAULT_KEYWORD_PATTERN);
                let mut table = KeywordTable::new(Regex::compile(pattern.to_owned())?);
                let categories = [
                    (KeywordCategory::Keyword, &t.keyword),
                    (KeywordCategory::BuiltIn, &t.built_in),
                    (KeywordCategory::Literal, &t.literal),
                    (KeywordCategory::Type, &t.type_),
                    (KeywordCategory::Option, &t.option),
                ];
                for (category, words) in categories {
                    for w in words.iter().flat_map(|w| w.words()) {
                        table.insert(category, w)?;
                    }
                }
                Ok(table)
            }
        }
    }
}

/// An entry of a `contains` list.
///
/// # Examples
/// ```json
/// "self"
/// ```
///
/// ```json
/// "string"
/// ```
///
/// ```json
/// { "scope": "comment", "begin": "%.*\\n?" }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawContains {
    /// `"self"` or the name of a repository entry
    Name(String),
    Rule(Box<RawRule>),
}

/// A scope rule as written in a grammar file.
///
/// Which kind of rule it compiles to depends on the fields present:
/// `begin` (or `match`) alone is a single match, `begin` + `end` is a begin/end region,
/// `contains` without `begin` is a group of rules spliced where it's referenced.
///
/// # Examples
/// ```json
/// {
///   "scope": "string",
///   "begin": "\"",
///   "end": "\"",
///   "contains": ["escape"]
/// }
/// ```
///
/// ```json
/// {
///   "begin": ["!", "\\w+"],
///   "beginScope": { "1": "reference", "2": "keyword" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawRule {
    #[serde(alias = "className")]
    pub scope: Option<RawScope>,
    pub begin: Option<RawPattern>,
    #[serde(rename = "match")]
    pub match_: Option<RawPattern>,
    pub end: Option<RawPattern>,
    pub begin_scope: Option<RawScope>,
    pub end_scope: Option<RawScope>,
    /// Space-separated words, shorthand for a `begin` matching any of them
    pub begin_keywords: Option<String>,
    pub keywords: Option<RawKeywords>,
    pub contains: Option<Vec<RawContains>>,
    pub variants: Vec<RawRule>,
    pub ends_parent: Option<bool>,
    pub ends_with_parent: Option<bool>,
    pub exclude_begin: Option<bool>,
    pub exclude_end: Option<bool>,
    pub relevance: Option<u32>,
}

impl RawRule {
    /// Replaces a rule having `variants` by one rule per variant, the variant's fields
    /// taking precedence over the base rule's.
    pub fn expand_variants(&self) -> Vec<RawRule> {
        if self.variants.is_empty() {
            return vec![self.clone()];
        }

        self.variants
            .iter()
            .flat_map(|variant| self.merged_with(variant).expand_variants())
            .collect()
    }

    fn merged_with(&self, variant: &RawRule) -> RawRule {
        fn pick<T: Clone>(variant: &Option<T>, base: &Option<T>) -> Option<T> {
            variant.clone().or_else(|| base.clone())
        }

        RawRule {
            scope: pick(&variant.scope, &self.scope),
            begin: pick(&variant.begin, &self.begin),
            match_: pick(&variant.match_, &self.match_),
            end: pick(&variant.end, &self.end),
            begin_scope: pick(&variant.begin_scope, &self.begin_scope),
            end_scope: pick(&variant.end_scope, &self.end_scope),
            begin_keywords: pick(&variant.begin_keywords, &self.begin_keywords),
            keywords: pick(&variant.keywords, &self.keywords),
            contains: pick(&variant.contains, &self.contains),
            variants: variant.variants.clone(),
            ends_parent: pick(&variant.ends_parent, &self.ends_parent),
            ends_with_parent: pick(&variant.ends_with_parent, &self.ends_with_parent),
            exclude_begin: pick(&variant.exclude_begin, &self.exclude_begin),
            exclude_end: pick(&variant.exclude_end, &self.exclude_end),
            relevance: pick(&variant.relevance, &self.relevance),
        }
    }

    /// The begin regex, taking `match` and `beginKeywords` into account
    pub(crate) fn begin_pattern(&self) -> Option<RawPattern> {
        if let Some(words) = &self.begin_keywords {
            let alternatives: Vec<String> = words.split_whitespace().map(escape).collect();
            return Some(RawPattern::Single(format!(
                r"\b({})(?!\.)(?=\b|\s)",
                alternatives.join("|")
            )));
        }
        self.match_.clone().or_else(|| self.begin.clone())
    }
}

/// Top-level structure of a grammar file
///
/// # Examples
/// ```json
/// {
///   "name": "ebnf",
///   "displayName": "EBNF",
///   "repository": {
///     "comment": { "scope": "comment", "begin": "\\(\\*", "end": "\\*\\)" }
///   },
///   "contains": ["comment", { "scope": "number", "begin": "\\b\\d+\\b" }]
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawGrammar {
    /// Name the grammar is registered under
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Other names it is registered under
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Renames applied to the first atom of a scope when rendering, eg `directory -> built_in`
    #[serde(default)]
    pub class_name_aliases: HashMap<String, String>,
    /// Keywords classified in text not matched by any rule
    #[serde(default)]
    pub keywords: Option<RawKeywords>,
    /// Named rules that `contains` lists can refer to
    #[serde(default)]
    pub repository: BTreeMap<String, RawRule>,
    /// Root rules, tried in order
    #[serde(default)]
    pub contains: Vec<RawContains>,
}

impl RawGrammar {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> OcraResult<Self> {
        let file = File::open(&path)?;
        let raw_grammar = serde_json::from_reader(&file)?;
        Ok(raw_grammar)
    }

    pub fn from_json(content: &str) -> OcraResult<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Compile this raw grammar into a validated, id-addressed grammar
    pub fn compile(self) -> OcraResult<CompiledGrammar> {
        CompiledGrammar::from_raw_grammar(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(value: serde_json::Value) -> RawRule {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn reads_multi_group_rules() {
        let r = rule(json!({
            "begin": ["[a-zA-Z_][\\w\\-]*", "\\s*", "="],
            "beginScope": { "1": "title.function", "3": "operator" },
        }));
        assert_eq!(
            r.begin,
            Some(RawPattern::Groups(vec![
                "[a-zA-Z_][\\w\\-]*".into(),
                "\\s*".into(),
                "=".into()
            ]))
        );
        let groups = r.begin_scope.unwrap().groups().unwrap().unwrap();
        assert_eq!(
            groups,
            vec![(1, "title.function".into()), (3, "operator".into())]
        );
    }

    #[test]
    fn rejects_non_numeric_group_keys() {
        let r = rule(json!({ "begin": "a", "beginScope": { "one": "x" } }));
        assert!(r.begin_scope.unwrap().groups().is_err());
    }

    #[test]
    fn reads_contains_entries() {
        let r = rule(json!({
            "className": "tuple",
            "begin": "\\(",
            "end": "\\)",
            "contains": ["self", "string", { "scope": "comment", "begin": "%.*\\n?" }],
            "endsParent": true,
        }));
        assert_eq!(r.scope, Some(RawScope::Name("tuple".into())));
        assert_eq!(r.ends_parent, Some(true));
        let contains = r.contains.unwrap();
        assert_eq!(contains[0], RawContains::Name("self".into()));
        assert_eq!(contains[1], RawContains::Name("string".into()));
        assert!(matches!(&contains[2], RawContains::Rule(r) if r.scope == Some(RawScope::Name("comment".into()))));
    }

    #[test]
    fn reads_keyword_tables() {
        let r = rule(json!({
            "begin": "<",
            "end": ">",
            "keywords": {
                "$$pattern": "[^:|]+",
                "keyword": ["int", "str"],
                "literal": "nil true false",
            },
        }));
        let table = r.keywords.unwrap().build().unwrap();
        assert_eq!(table.pattern.pattern(), "[^:|]+");
        assert_eq!(table.classify("str").map(|x| x.0), Some(KeywordCategory::Keyword));
        assert_eq!(table.classify("true").map(|x| x.0), Some(KeywordCategory::Literal));

        let bare = rule(json!({ "keywords": "if else" }));
        let table = bare.keywords.unwrap().build().unwrap();
        assert_eq!(table.pattern.pattern(), DEFAULT_KEYWORD_PATTERN);
        assert!(table.classify("else").is_some());
    }

    #[test]
    fn expands_variants_over_the_base_rule() {
        let r = rule(json!({
            "scope": "string",
            "contains": ["escape"],
            "variants": [
                { "begin": "'''", "end": "'''", "relevance": 10 },
                { "begin": "'", "end": "'", "contains": [] },
            ],
        }));
        let expanded = r.expand_variants();
        assert_eq!(expanded.len(), 2);
        assert_eq!(expanded[0].scope, Some(RawScope::Name("string".into())));
        assert_eq!(expanded[0].relevance, Some(10));
        assert_eq!(expanded[0].contains.as_ref().unwrap().len(), 1);
        assert_eq!(expanded[1].begin, Some(RawPattern::Single("'".into())));
        assert!(expanded[1].contains.as_ref().unwrap().is_empty());
        assert!(expanded.iter().all(|r| r.variants.is_empty()));
    }

    #[test]
    fn begin_keywords_build_a_word_alternation() {
        let r = rule(json!({ "scope": "keyword", "beginKeywords": "true -inf nan" }));
        assert_eq!(
            r.begin_pattern(),
            Some(RawPattern::Single(
                r"\b(true|\-inf|nan)(?!\.)(?=\b|\s)".to_owned()
            ))
        );
    }

    #[test]
    fn match_is_begin_sugar() {
        let r = rule(json!({ "match": ["\\bdef", "\\s+", "\\w+"], "scope": { "1": "keyword" } }));
        assert!(matches!(r.begin_pattern(), Some(RawPattern::Groups(g)) if g.len() == 3));
    }
}
