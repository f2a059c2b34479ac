use std::collections::{BTreeMap, HashMap};
use std::ops::{Deref, Index};

use serde::{Deserialize, Serialize};

use crate::error::{Error, OcraResult};
use crate::grammars::keywords::KeywordTable;
use crate::grammars::raw::{
    RawContains, RawGrammar, RawKeywords, RawPattern, RawRule, RawScope, RawWords,
};
use crate::grammars::regex::{Regex, join_groups};
use crate::scope::Scope;

/// End pattern of a begin-only rule with nested rules: closes right after the begin
/// unless a nested rule matches first.
pub const IMPLICIT_END: &str = r"\B|\b";

pub const ROOT_RULE_ID: RuleId = RuleId(0);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub u16);

impl Deref for RuleId {
    type Target = u16;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegexId(u16);

impl Deref for RegexId {
    type Target = u16;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// An entry of a `contains` list that is resolved when tokenizing:
///  * `self`, the rule whose list it is
///  * the name of a repository entry
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum Reference {
    Self_,
    Local(String),
}

impl From<&str> for Reference {
    fn from(value: &str) -> Self {
        match value {
            "self" => Self::Self_,
            name => Self::Local(name.to_owned()),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum RuleIdOrReference {
    RuleId(RuleId),
    Reference(Reference),
}

/// Scopes given to the lexeme of a begin or end match
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Captures {
    #[default]
    None,
    /// The whole lexeme
    Whole(Scope),
    /// Indexed by capture group of the compiled regex
    Groups(Vec<Option<Scope>>),
}

impl Captures {
    pub fn is_none(&self) -> bool {
        matches!(self, Captures::None)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub id: RuleId,
    pub scope: Option<Scope>,
    pub regex: RegexId,
    pub captures: Captures,
    pub keywords: Option<KeywordTable>,
    pub ends_parent: bool,
    pub relevance: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeginEnd {
    pub id: RuleId,
    pub scope: Option<Scope>,
    pub begin: RegexId,
    pub begin_captures: Captures,
    /// `None` for rules that only close with their parent
    pub end: Option<RegexId>,
    pub end_captures: Captures,
    pub patterns: Vec<RuleIdOrReference>,
    pub keywords: Option<KeywordTable>,
    pub ends_parent: bool,
    pub ends_with_parent: bool,
    pub exclude_begin: bool,
    pub exclude_end: bool,
    pub relevance: u32,
}

/// A group of rules with no pattern of its own, spliced where it is referenced.
/// The root rule is one, carrying the grammar keywords.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncludeOnly {
    pub id: RuleId,
    pub patterns: Vec<RuleIdOrReference>,
    pub keywords: Option<KeywordTable>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Rule {
    Match(Match),
    BeginEnd(BeginEnd),
    IncludeOnly(IncludeOnly),
    Noop,
}

impl Rule {
    /// The pattern a parent matches to enter this rule
    pub fn begin_regex(&self) -> Option<RegexId> {
        match self {
            Rule::Match(m) => Some(m.regex),
            Rule::BeginEnd(b) => Some(b.begin),
            Rule::IncludeOnly(_) | Rule::Noop => None,
        }
    }

    pub fn scope(&self) -> Option<Scope> {
        match self {
            Rule::Match(m) => m.scope,
            Rule::BeginEnd(b) => b.scope,
            Rule::IncludeOnly(_) | Rule::Noop => None,
        }
    }

    pub fn keywords(&self) -> Option<&KeywordTable> {
        match self {
            Rule::Match(m) => m.keywords.as_ref(),
            Rule::BeginEnd(b) => b.keywords.as_ref(),
            Rule::IncludeOnly(i) => i.keywords.as_ref(),
            Rule::Noop => None,
        }
    }

    pub fn patterns(&self) -> &[RuleIdOrReference] {
        match self {
            Rule::BeginEnd(b) => &b.patterns,
            Rule::IncludeOnly(i) => &i.patterns,
            Rule::Match(_) | Rule::Noop => &[],
        }
    }

    pub fn ends_parent(&self) -> bool {
        match self {
            Rule::Match(m) => m.ends_parent,
            Rule::BeginEnd(b) => b.ends_parent,
            Rule::IncludeOnly(_) | Rule::Noop => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledGrammar {
    pub name: String,
    pub display_name: Option<String>,
    pub aliases: Vec<String>,
    pub class_name_aliases: HashMap<String, String>,
    pub regexes: Vec<Regex>,
    pub rules: Vec<Rule>,
    pub repository: HashMap<String, RuleId>,
}

impl Index<RuleId> for CompiledGrammar {
    type Output = Rule;

    fn index(&self, id: RuleId) -> &Self::Output {
        &self.rules[*id as usize]
    }
}

impl Index<RegexId> for CompiledGrammar {
    type Output = Regex;

    fn index(&self, id: RegexId) -> &Self::Output {
        &self.regexes[*id as usize]
    }
}

impl CompiledGrammar {
    pub fn from_raw_grammar(raw: RawGrammar) -> OcraResult<Self> {
        let mut grammar = Self {
            name: raw.name,
            display_name: raw.display_name,
            aliases: raw.aliases,
            class_name_aliases: raw.class_name_aliases,
            regexes: Vec::new(),
            rules: Vec::new(),
            repository: HashMap::new(),
        };

        // the root is always the first rule
        let root_id = grammar.reserve_rule();
        debug_assert_eq!(root_id, ROOT_RULE_ID);

        grammar.compile_repository(raw.repository)?;

        let patterns = grammar.compile_contains(raw.contains)?;
        let keywords = raw.keywords.as_ref().map(|k| k.build()).transpose()?;
        grammar.rules[*root_id as usize] = Rule::IncludeOnly(IncludeOnly {
            id: root_id,
            patterns,
            keywords,
        });

        grammar.check_references()?;
        Ok(grammar)
    }

    /// The rule a repository name points to
    pub fn rule_by_name(&self, name: &str) -> Option<RuleId> {
        self.repository.get(name).copied()
    }

    /// Resolves the `contains` list of `owner` to the rules that can begin there, in order.
    /// `self` is the owner itself for begin/end rules, groups are spliced in place.
    pub fn begin_candidates(&self, owner: RuleId) -> Vec<RuleId> {
        let mut out = Vec::new();
        let mut visited = vec![owner];
        self.expand_patterns(owner, self[owner].patterns(), &mut visited, &mut out);
        out
    }

    fn expand_patterns(
        &self,
        owner: RuleId,
        patterns: &[RuleIdOrReference],
        visited: &mut Vec<RuleId>,
        out: &mut Vec<RuleId>,
    ) {
        for pattern in patterns {
            let rule_id = match pattern {
                RuleIdOrReference::RuleId(id) => *id,
                RuleIdOrReference::Reference(Reference::Self_) => owner,
                RuleIdOrReference::Reference(Reference::Local(name)) => {
                    match self.rule_by_name(name) {
                        Some(id) => id,
                        None => continue,
                    }
                }
            };

            match &self[rule_id] {
                Rule::Match(_) | Rule::BeginEnd(_) => out.push(rule_id),
                Rule::IncludeOnly(group) => {
                    if visited.contains(&rule_id) {
                        continue;
                    }
                    visited.push(rule_id);
                    self.expand_patterns(owner, &group.patterns, visited, out);
                }
                Rule::Noop => (),
            }
        }
    }

    fn reserve_rule(&mut self) -> RuleId {
        let id = RuleId(self.rules.len() as u16);
        // push a no-op to reserve its spot
        self.rules.push(Rule::Noop);
        id
    }

    fn compile_repository(&mut self, repository: BTreeMap<String, RawRule>) -> OcraResult<()> {
        for (name, raw_rule) in repository {
            let id = if raw_rule.variants.is_empty() {
                self.compile_rule(raw_rule)?
            } else {
                let id = self.reserve_rule();
                let patterns = self
                    .compile_variants(&raw_rule)?
                    .into_iter()
                    .map(RuleIdOrReference::RuleId)
                    .collect();
                self.rules[*id as usize] = Rule::IncludeOnly(IncludeOnly {
                    id,
                    patterns,
                    keywords: None,
                });
                id
            };
            self.repository.insert(name, id);
        }
        Ok(())
    }

    fn compile_variants(&mut self, raw_rule: &RawRule) -> OcraResult<Vec<RuleId>> {
        raw_rule
            .expand_variants()
            .into_iter()
            .map(|r| self.compile_rule(r))
            .collect()
    }

    fn compile_contains(&mut self, contains: Vec<RawContains>) -> OcraResult<Vec<RuleIdOrReference>> {
        let mut out = Vec::with_capacity(contains.len());

        for entry in contains {
            match entry {
                RawContains::Name(name) => {
                    out.push(RuleIdOrReference::Reference(name.as_str().into()));
                }
                RawContains::Rule(raw_rule) => {
                    out.extend(
                        self.compile_variants(&raw_rule)?
                            .into_iter()
                            .map(RuleIdOrReference::RuleId),
                    );
                }
            }
        }

        Ok(out)
    }

    /// Compiles a rule without variants
    fn compile_rule(&mut self, raw_rule: RawRule) -> OcraResult<RuleId> {
        let id = self.reserve_rule();

        // a multi-part `match` can put its group map in `scope`
        let (scope, scope_groups) = match &raw_rule.scope {
            Some(RawScope::Name(s)) => (Scope::from_label(s), None),
            Some(groups @ RawScope::Groups(_)) => (None, Some(groups.clone())),
            None => (None, None),
        };

        // `beginKeywords` doubles as the keyword table unless the rule has its own, scope or not
        let mut keywords = raw_rule.keywords.as_ref().map(|k| k.build()).transpose()?;
        if keywords.is_none()
            && let Some(words) = &raw_rule.begin_keywords
        {
            keywords = Some(RawKeywords::Words(RawWords::Spaced(words.clone())).build()?);
        }
        let relevance = raw_rule
            .relevance
            .unwrap_or(if raw_rule.begin_keywords.is_some() { 0 } else { 1 });
        let ends_parent = raw_rule.ends_parent.unwrap_or_default();
        let ends_with_parent = raw_rule.ends_with_parent.unwrap_or_default();

        let Some(begin_pattern) = raw_rule.begin_pattern() else {
            let rule = match raw_rule.contains {
                Some(contains) if !contains.is_empty() => Rule::IncludeOnly(IncludeOnly {
                    id,
                    patterns: self.compile_contains(contains)?,
                    keywords,
                }),
                _ => Rule::Noop,
            };
            self.rules[*id as usize] = rule;
            return Ok(id);
        };

        let begin_scope = raw_rule.begin_scope.or(scope_groups);
        let (begin, begin_captures) = self.compile_pattern(begin_pattern, begin_scope.as_ref())?;

        let has_contains = raw_rule.contains.as_ref().is_some_and(|c| !c.is_empty());
        let rule = if raw_rule.end.is_none() && !has_contains && !ends_with_parent {
            Rule::Match(Match {
                id,
                scope,
                regex: begin,
                captures: begin_captures,
                keywords,
                ends_parent,
                relevance,
            })
        } else {
            let (end, end_captures) = match raw_rule.end {
                Some(end_pattern) => {
                    let (end, captures) =
                        self.compile_pattern(end_pattern, raw_rule.end_scope.as_ref())?;
                    (Some(end), captures)
                }
                None if ends_with_parent => (None, Captures::None),
                None => (
                    Some(self.compile_regex(IMPLICIT_END.to_owned())?),
                    Captures::None,
                ),
            };
            let patterns = self.compile_contains(raw_rule.contains.unwrap_or_default())?;

            Rule::BeginEnd(BeginEnd {
                id,
                scope,
                begin,
                begin_captures,
                end,
                end_captures,
                patterns,
                keywords,
                ends_parent,
                ends_with_parent,
                exclude_begin: raw_rule.exclude_begin.unwrap_or_default(),
                exclude_end: raw_rule.exclude_end.unwrap_or_default(),
                relevance,
            })
        };

        self.rules[*id as usize] = rule;
        Ok(id)
    }

    fn compile_regex(&mut self, pattern: String) -> OcraResult<RegexId> {
        let regex_id = RegexId(self.regexes.len() as u16);
        self.regexes.push(Regex::compile(pattern)?);
        Ok(regex_id)
    }

    /// Compiles a begin/end pattern with the scopes of its lexeme.
    /// For multi-part patterns the keys of a group map are 1-based part positions,
    /// for single patterns they are the regex's own capture groups.
    fn compile_pattern(
        &mut self,
        pattern: RawPattern,
        scope: Option<&RawScope>,
    ) -> OcraResult<(RegexId, Captures)> {
        let (source, part_groups) = match pattern {
            RawPattern::Single(source) => (source, None),
            RawPattern::Groups(parts) => {
                let (joined, indices) = join_groups(&parts)?;
                (joined, Some(indices))
            }
        };
        let regex_id = self.compile_regex(source)?;

        let captures = match scope {
            None => Captures::None,
            Some(RawScope::Name(name)) => match Scope::from_label(name) {
                Some(s) => Captures::Whole(s),
                None => Captures::None,
            },
            Some(groups @ RawScope::Groups(_)) => {
                let regex = &self[regex_id];
                let available = part_groups
                    .as_ref()
                    .map(|indices| indices.len())
                    .unwrap_or_else(|| regex.captures_len());
                let mut out: Vec<Option<Scope>> = vec![None; regex.captures_len() + 1];

                for (key, label) in groups.groups()?.unwrap_or_default() {
                    if key == 0 || key > available {
                        return Err(Error::CaptureOutOfRange {
                            pattern: regex.pattern().to_owned(),
                            group: key,
                            available,
                        });
                    }
                    let group = match &part_groups {
                        Some(indices) => indices[key - 1],
                        None => key,
                    };
                    out[group] = Scope::from_label(&label);
                }
                Captures::Groups(out)
            }
        };

        Ok((regex_id, captures))
    }

    /// Every named reference must point to a repository entry
    fn check_references(&self) -> OcraResult<()> {
        for rule in &self.rules {
            for pattern in rule.patterns() {
                if let RuleIdOrReference::Reference(Reference::Local(name)) = pattern
                    && !self.repository.contains_key(name)
                {
                    return Err(Error::UnknownRule {
                        grammar: self.name.clone(),
                        name: name.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compile(value: serde_json::Value) -> OcraResult<CompiledGrammar> {
        let raw: RawGrammar = serde_json::from_value(value).unwrap();
        raw.compile()
    }

    #[test]
    fn root_is_first_and_keeps_declaration_order() {
        let g = compile(json!({
            "name": "t",
            "contains": [
                { "scope": "comment", "begin": "%", "end": "\\n" },
                { "scope": "number", "begin": "\\d+" },
            ],
        }))
        .unwrap();
        let candidates = g.begin_candidates(ROOT_RULE_ID);
        assert_eq!(candidates.len(), 2);
        assert!(matches!(g[candidates[0]], Rule::BeginEnd(_)));
        assert!(matches!(g[candidates[1]], Rule::Match(_)));
        assert_eq!(g[candidates[1]].scope(), Some(Scope::new("number")));
    }

    #[test]
    fn maps_part_positions_to_outer_groups() {
        let g = compile(json!({
            "name": "t",
            "contains": [{
                "begin": ["-?", "(kb|mb)?", "x"],
                "beginScope": { "1": "accent", "3": "number" },
            }],
        }))
        .unwrap();
        let Rule::Match(m) = &g[g.begin_candidates(ROOT_RULE_ID)[0]] else {
            panic!("expected a match rule");
        };
        let Captures::Groups(groups) = &m.captures else {
            panic!("expected group captures");
        };
        // (-?)((kb|mb)?)(x): part 3 is group 4
        assert_eq!(groups.len(), 5);
        assert_eq!(groups[1], Some(Scope::new("accent")));
        assert_eq!(groups[3], None);
        assert_eq!(groups[4], Some(Scope::new("number")));
    }

    #[test]
    fn rejects_scopes_on_missing_groups() {
        let err = compile(json!({
            "name": "t",
            "contains": [{ "begin": ["a", "b"], "beginScope": { "3": "x" } }],
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            Error::CaptureOutOfRange {
                group: 3,
                available: 2,
                ..
            }
        ));

        let err = compile(json!({
            "name": "t",
            "contains": [{ "begin": "(a)b", "beginScope": { "2": "x" } }],
        }))
        .unwrap_err();
        assert!(matches!(err, Error::CaptureOutOfRange { group: 2, .. }));
    }

    #[test]
    fn rejects_invalid_patterns() {
        let err = compile(json!({ "name": "t", "contains": [{ "begin": "[" }] })).unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { .. }));
    }

    #[test]
    fn rejects_non_numeric_keyword_relevance() {
        let err = compile(json!({
            "name": "t",
            "keywords": { "keyword": ["if", "x|abc"] },
        }))
        .unwrap_err();
        assert!(matches!(err, Error::Json(_)));

        let err = compile(json!({
            "name": "t",
            "contains": [{ "begin": "\\(", "end": "\\)", "keywords": "y|1 z|" }],
        }))
        .unwrap_err();
        assert!(err.to_string().contains("'z'"), "{err}");
    }

    #[test]
    fn rejects_unknown_references() {
        let err = compile(json!({
            "name": "t",
            "repository": { "string": { "scope": "string", "begin": "\"", "end": "\"", "contains": ["escape"] } },
            "contains": ["string"],
        }))
        .unwrap_err();
        assert!(
            matches!(err, Error::UnknownRule { grammar, name } if grammar == "t" && name == "escape")
        );
    }

    #[test]
    fn begin_only_rules_with_contains_get_the_implicit_end() {
        let g = compile(json!({
            "name": "t",
            "contains": [
                { "begin": ":", "contains": [{ "begin": "!\\w+" }] },
                { "scope": "string", "begin": "[^/]", "endsWithParent": true },
            ],
        }))
        .unwrap();
        let candidates = g.begin_candidates(ROOT_RULE_ID);
        let Rule::BeginEnd(reference) = &g[candidates[0]] else {
            panic!("expected begin/end");
        };
        assert_eq!(g[reference.end.unwrap()].pattern(), IMPLICIT_END);
        let Rule::BeginEnd(dstring) = &g[candidates[1]] else {
            panic!("expected begin/end");
        };
        assert!(dstring.end.is_none());
        assert!(dstring.ends_with_parent);
    }

    #[test]
    fn self_and_named_groups_are_resolved_lazily() {
        let g = compile(json!({
            "name": "t",
            "repository": {
                "literals": { "contains": [{ "scope": "number", "begin": "\\d+" }, "string"] },
                "string": { "scope": "string", "begin": "\"", "end": "\"" },
                "tuple": { "scope": "tuple", "begin": "\\(", "end": "\\)", "contains": ["self", "literals"] },
            },
            "contains": ["tuple", "literals"],
        }))
        .unwrap();
        let tuple = g.rule_by_name("tuple").unwrap();
        let string = g.rule_by_name("string").unwrap();
        let candidates = g.begin_candidates(tuple);
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0], tuple);
        assert_eq!(candidates[2], string);

        let root = g.begin_candidates(ROOT_RULE_ID);
        assert_eq!(root[0], tuple);
        assert_eq!(root.len(), 3);
    }

    #[test]
    fn named_variants_become_a_group() {
        let g = compile(json!({
            "name": "t",
            "repository": {
                "string": {
                    "scope": "string",
                    "variants": [{ "begin": "'", "end": "'" }, { "begin": "\"", "end": "\"" }],
                },
            },
            "contains": ["string"],
        }))
        .unwrap();
        assert!(matches!(g[g.rule_by_name("string").unwrap()], Rule::IncludeOnly(_)));
        let candidates = g.begin_candidates(ROOT_RULE_ID);
        assert_eq!(candidates.len(), 2);
        assert!(candidates.iter().all(|id| g[*id].scope() == Some(Scope::new("string"))));
    }

    #[test]
    fn begin_keywords_default_to_zero_relevance_and_fill_keywords() {
        let g = compile(json!({
            "name": "t",
            "contains": [{ "scope": "keyword", "beginKeywords": "nil true" }],
        }))
        .unwrap();
        let Rule::Match(m) = &g[g.begin_candidates(ROOT_RULE_ID)[0]] else {
            panic!("expected a match rule");
        };
        assert_eq!(m.relevance, 0);
        assert!(m.keywords.as_ref().unwrap().classify("true").is_some());

        let g = compile(json!({
            "name": "t",
            "contains": [{ "scope": "keyword", "beginKeywords": "nil true", "keywords": ["false"] }],
        }))
        .unwrap();
        let Rule::Match(m) = &g[g.begin_candidates(ROOT_RULE_ID)[0]] else {
            panic!("expected a match rule");
        };
        let table = m.keywords.as_ref().unwrap();
        assert!(table.classify("false").is_some());
        assert!(table.classify("true").is_none());
    }

    #[test]
    fn empty_scope_means_no_scope() {
        let g = compile(json!({
            "name": "t",
            "contains": [{ "scope": "", "begin": "\\{\\{" }],
        }))
        .unwrap();
        assert_eq!(g[g.begin_candidates(ROOT_RULE_ID)[0]].scope(), None);
    }
}
