use std::fmt;
use std::sync::{Arc, LazyLock, OnceLock};

use onig::{Region, SearchOptions};
use serde::{Deserialize, Serialize};

use crate::error::{Error, OcraResult};

/// Compiled regexes shared by every grammar, keyed by pattern source.
/// Grammars repeat the same small patterns (`"`, `\(`, `\w+`) a lot.
static COMPILED: LazyLock<papaya::HashMap<String, Arc<onig::Regex>>> =
    LazyLock::new(papaya::HashMap::new);

fn compile_shared(pattern: &str) -> Result<Arc<onig::Regex>, onig::Error> {
    let cache = COMPILED.pin();
    if let Some(re) = cache.get(pattern) {
        return Ok(re.clone());
    }
    let re = Arc::new(onig::Regex::new(pattern)?);
    Ok(cache.get_or_insert(pattern.to_owned(), re).clone())
}

/// A match of a single regex: overall span and every capture group, absolute byte offsets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegexMatch {
    pub start: usize,
    pub end: usize,
    pub captures: Vec<Option<(usize, usize)>>,
}

/// A regex wrapper that serializes as a string but compiles lazily at runtime
pub struct Regex {
    pattern: String,
    compiled: OnceLock<Option<Arc<onig::Regex>>>,
}

impl Clone for Regex {
    fn clone(&self) -> Self {
        Regex::new(self.pattern.clone())
    }
}

impl fmt::Debug for Regex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.pattern)
    }
}

impl PartialEq for Regex {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Regex {
    pub fn new(pattern: String) -> Self {
        Self {
            pattern,
            compiled: OnceLock::new(),
        }
    }

    /// Compiles eagerly, failing with `Error::InvalidPattern`
    pub fn compile(pattern: String) -> OcraResult<Self> {
        let re = compile_shared(&pattern).map_err(|e| Error::InvalidPattern {
            pattern: pattern.clone(),
            reason: e.to_string(),
        })?;
        let compiled = OnceLock::new();
        let _ = compiled.set(Some(re));
        Ok(Self { pattern, compiled })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn compiled(&self) -> Option<&Arc<onig::Regex>> {
        self.compiled
            .get_or_init(|| compile_shared(&self.pattern).ok())
            .as_ref()
    }

    /// Number of capture groups, not counting group 0
    pub fn captures_len(&self) -> usize {
        self.compiled().map(|re| re.captures_len()).unwrap_or(0)
    }

    /// Finds the leftmost match starting at or after `from`.
    /// The whole text is given to onig so lookbehinds and `\b` see what precedes `from`.
    pub fn find_at(&self, text: &str, from: usize) -> Option<RegexMatch> {
        let re = self.compiled()?;
        if from > text.len() {
            return None;
        }
        let mut region = Region::new();
        re.search_with_options(
            text,
            from,
            text.len(),
            SearchOptions::SEARCH_OPTION_NONE,
            Some(&mut region),
        )?;
        let (start, end) = region.pos(0)?;
        Some(RegexMatch {
            start,
            end,
            captures: (0..region.len()).map(|i| region.pos(i)).collect(),
        })
    }

    /// Every non-overlapping non-empty match in `text`
    pub fn find_iter(&self, text: &str) -> Vec<(usize, usize)> {
        match self.compiled() {
            Some(re) => re.find_iter(text).filter(|(s, e)| e > s).collect(),
            None => Vec::new(),
        }
    }
}

impl Serialize for Regex {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.pattern)
    }
}

impl<'de> Deserialize<'de> for Regex {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let pattern = String::deserialize(deserializer)?;
        Ok(Regex::new(pattern))
    }
}

/// Joins the parts of a multi-group pattern (`begin: [a, b, c]`) into `(a)(b)(c)`.
///
/// Returns the joined source and, for each part, the index of the group wrapping it.
/// Parts can have groups of their own so the indices are not simply 1..=n.
pub fn join_groups(parts: &[String]) -> OcraResult<(String, Vec<usize>)> {
    let mut joined = String::new();
    let mut group_indices = Vec::with_capacity(parts.len());
    let mut next_group = 1;

    for part in parts {
        let inner = Regex::compile(part.clone())?.captures_len();
        group_indices.push(next_group);
        next_group += 1 + inner;
        joined.push('(');
        joined.push_str(part);
        joined.push(')');
    }

    Ok((joined, group_indices))
}

/// Escapes regex metacharacters so `s` matches literally
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if "\\^$.|?*+()[]{}-/#".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_patterns() {
        let err = Regex::compile("(unclosed".to_owned()).unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { .. }));
    }

    #[test]
    fn finds_leftmost_match_from_offset() {
        let re = Regex::compile(r"\d+".to_owned()).unwrap();
        let m = re.find_at("ab 12 34", 4).unwrap();
        assert_eq!((m.start, m.end), (6, 8));
        assert!(re.find_at("ab 12 34", 9).is_none());
    }

    #[test]
    fn word_boundaries_see_text_before_offset() {
        let re = Regex::compile(r"\bfoo".to_owned()).unwrap();
        // `foo` at 1 is preceded by `x` so it's not at a word boundary
        assert!(re.find_at("xfoo", 1).is_none());
        assert_eq!(re.find_at("x foo", 1).unwrap().start, 2);
    }

    #[test]
    fn joined_groups_account_for_inner_groups() {
        let parts = vec![
            r"-?".to_owned(),
            r"\d+".to_owned(),
            r"(kb|mb|gb)?".to_owned(),
            "x".to_owned(),
        ];
        let (joined, indices) = join_groups(&parts).unwrap();
        assert_eq!(joined, r"(-?)(\d+)((kb|mb|gb)?)(x)");
        assert_eq!(indices, vec![1, 2, 3, 5]);

        let re = Regex::compile(joined).unwrap();
        assert_eq!(re.captures_len(), 5);
        let m = re.find_at("-12kbx", 0).unwrap();
        assert_eq!(m.captures[indices[2]], Some((3, 5)));
        assert_eq!(m.captures[indices[3]], Some((5, 6)));
    }

    #[test]
    fn joining_reports_the_invalid_part() {
        let parts = vec!["a".to_owned(), "[".to_owned()];
        match join_groups(&parts) {
            Err(Error::InvalidPattern { pattern, .. }) => assert_eq!(pattern, "["),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn escaped_words_match_literally() {
        let re = Regex::compile(escape("-inf.x")).unwrap();
        assert!(re.find_at("-inf.x", 0).is_some());
        assert!(re.find_at("-infax", 0).is_none());
    }

    #[test]
    fn iterates_non_empty_matches() {
        let re = Regex::compile(r"[^:|]+".to_owned()).unwrap();
        assert_eq!(re.find_iter("int|str:x"), vec![(0, 3), (4, 7), (8, 9)]);
    }
}
