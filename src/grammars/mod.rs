mod compiled;
mod keywords;
mod pattern_set;
mod raw;
mod regex;

pub use compiled::*;
pub use keywords::{DEFAULT_KEYWORD_PATTERN, KeywordCategory, KeywordTable, classify};
pub use pattern_set::{Candidate, PatternSet, PatternSetMatch};
pub use raw::{
    RawContains, RawGrammar, RawKeywordTable, RawKeywords, RawPattern, RawRule, RawScope, RawWords,
};
pub use regex::{Regex, RegexMatch, escape, join_groups};
