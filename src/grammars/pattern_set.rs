use std::fmt::{Debug, Formatter};

use onig::{RegSet, RegexOptions, SearchOptions};

use crate::grammars::RuleId;

/// What a pattern in a set stands for
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Candidate {
    /// The begin pattern of a rule contained in the current frame
    Begin(RuleId),
    /// The end pattern of the frame `depth` levels below the top of the stack,
    /// 0 being the current frame
    End(usize),
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PatternSetMatch {
    pub candidate: Candidate,
    pub start: usize,
    pub end: usize,
    pub capture_pos: Vec<Option<(usize, usize)>>,
}

/// An eagerly compiled pattern set for efficient batch regex matching using onig RegSet.
/// The leftmost match wins, ties go to the pattern that comes first.
pub struct PatternSet {
    candidates: Vec<Candidate>,
    regset: Option<RegSet>,
}

impl PatternSet {
    pub fn new(items: Vec<(Candidate, &str)>) -> Result<Self, String> {
        if items.is_empty() {
            return Ok(Self::empty());
        }

        let (candidates, patterns): (Vec<_>, Vec<_>) = items.into_iter().unzip();

        let regset = RegSet::with_options(&patterns, RegexOptions::REGEX_OPTION_CAPTURE_GROUP)
            .map_err(|e| {
                format!(
                    "Failed to compile pattern set with {} patterns: {:?}",
                    patterns.len(),
                    e
                )
            })?;

        Ok(Self {
            candidates,
            regset: Some(regset),
        })
    }

    /// A set that never matches
    pub fn empty() -> Self {
        Self {
            candidates: Vec::new(),
            regset: None,
        }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub(crate) fn find_at(&self, text: &str, pos: usize) -> Option<PatternSetMatch> {
        let regset = self.regset.as_ref()?;
        if pos > text.len() {
            return None;
        }

        // We need to specify pos/text.len() because some regex might do lookbehind
        if let Some((pattern_index, captures)) = regset.captures_with_options(
            text,
            pos,
            text.len(),
            onig::RegSetLead::Position,
            SearchOptions::SEARCH_OPTION_NONE,
        ) && let Some((match_start, match_end)) = captures.pos(0)
        {
            let capture_pos: Vec<Option<(usize, usize)>> =
                (0..captures.len()).map(|i| captures.pos(i)).collect();

            return Some(PatternSetMatch {
                candidate: self.candidates[pattern_index],
                start: match_start,
                end: match_end,
                capture_pos,
            });
        }

        None
    }
}

impl Debug for PatternSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PatternSet({} patterns)", self.candidates.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leftmost_match_wins() {
        let set = PatternSet::new(vec![
            (Candidate::Begin(RuleId(1)), "b+"),
            (Candidate::End(0), "a"),
        ])
        .unwrap();
        let m = set.find_at("xxabb", 0).unwrap();
        assert_eq!(m.candidate, Candidate::End(0));
        assert_eq!((m.start, m.end), (2, 3));
    }

    #[test]
    fn ties_go_to_the_first_pattern() {
        let set = PatternSet::new(vec![
            (Candidate::Begin(RuleId(1)), r"([a-z]+)(\s*)(=)"),
            (Candidate::Begin(RuleId(2)), r"[a-z]+"),
        ])
        .unwrap();
        let m = set.find_at("foo = 1", 0).unwrap();
        assert_eq!(m.candidate, Candidate::Begin(RuleId(1)));
        assert_eq!(m.capture_pos[1], Some((0, 3)));
        assert_eq!(m.capture_pos[3], Some((4, 5)));

        let m = set.find_at("foo bar", 0).unwrap();
        assert_eq!(m.candidate, Candidate::Begin(RuleId(2)));
        assert_eq!((m.start, m.end), (0, 3));
    }

    #[test]
    fn lookbehind_sees_text_before_pos() {
        let set = PatternSet::new(vec![(Candidate::End(0), r"(?<=a)b")]).unwrap();
        assert_eq!(set.find_at("ab", 1).map(|m| m.start), Some(1));
        assert!(set.find_at("cb", 1).is_none());
    }

    #[test]
    fn empty_set_never_matches() {
        let set = PatternSet::empty();
        assert!(set.is_empty());
        assert!(set.find_at("anything", 0).is_none());
    }
}
