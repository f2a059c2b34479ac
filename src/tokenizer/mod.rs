use std::collections::{HashMap, VecDeque};
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::grammars::{
    Candidate, Captures, CompiledGrammar, KeywordTable, PatternSet, PatternSetMatch, Rule, RuleId,
};
use crate::scope::Scope;
use crate::tokenizer::stack::RuleStack;

mod stack;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Byte span in the source (start inclusive, end exclusive, 0-based)
    pub span: Range<usize>,
    /// `None` for plain text and for structural rules without a scope
    pub scope: Option<Scope>,
    /// For composite tokens, the tokens tiling `span`. Empty for leaves.
    pub children: Vec<Token>,
}

impl Token {
    pub(crate) fn plain(span: Range<usize>) -> Self {
        Self {
            span,
            scope: None,
            children: Vec::new(),
        }
    }

    pub(crate) fn scoped(span: Range<usize>, scope: Scope) -> Self {
        Self {
            span,
            scope: Some(scope),
            children: Vec::new(),
        }
    }

    /// Builds a token from the pieces covering `span`, merging adjacent plain pieces.
    pub(crate) fn composite(span: Range<usize>, scope: Option<Scope>, mut children: Vec<Token>) -> Self {
        coalesce(&mut children);
        // a single plain child adds nothing
        if children.len() == 1 && children[0].is_plain() && children[0].span == span {
            children.clear();
        }
        Self {
            span,
            scope,
            children,
        }
    }

    /// A token without scope or children
    pub fn is_plain(&self) -> bool {
        self.scope.is_none() && self.children.is_empty()
    }

    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.span.clone()]
    }

    /// The leaves under this token with the scopes enclosing each, outermost first
    pub fn leaves(&self) -> Vec<(Range<usize>, Vec<Scope>)> {
        let mut out = Vec::new();
        self.collect_leaves(&mut Vec::new(), &mut out);
        out
    }

    fn collect_leaves(&self, scopes: &mut Vec<Scope>, out: &mut Vec<(Range<usize>, Vec<Scope>)>) {
        if let Some(scope) = self.scope {
            scopes.push(scope);
        }
        if self.children.is_empty() {
            out.push((self.span.clone(), scopes.clone()));
        } else {
            for child in &self.children {
                child.collect_leaves(scopes, out);
            }
        }
        if self.scope.is_some() {
            scopes.pop();
        }
    }
}

impl Serialize for Token {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut s = serializer.serialize_struct("Token", 4)?;
        s.serialize_field("start", &self.span.start)?;
        s.serialize_field("end", &self.span.end)?;
        s.serialize_field("scope", &self.scope)?;
        s.serialize_field("children", &self.children)?;
        s.end()
    }
}

/// Merges adjacent plain tokens and drops empty ones
fn coalesce(tokens: &mut Vec<Token>) {
    let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
    for token in tokens.drain(..) {
        if token.span.is_empty() {
            continue;
        }
        if token.is_plain()
            && let Some(last) = out.last_mut()
            && last.is_plain()
            && last.span.end == token.span.start
        {
            last.span.end = token.span.end;
            continue;
        }
        out.push(token);
    }
    *tokens = out;
}

/// Splits `range` into keyword tokens and plain text, returning the relevance of the
/// keywords found. Without a table the whole range is plain.
fn classify_text(
    text: &str,
    range: Range<usize>,
    keywords: Option<&KeywordTable>,
) -> (Vec<Token>, u32) {
    if range.is_empty() {
        return (Vec::new(), 0);
    }
    let Some(table) = keywords.filter(|t| !t.is_empty()) else {
        return (vec![Token::plain(range)], 0);
    };

    let mut out = Vec::new();
    let mut cursor = range.start;
    let mut relevance: u32 = 0;

    for (start, end) in table.pattern.find_iter(&text[range.clone()]) {
        let (start, end) = (range.start + start, range.start + end);
        if let Some((category, r)) = table.classify(&text[start..end]) {
            if start > cursor {
                out.push(Token::plain(cursor..start));
            }
            out.push(Token::scoped(start..end, category.scope()));
            relevance = relevance.saturating_add(r);
            cursor = end;
        }
    }
    if cursor < range.end {
        out.push(Token::plain(cursor..range.end));
    }

    (out, relevance)
}

/// Shared flag to stop a tokenization from another thread.
/// The stream checks it before producing each top-level token.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Lazily produces the top-level tokens of a text.
///
/// Every call to [`crate::Registry::tokenize`] creates a new stream: the only state is
/// the rule stack and a cache of pattern sets, both owned by the stream.
pub struct TokenStream<'t> {
    grammar: Arc<CompiledGrammar>,
    text: &'t str,
    /// Where the next search starts
    pos: usize,
    stack: RuleStack,
    /// Pattern sets by the chain of rules contributing candidates, innermost first
    pattern_cache: HashMap<Vec<RuleId>, PatternSet>,
    /// Rules that opened and closed at `stalled_at` without consuming anything
    stalled: Vec<RuleId>,
    stalled_at: usize,
    ready: VecDeque<Token>,
    done: bool,
    cancellation: Option<CancellationToken>,
    relevance: u32,
}

impl<'t> TokenStream<'t> {
    pub fn new(grammar: Arc<CompiledGrammar>, text: &'t str) -> Self {
        Self {
            grammar,
            text,
            pos: 0,
            stack: RuleStack::new(),
            pattern_cache: HashMap::new(),
            stalled: Vec::new(),
            stalled_at: 0,
            ready: VecDeque::new(),
            done: false,
            cancellation: None,
            relevance: 0,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn grammar(&self) -> &Arc<CompiledGrammar> {
        &self.grammar
    }

    /// Sum of the relevance of every rule entered and keyword found so far
    pub fn relevance(&self) -> u32 {
        self.relevance
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation.as_ref().is_some_and(|c| c.is_cancelled())
    }

    /// Rules whose patterns are tried in the current frame: the top frame, then
    /// every ancestor reachable through `endsWithParent`.
    fn candidate_key(&self) -> Vec<RuleId> {
        let mut key = Vec::with_capacity(1);
        let mut depth = 0;
        while let Some(frame) = self.stack.at_depth(depth) {
            key.push(frame.rule);
            match &self.grammar[frame.rule] {
                Rule::BeginEnd(b) if b.ends_with_parent => depth += 1,
                _ => break,
            }
        }
        key
    }

    fn build_pattern_set(grammar: &CompiledGrammar, key: &[RuleId]) -> PatternSet {
        let mut items: Vec<(Candidate, &str)> = grammar
            .begin_candidates(key[0])
            .into_iter()
            .filter_map(|id| {
                grammar[id]
                    .begin_regex()
                    .map(|re| (Candidate::Begin(id), grammar[re].pattern()))
            })
            .collect();

        for (depth, rule_id) in key.iter().enumerate() {
            if let Rule::BeginEnd(b) = &grammar[*rule_id]
                && let Some(end) = b.end
            {
                items.push((Candidate::End(depth), grammar[end].pattern()));
            }
        }

        #[cfg(feature = "debug")]
        log::debug!(
            "[build_pattern_set] rules {:?}: {} patterns",
            key.iter().map(|r| **r).collect::<Vec<_>>(),
            items.len()
        );

        PatternSet::new(items).unwrap_or_else(|_err| {
            #[cfg(feature = "debug")]
            log::debug!("[build_pattern_set] {_err}, frame degrades to plain text");
            PatternSet::empty()
        })
    }

    fn find_next(&mut self) -> Option<PatternSetMatch> {
        if self.pos > self.text.len() {
            return None;
        }
        let key = self.candidate_key();
        if !self.pattern_cache.contains_key(&key) {
            let set = Self::build_pattern_set(&self.grammar, &key);
            self.pattern_cache.insert(key.clone(), set);
        }
        self.pattern_cache
            .get(&key)
            .and_then(|set| set.find_at(self.text, self.pos))
    }

    fn mark_stalled(&mut self, rule: RuleId, at: usize) {
        if self.stalled_at != at {
            self.stalled.clear();
            self.stalled_at = at;
        }
        self.stalled.push(rule);
    }

    /// A zero-width begin can't be entered again where it made no progress before
    fn is_blocked(&self, rule: RuleId, at: usize) -> bool {
        (self.stalled_at == at && self.stalled.contains(&rule)) || self.stack.is_open_at(rule, at)
    }

    /// Leaves the character at `at` to the current frame's text and moves past it
    fn skip_char(&mut self, at: usize) {
        match self.text[at..].chars().next() {
            Some(c) => self.pos = at + c.len_utf8(),
            None => self.finish(),
        }
    }

    /// Turns the text of the top frame up to `to` into tokens
    fn flush_gap(&mut self, to: usize) {
        let frame = self.stack.top();
        if to <= frame.cursor {
            return;
        }
        let keywords = self.grammar[frame.rule].keywords();
        let (tokens, relevance) = classify_text(self.text, frame.cursor..to, keywords);
        self.relevance = self.relevance.saturating_add(relevance);

        let frame = self.stack.top_mut();
        for token in tokens {
            frame.push(token);
        }
        frame.cursor = to;
    }

    fn lexeme_tokens(
        &mut self,
        m: &PatternSetMatch,
        captures: &Captures,
        keywords: Option<&KeywordTable>,
    ) -> Vec<Token> {
        match captures {
            Captures::None => {
                let (tokens, relevance) = classify_text(self.text, m.start..m.end, keywords);
                self.relevance = self.relevance.saturating_add(relevance);
                tokens
            }
            Captures::Whole(scope) => vec![Token::scoped(m.start..m.end, *scope)],
            Captures::Groups(scopes) => {
                let mut out = Vec::new();
                let mut cursor = m.start;
                for (group, scope) in scopes.iter().enumerate() {
                    let Some(scope) = scope else {
                        continue;
                    };
                    let Some(Some((start, end))) = m.capture_pos.get(group).copied() else {
                        continue;
                    };
                    // nested groups and groups captured inside a lookaround are skipped
                    if start < cursor || start >= end || end > m.end {
                        continue;
                    }
                    if start > cursor {
                        out.push(Token::plain(cursor..start));
                    }
                    out.push(Token::scoped(start..end, *scope));
                    cursor = end;
                }
                if cursor < m.end {
                    out.push(Token::plain(cursor..m.end));
                }
                out
            }
        }
    }

    /// Closes the top frame at `at`, handing its composite token to the parent
    fn close_top(&mut self, at: usize) {
        if self.stack.len() <= 1 {
            return;
        }
        self.flush_gap(at);
        let Some(frame) = self.stack.pop() else {
            return;
        };

        #[cfg(feature = "debug")]
        log::debug!("[close] rule {} at {}..{at}", *frame.rule, frame.start);

        if frame.start == at {
            self.mark_stalled(frame.rule, at);
        }
        let token = Token::composite(frame.start..at, self.grammar[frame.rule].scope(), frame.children);
        let parent = self.stack.top_mut();
        parent.push(token);
        parent.cursor = at;
    }

    /// Closes the top frame, then its ancestors as long as the closed rule ends its parent
    fn close_with_parents(&mut self, at: usize) {
        while self.stack.len() > 1 {
            let rule = self.stack.top().rule;
            self.close_top(at);
            if !self.grammar[rule].ends_parent() {
                break;
            }
        }
    }

    fn handle_begin(&mut self, rule_id: RuleId, m: PatternSetMatch) {
        if m.start == m.end && self.is_blocked(rule_id, m.start) {
            #[cfg(feature = "debug")]
            log::debug!("[tokenize] skip zero-width rule {} at {}", *rule_id, m.start);
            self.skip_char(m.start);
            return;
        }

        let grammar = Arc::clone(&self.grammar);
        match &grammar[rule_id] {
            Rule::Match(rule) => {
                #[cfg(feature = "debug")]
                log::debug!("[tokenize] match rule {} at {}..{}", *rule_id, m.start, m.end);

                self.flush_gap(m.start);
                let lexeme = self.lexeme_tokens(&m, &rule.captures, rule.keywords.as_ref());
                let frame = self.stack.top_mut();
                match rule.scope {
                    Some(scope) => frame.push(Token::composite(m.start..m.end, Some(scope), lexeme)),
                    None => lexeme.into_iter().for_each(|t| frame.push(t)),
                }
                frame.cursor = m.end;
                self.relevance = self.relevance.saturating_add(rule.relevance);
                self.pos = m.end;

                if rule.ends_parent && self.stack.len() > 1 {
                    self.close_with_parents(m.end);
                } else if m.start == m.end {
                    self.mark_stalled(rule_id, m.start);
                }
            }
            Rule::BeginEnd(rule) => {
                #[cfg(feature = "debug")]
                log::debug!("[tokenize] begin rule {} at {}..{}", *rule_id, m.start, m.end);

                if rule.exclude_begin {
                    if rule.begin_captures.is_none() {
                        self.flush_gap(m.end);
                    } else {
                        self.flush_gap(m.start);
                        let lexeme = self.lexeme_tokens(&m, &rule.begin_captures, None);
                        let frame = self.stack.top_mut();
                        lexeme.into_iter().for_each(|t| frame.push(t));
                        frame.cursor = m.end;
                    }
                    self.stack.push(rule_id, m.end);
                } else {
                    self.flush_gap(m.start);
                    self.stack.push(rule_id, m.start);
                    // without begin scopes the lexeme is text of the new frame
                    if !rule.begin_captures.is_none() {
                        let lexeme = self.lexeme_tokens(&m, &rule.begin_captures, None);
                        let frame = self.stack.top_mut();
                        lexeme.into_iter().for_each(|t| frame.push(t));
                        frame.cursor = m.end;
                    }
                }
                self.relevance = self.relevance.saturating_add(rule.relevance);
                self.pos = m.end;
            }
            Rule::IncludeOnly(_) | Rule::Noop => {
                // only rules with a begin pattern are candidates
                self.skip_char(m.start);
            }
        }
    }

    fn handle_end(&mut self, depth: usize, m: PatternSetMatch) {
        // frames above the one whose end matched close where the end lexeme starts
        for _ in 0..depth {
            self.close_top(m.start);
        }

        let rule_id = self.stack.top().rule;
        let grammar = Arc::clone(&self.grammar);
        let (end_captures, exclude_end) = match &grammar[rule_id] {
            Rule::BeginEnd(b) => (&b.end_captures, b.exclude_end),
            _ => (&Captures::None, false),
        };

        #[cfg(feature = "debug")]
        log::debug!("[tokenize] end rule {} at {}..{}", *rule_id, m.start, m.end);

        let end = if exclude_end {
            m.start
        } else {
            if !end_captures.is_none() {
                self.flush_gap(m.start);
                let lexeme = self.lexeme_tokens(&m, end_captures, None);
                let frame = self.stack.top_mut();
                lexeme.into_iter().for_each(|t| frame.push(t));
                frame.cursor = m.end;
            }
            m.end
        };
        self.close_top(end);

        // an excluded end lexeme belongs to the parent
        if exclude_end && !end_captures.is_none() {
            let lexeme = self.lexeme_tokens(&m, end_captures, None);
            let frame = self.stack.top_mut();
            lexeme.into_iter().for_each(|t| frame.push(t));
            frame.cursor = m.end;
        }
        self.pos = m.end;

        if grammar[rule_id].ends_parent() {
            self.close_with_parents(end);
        }
    }

    /// Closes every open frame at the end of the text
    fn finish(&mut self) {
        let len = self.text.len();

        #[cfg(feature = "debug")]
        {
            if self.stack.len() > 1 {
                log::debug!("[finish] force closing {} frame(s)", self.stack.len() - 1);
            }
        }

        while self.stack.len() > 1 {
            self.close_top(len);
        }
        self.flush_gap(len);
        self.pos = len;
        self.done = true;
    }

    fn step(&mut self) {
        match self.find_next() {
            Some(m) => match m.candidate {
                Candidate::Begin(rule_id) => self.handle_begin(rule_id, m),
                Candidate::End(depth) => self.handle_end(depth, m),
            },
            None => self.finish(),
        }
    }

    /// Moves the finished top-level tokens to the output queue.
    /// A trailing plain token is kept back as it might grow.
    fn collect_ready(&mut self) {
        let done = self.done;
        let root = self.stack.root_mut();
        coalesce(&mut root.children);
        let keep = usize::from(!done && root.children.last().is_some_and(Token::is_plain));
        let n = root.children.len() - keep;
        self.ready.extend(root.children.drain(..n));
    }
}

impl Iterator for TokenStream<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.is_cancelled() {
                self.done = true;
                self.ready.clear();
                return None;
            }
            if let Some(token) = self.ready.pop_front() {
                return Some(token);
            }
            if self.done {
                return None;
            }
            self.step();
            self.collect_ready();
        }
    }
}

impl std::fmt::Debug for TokenStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStream")
            .field("grammar", &self.grammar.name)
            .field("pos", &self.pos)
            .field("stack", &self.stack)
            .field("done", &self.done)
            .finish()
    }
}
