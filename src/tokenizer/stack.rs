use std::fmt;

use crate::grammars::{ROOT_RULE_ID, RuleId};
use crate::tokenizer::Token;

#[derive(Clone, Debug)]
pub struct StackFrame {
    /// Rule that opened this frame, the root rule for the bottom frame
    pub rule: RuleId,
    /// Where the composite token of this frame starts
    pub start: usize,
    /// Start of the text that hasn't been turned into tokens yet
    pub cursor: usize,
    /// Finished tokens inside this frame, in order
    pub children: Vec<Token>,
}

impl StackFrame {
    /// Appends a finished token, dropping empty ones
    pub fn push(&mut self, token: Token) {
        if !token.span.is_empty() {
            self.children.push(token);
        }
    }
}

/// The open begin/end rules, from the root to the innermost one.
#[derive(Clone)]
pub struct RuleStack {
    pub frames: Vec<StackFrame>,
}

impl RuleStack {
    pub fn new() -> Self {
        Self {
            frames: vec![StackFrame {
                rule: ROOT_RULE_ID,
                start: 0,
                cursor: 0,
                children: Vec::new(),
            }],
        }
    }

    /// Called when the begin pattern of a begin/end rule matches
    pub fn push(&mut self, rule: RuleId, start: usize) {
        self.frames.push(StackFrame {
            rule,
            start,
            cursor: start,
            children: Vec::new(),
        });
    }

    /// Exits the current frame, the root frame is never popped
    pub fn pop(&mut self) -> Option<StackFrame> {
        if self.frames.len() > 1 {
            self.frames.pop()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// The frame `depth` levels below the top, 0 being the top
    pub fn at_depth(&self, depth: usize) -> Option<&StackFrame> {
        self.frames.iter().rev().nth(depth)
    }

    /// Whether `rule` has a frame that was opened at `pos`
    pub fn is_open_at(&self, rule: RuleId, pos: usize) -> bool {
        self.frames.iter().any(|f| f.rule == rule && f.start == pos)
    }

    pub fn root_mut(&mut self) -> &mut StackFrame {
        &mut self.frames[0]
    }

    /// Access the top frame of the stack
    pub fn top(&self) -> &StackFrame {
        self.frames.last().expect("stack never empty")
    }

    /// Mutable access to the top frame of the stack
    pub fn top_mut(&mut self) -> &mut StackFrame {
        self.frames.last_mut().expect("stack never empty")
    }
}

impl fmt::Debug for RuleStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "RuleStack:")?;

        for (depth, frame) in self.frames.iter().enumerate() {
            let indent = "  ".repeat(depth);
            writeln!(
                f,
                "{}rule={}, start={}, cursor={}, children={}",
                indent,
                *frame.rule,
                frame.start,
                frame.cursor,
                frame.children.len()
            )?;
        }

        Ok(())
    }
}
