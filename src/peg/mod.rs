//! A generic Parsing Expression Grammar (PEG) engine.
//!
//! Grammars are held as data: every rule is a [ParsingExpression] tree built
//! either programmatically or from a textual grammar snippet via
//! [string_to_parsing_expression]. The [PegParser] interprets the rule map
//! against a [PegTokenizer] and yields a [MatchInfo] tree with per-node source
//! ranges and user callback results, or an [ExpressionFailInfo] tree
//! explaining hierarchically why the input did not parse.

mod error;
mod expression;
mod grammar;
mod parser;
mod tokenizer;

pub use error::errors_to_string;
pub use expression::{
    ExpressionFailInfo, ExpressionFailReason, ExpressionSuccessInfo, ParsingExpression, RuleResult,
};
pub use grammar::{string_to_parsing_expression, GrammarError};
pub use parser::PegParser;
pub use tokenizer::PegTokenizer;

use std::any::Any;
use std::collections::BTreeMap;
use std::ops::{Index, IndexMut};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// A cursor into the tokenized source. The tokenizer itself is stateless;
/// parses carry these values around instead.
pub struct ParsingState {
    pub cursor: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Whitespace handling around terminals for the enclosed expression subtree.
pub enum WhitespacePolicy {
    /// Skip spaces, tabs and newlines before and after each terminal.
    Skip,
    /// Do not skip anything.
    NoSkip,
    /// Skip even when an enclosing expression disabled skipping.
    ForceSkip,
    /// Skip spaces and tabs, but never newlines.
    SkipNoNewlines,
}

/// A move-only type-erased container for rule callback results.
///
/// Callbacks attach arbitrary host values to match nodes; consumers move them
/// back out with [AnyValue::take], which checks the type tag at runtime.
pub struct AnyValue(Option<Box<dyn Any>>);

impl AnyValue {
    pub fn none() -> Self {
        AnyValue(None)
    }
    pub fn new<T: 'static>(value: T) -> Self {
        AnyValue(Some(Box::new(value)))
    }
    pub fn is_some(&self) -> bool {
        self.0.is_some()
    }
    /// Move the contained value out. Panics if the container is empty or
    /// holds a different type; callbacks and their consumers are written in
    /// pairs, so a mismatch is a grammar implementation error.
    pub fn take<T: 'static>(&mut self) -> T {
        match self.0.take() {
            Some(boxed) => match boxed.downcast::<T>() {
                Ok(value) => *value,
                Err(_) => panic!(
                    "AnyValue holds a different type than the requested {}",
                    std::any::type_name::<T>()
                ),
            },
            None => panic!("AnyValue is empty"),
        }
    }
    /// Move the contained value out without inspecting its type, leaving the
    /// container empty.
    pub fn move_out(&mut self) -> AnyValue {
        AnyValue(self.0.take())
    }
}

impl std::fmt::Debug for AnyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Some(_) => write!(f, "AnyValue(..)"),
            None => write!(f, "AnyValue(None)"),
        }
    }
}

#[derive(Debug)]
/// One node of the match tree produced by a successful parse.
pub struct MatchInfo {
    /// Start of the matched half-open byte range, including leading whitespace.
    pub start: usize,
    /// End of the matched half-open byte range.
    pub end: usize,
    /// For [ParsingExpression::Choice] matches, the index of the alternative
    /// that succeeded.
    pub choice: Option<usize>,
    /// The value returned by the rule callback, if any.
    pub result: AnyValue,
    /// Child matches, mirroring the expression's structure.
    pub subs: Vec<MatchInfo>,
}

impl MatchInfo {
    pub(crate) fn new(start: usize, end: usize) -> Self {
        MatchInfo {
            start,
            end,
            choice: None,
            result: AnyValue::none(),
            subs: Vec::new(),
        }
    }
    pub(crate) fn with_subs(start: usize, end: usize, subs: Vec<MatchInfo>) -> Self {
        MatchInfo {
            start,
            end,
            choice: None,
            result: AnyValue::none(),
            subs,
        }
    }
    /// The matched source text with surrounding whitespace trimmed.
    pub fn text<'t>(&self, tokenizer: &'t PegTokenizer) -> &'t str {
        tokenizer.slice(self.start, self.end).trim()
    }
}

impl Index<usize> for MatchInfo {
    type Output = MatchInfo;
    fn index(&self, index: usize) -> &MatchInfo {
        &self.subs[index]
    }
}
impl IndexMut<usize> for MatchInfo {
    fn index_mut(&mut self, index: usize) -> &mut MatchInfo {
        &mut self.subs[index]
    }
}

/// A host callback attached to a rule; receives the rule's match tree and the
/// tokenizer (for source text access) and returns an opaque value stored on
/// the match node.
pub type RuleCallback = Box<dyn Fn(&mut MatchInfo, &PegTokenizer) -> AnyValue>;

/// A named grammar rule: a parsing expression plus an optional callback.
pub struct Rule {
    pub expression: Rc<ParsingExpression>,
    pub callback: Option<RuleCallback>,
}

/// The rule table of a grammar. Cross-rule references inside expressions are
/// held by name and looked up here at evaluation time, which keeps mutually
/// recursive rule graphs representable without reference cycles.
pub type RuleMap = BTreeMap<String, Rule>;

#[derive(Debug)]
/// The overall outcome of a failed parse.
pub struct ParsingFailInfo {
    /// True if the start rule matched but input was left unconsumed.
    pub eof: bool,
    /// The best failure information available.
    pub error: ExpressionFailInfo,
}
