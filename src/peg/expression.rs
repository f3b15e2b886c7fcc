use super::{MatchInfo, ParsingState, PegTokenizer, RuleMap, WhitespacePolicy};
use once_cell::sync::Lazy;
use regex::Regex;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Why an expression failed to match, or [ExpressionFailReason::Success].
///
/// Successful expressions also produce a fail info node: when e.g. a
/// zero-or-more expression stops matching, the terminal failure must be kept
/// so that an unconsumed-input error can later explain why no more input was
/// accepted.
pub enum ExpressionFailReason {
    Success,
    SequenceChildFailed { consumed: String },
    ChoiceNoChildSucceeded,
    RequiredOneOrMore,
    UnmatchedString { expected: String, found: String },
    UnmatchedRegex { expected: String, found: String },
    PredicateNotSatisfied,
    AdditionalErrorMessage { message: String, found: String },
}

#[derive(Debug, Clone)]
/// A node of the (potential) error tree: the failing expression's dump, the
/// cursor where it failed, the reason and the children's failures.
pub struct ExpressionFailInfo {
    pub state: ParsingState,
    pub self_dump: String,
    pub reason: ExpressionFailReason,
    pub children: Vec<ExpressionFailInfo>,
}

impl ExpressionFailInfo {
    fn success(state: ParsingState, self_dump: String, children: Vec<ExpressionFailInfo>) -> Self {
        Self {
            state,
            self_dump,
            reason: ExpressionFailReason::Success,
            children,
        }
    }
    pub fn is_success(&self) -> bool {
        self.reason == ExpressionFailReason::Success
    }
    pub fn is_additional_error_message(&self) -> bool {
        matches!(
            self.reason,
            ExpressionFailReason::AdditionalErrorMessage { .. }
        )
    }
}

#[derive(Debug)]
/// A successful match: the advanced cursor, the match tree and the diagnostic
/// fail info collected along the way.
pub struct ExpressionSuccessInfo {
    pub state: ParsingState,
    pub match_info: MatchInfo,
    pub fail_info: ExpressionFailInfo,
}

pub type RuleResult = Result<ExpressionSuccessInfo, ExpressionFailInfo>;

/// A parsing expression, immutable after grammar compilation. Sub-expressions
/// are reference counted so the same subtree may appear in several rules.
pub enum ParsingExpression {
    /// A fixed string, or a left-anchored regex paired with its textual form.
    Terminal {
        representation: String,
        regex: Option<Regex>,
    },
    /// A by-name reference into the rule map.
    NonTerminal(String),
    Sequence(Vec<Rc<ParsingExpression>>),
    Choice(Vec<Rc<ParsingExpression>>),
    Optional(Rc<ParsingExpression>),
    ZeroOrMore(Rc<ParsingExpression>),
    OneOrMore(Rc<ParsingExpression>),
    /// Zero-width positive lookahead.
    And(Rc<ParsingExpression>),
    /// Zero-width negative lookahead.
    Not(Rc<ParsingExpression>),
    WhitespaceMode(Rc<ParsingExpression>, WhitespacePolicy),
    /// Transparent on success; wraps failures with a user-supplied message
    /// that dominates error rendering.
    ErrorAnnotation(Rc<ParsingExpression>, String),
}

impl ParsingExpression {
    pub fn literal(value: &str) -> Self {
        ParsingExpression::Terminal {
            representation: value.to_string(),
            regex: None,
        }
    }

    /// The grammar-syntax rendition of this expression; compiling the dump of
    /// an expression yields an equivalent expression again.
    pub fn dump(&self) -> String {
        match self {
            ParsingExpression::Terminal {
                representation,
                regex,
            } => {
                if regex.is_some() {
                    representation.clone()
                } else {
                    format!("'{}'", representation)
                }
            }
            ParsingExpression::NonTerminal(name) => name.clone(),
            ParsingExpression::Sequence(children) => children
                .iter()
                .map(|c| c.dump())
                .collect::<Vec<_>>()
                .join(" "),
            ParsingExpression::Choice(children) => {
                let inner = children
                    .iter()
                    .map(|c| c.dump())
                    .collect::<Vec<_>>()
                    .join(" | ");
                format!("({})", inner)
            }
            ParsingExpression::Optional(child) => format!("({})?", child.dump()),
            ParsingExpression::ZeroOrMore(child) => format!("({})*", child.dump()),
            ParsingExpression::OneOrMore(child) => format!("({})+", child.dump()),
            ParsingExpression::And(child) => format!("&{}", child.dump()),
            ParsingExpression::Not(child) => format!("!{}", child.dump()),
            ParsingExpression::WhitespaceMode(child, policy) => {
                let marker = match policy {
                    // The default policy dumps invisibly, so grammars
                    // round-trip without the implicit wrappers showing up.
                    WhitespacePolicy::Skip => "",
                    WhitespacePolicy::NoSkip => "~nws~",
                    WhitespacePolicy::ForceSkip => "~fws~",
                    WhitespacePolicy::SkipNoNewlines => "~snn~",
                };
                format!("{}{}", marker, child.dump())
            }
            ParsingExpression::ErrorAnnotation(child, message) => {
                format!("{} #{}#", child.dump(), message)
            }
        }
    }

    /// Evaluate this expression at `state` under the given whitespace policy.
    pub fn match_expr(
        &self,
        state: ParsingState,
        policy: WhitespacePolicy,
        rules: &RuleMap,
        tokenizer: &PegTokenizer,
    ) -> RuleResult {
        match self {
            ParsingExpression::Terminal {
                representation,
                regex,
            } => self.match_terminal(state, policy, tokenizer, representation, regex.as_ref()),
            ParsingExpression::NonTerminal(name) => {
                let rule = rules
                    .get(name)
                    .unwrap_or_else(|| panic!("No rule named '{}' is registered", name));
                let success = rule.expression.match_expr(state, policy, rules, tokenizer)?;
                let mut child_match = success.match_info;
                let result = match &rule.callback {
                    Some(callback) => callback(&mut child_match, tokenizer),
                    None => super::AnyValue::none(),
                };
                Ok(ExpressionSuccessInfo {
                    state: success.state,
                    match_info: MatchInfo {
                        start: child_match.start,
                        end: child_match.end,
                        choice: None,
                        result,
                        subs: vec![child_match],
                    },
                    fail_info: success.fail_info,
                })
            }
            ParsingExpression::Sequence(children) => {
                let start = state.cursor;
                let mut state = state;
                let mut children_results = Vec::new();
                let mut children_fail_reasons = Vec::new();
                for child in children {
                    match child.match_expr(state, policy, rules, tokenizer) {
                        Ok(success) => {
                            state = success.state;
                            children_results.push(success.match_info);
                            children_fail_reasons.push(success.fail_info);
                        }
                        Err(fail) => {
                            children_fail_reasons.push(fail);
                            return Err(ExpressionFailInfo {
                                state,
                                self_dump: self.dump(),
                                reason: ExpressionFailReason::SequenceChildFailed {
                                    consumed: tokenizer.slice(start, state.cursor).to_string(),
                                },
                                children: children_fail_reasons,
                            });
                        }
                    }
                }
                Ok(ExpressionSuccessInfo {
                    state,
                    match_info: MatchInfo::with_subs(start, state.cursor, children_results),
                    fail_info: ExpressionFailInfo::success(
                        state,
                        self.dump(),
                        children_fail_reasons,
                    ),
                })
            }
            ParsingExpression::Choice(children) => {
                let mut children_fail_reasons = Vec::new();
                for (index, child) in children.iter().enumerate() {
                    match child.match_expr(state, policy, rules, tokenizer) {
                        Ok(success) => {
                            let child_match = success.match_info;
                            return Ok(ExpressionSuccessInfo {
                                state: success.state,
                                match_info: MatchInfo {
                                    start: child_match.start,
                                    end: child_match.end,
                                    choice: Some(index),
                                    result: super::AnyValue::none(),
                                    subs: vec![child_match],
                                },
                                fail_info: ExpressionFailInfo::success(
                                    state,
                                    self.dump(),
                                    children_fail_reasons,
                                ),
                            });
                        }
                        Err(fail) => children_fail_reasons.push(fail),
                    }
                }
                Err(ExpressionFailInfo {
                    state,
                    self_dump: self.dump(),
                    reason: ExpressionFailReason::ChoiceNoChildSucceeded,
                    children: children_fail_reasons,
                })
            }
            ParsingExpression::Optional(child) => {
                match child.match_expr(state, policy, rules, tokenizer) {
                    Ok(success) => Ok(ExpressionSuccessInfo {
                        state: success.state,
                        match_info: MatchInfo::with_subs(
                            state.cursor,
                            success.state.cursor,
                            vec![success.match_info],
                        ),
                        fail_info: ExpressionFailInfo::success(
                            success.state,
                            self.dump(),
                            vec![success.fail_info],
                        ),
                    }),
                    Err(fail) => Ok(ExpressionSuccessInfo {
                        state,
                        match_info: MatchInfo::new(state.cursor, state.cursor),
                        fail_info: ExpressionFailInfo::success(state, self.dump(), vec![fail]),
                    }),
                }
            }
            ParsingExpression::ZeroOrMore(child) => {
                let start = state.cursor;
                let mut state = state;
                let mut children_results = Vec::new();
                let mut children_fail_reasons = Vec::new();
                loop {
                    match child.match_expr(state, policy, rules, tokenizer) {
                        Ok(success) => {
                            children_results.push(success.match_info);
                            children_fail_reasons.push(success.fail_info);
                            state = success.state;
                        }
                        Err(fail) => {
                            children_fail_reasons.push(fail);
                            break;
                        }
                    }
                }
                Ok(ExpressionSuccessInfo {
                    state,
                    match_info: MatchInfo::with_subs(start, state.cursor, children_results),
                    fail_info: ExpressionFailInfo::success(
                        state,
                        self.dump(),
                        children_fail_reasons,
                    ),
                })
            }
            ParsingExpression::OneOrMore(child) => {
                let start = state.cursor;
                let first = match child.match_expr(state, policy, rules, tokenizer) {
                    Ok(success) => success,
                    Err(fail) => {
                        return Err(ExpressionFailInfo {
                            state,
                            self_dump: self.dump(),
                            reason: ExpressionFailReason::RequiredOneOrMore,
                            children: vec![fail],
                        })
                    }
                };
                let mut state = first.state;
                let mut children_results = vec![first.match_info];
                let mut children_fail_reasons = vec![first.fail_info];
                loop {
                    match child.match_expr(state, policy, rules, tokenizer) {
                        Ok(success) => {
                            children_results.push(success.match_info);
                            children_fail_reasons.push(success.fail_info);
                            state = success.state;
                        }
                        Err(fail) => {
                            children_fail_reasons.push(fail);
                            break;
                        }
                    }
                }
                Ok(ExpressionSuccessInfo {
                    state,
                    match_info: MatchInfo::with_subs(start, state.cursor, children_results),
                    fail_info: ExpressionFailInfo::success(
                        state,
                        self.dump(),
                        children_fail_reasons,
                    ),
                })
            }
            ParsingExpression::And(child) => {
                match child.match_expr(state, policy, rules, tokenizer) {
                    Ok(success) => Ok(ExpressionSuccessInfo {
                        state,
                        match_info: MatchInfo::new(state.cursor, state.cursor),
                        fail_info: ExpressionFailInfo::success(
                            state,
                            self.dump(),
                            vec![success.fail_info],
                        ),
                    }),
                    Err(fail) => Err(ExpressionFailInfo {
                        state,
                        self_dump: self.dump(),
                        reason: ExpressionFailReason::PredicateNotSatisfied,
                        children: vec![fail],
                    }),
                }
            }
            ParsingExpression::Not(child) => {
                match child.match_expr(state, policy, rules, tokenizer) {
                    Ok(_) => Err(ExpressionFailInfo {
                        state,
                        self_dump: self.dump(),
                        reason: ExpressionFailReason::PredicateNotSatisfied,
                        children: Vec::new(),
                    }),
                    Err(fail) => Ok(ExpressionSuccessInfo {
                        state,
                        match_info: MatchInfo::new(state.cursor, state.cursor),
                        fail_info: ExpressionFailInfo::success(state, self.dump(), vec![fail]),
                    }),
                }
            }
            ParsingExpression::WhitespaceMode(child, mode) => {
                child.match_expr(state, *mode, rules, tokenizer)
            }
            ParsingExpression::ErrorAnnotation(child, message) => {
                match child.match_expr(state, policy, rules, tokenizer) {
                    Ok(success) => Ok(success),
                    Err(fail) => Err(ExpressionFailInfo {
                        state,
                        self_dump: child.dump(),
                        reason: ExpressionFailReason::AdditionalErrorMessage {
                            message: message.clone(),
                            found: failed_snippet(tokenizer, state),
                        },
                        children: vec![fail],
                    }),
                }
            }
        }
    }

    fn match_terminal(
        &self,
        state: ParsingState,
        policy: WhitespacePolicy,
        tokenizer: &PegTokenizer,
        representation: &str,
        regex: Option<&Regex>,
    ) -> RuleResult {
        let matched = match regex {
            Some(regex) => tokenizer.match_regex(state, policy, regex),
            None => tokenizer.match_string(state, policy, representation),
        };
        match matched {
            Some(new_state) => Ok(ExpressionSuccessInfo {
                state: new_state,
                match_info: MatchInfo::new(state.cursor, new_state.cursor),
                fail_info: ExpressionFailInfo::success(state, self.dump(), Vec::new()),
            }),
            None => {
                let found = failed_snippet(tokenizer, state);
                let expected = representation.to_string();
                Err(ExpressionFailInfo {
                    state,
                    self_dump: self.dump(),
                    reason: if regex.is_some() {
                        ExpressionFailReason::UnmatchedRegex { expected, found }
                    } else {
                        ExpressionFailReason::UnmatchedString { expected, found }
                    },
                    children: Vec::new(),
                })
            }
        }
    }
}

/// The source snippet from the cursor up to the next whitespace or the end of
/// input, used to show what the parser ran into.
fn failed_snippet(tokenizer: &PegTokenizer, state: ParsingState) -> String {
    static NON_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^\s]*").unwrap());
    let state = tokenizer.skip_whitespaces(state, WhitespacePolicy::Skip);
    NON_WHITESPACE
        .find(&tokenizer.code()[state.cursor..])
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}
