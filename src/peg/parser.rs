use super::{
    string_to_parsing_expression, GrammarError, MatchInfo, ParsingExpression, ParsingFailInfo,
    ParsingState, PegTokenizer, Rule, RuleCallback, RuleMap, WhitespacePolicy,
};

/// The rule registry and entry point of the PEG engine.
///
/// Rules are registered under a non-terminal name with a textual grammar
/// snippet; callbacks are attached separately. [PegParser::parse] interprets
/// the rule map starting at any registered rule.
#[derive(Default)]
pub struct PegParser {
    rules: RuleMap,
}

impl PegParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule. Registering the same non-terminal twice is an error.
    pub fn add_rule(&mut self, non_terminal: &str, expression: &str) -> Result<(), GrammarError> {
        let expression = string_to_parsing_expression(expression)?;
        if self.rules.contains_key(non_terminal) {
            return Err(GrammarError::new(
                non_terminal,
                "A rule already exists for this non-terminal",
            ));
        }
        self.rules.insert(
            non_terminal.to_string(),
            Rule {
                expression,
                callback: None,
            },
        );
        Ok(())
    }

    /// Attach the callback invoked on every successful match of the rule.
    pub fn set_callback(
        &mut self,
        non_terminal: &str,
        callback: RuleCallback,
    ) -> Result<(), GrammarError> {
        match self.rules.get_mut(non_terminal) {
            Some(rule) => {
                rule.callback = Some(callback);
                Ok(())
            }
            None => Err(GrammarError::new(
                non_terminal,
                "Can't attach a callback to an unregistered rule",
            )),
        }
    }

    /// Check that every non-terminal referenced from any rule expression is
    /// registered, so evaluation can't run into a dangling reference.
    pub fn validate(&self) -> Result<(), GrammarError> {
        fn walk(expr: &ParsingExpression, rules: &RuleMap) -> Result<(), GrammarError> {
            match expr {
                ParsingExpression::NonTerminal(name) => {
                    if !rules.contains_key(name) {
                        return Err(GrammarError::new(
                            name.clone(),
                            "Rule references an unregistered non-terminal",
                        ));
                    }
                    Ok(())
                }
                ParsingExpression::Sequence(children) | ParsingExpression::Choice(children) => {
                    children.iter().try_for_each(|c| walk(c, rules))
                }
                ParsingExpression::Optional(child)
                | ParsingExpression::ZeroOrMore(child)
                | ParsingExpression::OneOrMore(child)
                | ParsingExpression::And(child)
                | ParsingExpression::Not(child)
                | ParsingExpression::WhitespaceMode(child, _)
                | ParsingExpression::ErrorAnnotation(child, _) => walk(child, rules),
                ParsingExpression::Terminal { .. } => Ok(()),
            }
        }
        for rule in self.rules.values() {
            walk(&rule.expression, &self.rules)?;
        }
        Ok(())
    }

    /// Parse `code` starting at the rule named `start`.
    ///
    /// A successful match that leaves input unconsumed is reported as a
    /// failure with `eof = true`, carrying the best failure info seen during
    /// the otherwise successful parse so the unconsumed tail can be explained.
    pub fn parse(
        &self,
        start: &str,
        code: String,
    ) -> (Result<MatchInfo, ParsingFailInfo>, PegTokenizer) {
        let tokenizer = PegTokenizer::new(code);
        let start_expression = ParsingExpression::NonTerminal(start.to_string());
        let result = start_expression.match_expr(
            ParsingState::default(),
            WhitespacePolicy::Skip,
            &self.rules,
            &tokenizer,
        );
        let result = match result {
            Ok(success) => {
                if !tokenizer.is_empty(success.state) {
                    Err(ParsingFailInfo {
                        eof: true,
                        error: success.fail_info,
                    })
                } else {
                    Ok(success.match_info)
                }
            }
            Err(fail) => Err(ParsingFailInfo {
                eof: false,
                error: fail,
            }),
        };
        (result, tokenizer)
    }
}

#[cfg(test)]
mod __tests__ {
    use super::*;
    use crate::peg::errors_to_string;
    use crate::peg::AnyValue;
    use std::rc::Rc;

    #[test]
    fn expression_stringify() {
        let rule = ParsingExpression::Sequence(vec![
            Rc::new(ParsingExpression::literal("a")),
            Rc::new(ParsingExpression::Choice(vec![
                Rc::new(ParsingExpression::literal("c")),
                Rc::new(ParsingExpression::literal("d")),
            ])),
            Rc::new(ParsingExpression::literal("b")),
        ]);
        assert_eq!(rule.dump(), "'a' ('c' | 'd') 'b'");
    }

    #[test]
    fn expression_from_string_round_trips() {
        for source in [
            "'a' ('c' | 'd') 'b'",
            "('a')?",
            "('a' 'b')*",
            "('a')+ 'b'",
            "!'a' 'b'",
            "&'a' 'b'",
            "~nws~'a' ~snn~'b'",
            "'a' #Expected a#",
        ] {
            assert_eq!(
                string_to_parsing_expression(source).unwrap().dump(),
                source,
                "round trip failed for {}",
                source
            );
        }
    }

    #[test]
    fn grammar_errors() {
        assert!(string_to_parsing_expression("'abc").is_err());
        assert!(string_to_parsing_expression("('a' 'b'").is_err());
        assert!(string_to_parsing_expression("%").is_err());
        assert!(string_to_parsing_expression("").is_err());
    }

    #[test]
    fn chosen_alternative_is_first_success() {
        let mut parser = PegParser::new();
        parser.add_rule("Start", "'x' | 'ab' | 'a' | 'abc'").unwrap();
        let (result, _) = parser.parse("Start", "ab".to_string());
        let info = result.unwrap();
        // The rule match wraps the choice match.
        assert_eq!(info.subs[0].choice, Some(1));
    }

    #[test]
    fn choice_of_identical_children_behaves_like_child() {
        let mut single = PegParser::new();
        single.add_rule("Start", "'a' 'b'").unwrap();
        let mut multi = PegParser::new();
        multi.add_rule("Start", "('a' 'b') | ('a' 'b') | ('a' 'b')").unwrap();
        let (lhs, _) = single.parse("Start", "a b".to_string());
        let (rhs, _) = multi.parse("Start", "a b".to_string());
        let (lhs, rhs) = (lhs.unwrap(), rhs.unwrap());
        assert_eq!(lhs.start, rhs.start);
        assert_eq!(lhs.end, rhs.end);
    }

    #[test]
    fn optional_and_zero_or_more_always_succeed() {
        let mut parser = PegParser::new();
        parser.add_rule("Start", "('a')? ('b')* 'c'").unwrap();
        for source in ["c", "a c", "b b b c", "a b c"] {
            let (result, tokenizer) = parser.parse("Start", source.to_string());
            assert!(result.is_ok(), "'{}' should parse", source);
            assert!(tokenizer.is_empty(ParsingState {
                cursor: result.unwrap().end
            }));
        }
    }

    #[test]
    fn one_or_more_requires_a_match() {
        let mut parser = PegParser::new();
        parser.add_rule("Start", "('a')+").unwrap();
        let (result, _) = parser.parse("Start", "b".to_string());
        assert!(result.is_err());
    }

    #[test]
    fn predicates_consume_no_input() {
        let mut parser = PegParser::new();
        // The 'a' must still be consumable after the lookahead.
        parser.add_rule("Start", "&'a' 'a' !'b' 'c'").unwrap();
        let (result, _) = parser.parse("Start", "a c".to_string());
        assert!(result.is_ok());
        let (result, _) = parser.parse("Start", "a b".to_string());
        assert!(result.is_err());
    }

    #[test]
    fn callbacks_attach_results() {
        let mut parser = PegParser::new();
        parser.add_rule("Number", "[\\d]+").unwrap();
        parser
            .set_callback(
                "Number",
                Box::new(|info, tokenizer| {
                    AnyValue::new(info.text(tokenizer).parse::<i32>().unwrap())
                }),
            )
            .unwrap();
        let (result, _) = parser.parse("Number", " 423 ".to_string());
        let mut info = result.unwrap();
        assert_eq!(info.result.take::<i32>(), 423);
    }

    #[test]
    fn unconsumed_input_sets_eof() {
        let mut parser = PegParser::new();
        parser.add_rule("Start", "'a'").unwrap();
        let (result, tokenizer) = parser.parse("Start", "a b".to_string());
        let fail = result.err().unwrap();
        assert!(fail.eof);
        assert!(errors_to_string(&fail, &tokenizer).starts_with("Unexpected EOF"));
    }

    #[test]
    fn annotation_dominates_error_rendering() {
        let mut parser = PegParser::new();
        parser.add_rule("Start", "'a' ('b' #Expected b#)").unwrap();
        let (result, tokenizer) = parser.parse("Start", "a c".to_string());
        let fail = result.err().unwrap();
        let rendered = errors_to_string(&fail, &tokenizer);
        assert!(rendered.contains("Expected b"), "got: {}", rendered);
        // Rendering stops at the annotation; the wrapped terminal failure
        // below it never shows up.
        assert!(!rendered.contains("didn't match"), "got: {}", rendered);
    }

    #[test]
    fn validate_finds_dangling_references() {
        let mut parser = PegParser::new();
        parser.add_rule("Start", "Missing 'a'").unwrap();
        assert!(parser.validate().is_err());
        let mut parser = PegParser::new();
        parser.add_rule("Start", "Other 'a'").unwrap();
        parser.add_rule("Other", "'x'").unwrap();
        assert!(parser.validate().is_ok());
    }
}
