use super::{ParsingExpression, WhitespacePolicy};
use regex::Regex;
use std::fmt::{Display, Formatter};
use std::rc::Rc;

#[derive(Debug)]
/// An error raised while compiling a textual grammar snippet into a
/// [ParsingExpression] tree. Grammars are written by the host program, so
/// these abort grammar loading instead of being recoverable.
pub struct GrammarError {
    what: String,
    message: String,
}

impl GrammarError {
    pub fn new(what: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            what: what.into(),
            message: message.into(),
        }
    }
}

impl Display for GrammarError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "GrammarError: {} - {}", self.what, self.message)
    }
}

/// Compile a grammar snippet such as
/// `"'fn' Identifier '(' ParameterList ')' '->' Datatype ScopeExpression"`
/// into a parsing expression.
///
/// Token shapes: single-quoted literals, bracketed regex classes, bare
/// identifiers (non-terminal references), parenthesised groups, infix `|`,
/// postfix `? * +`, prefix `! &`, whitespace markers `~sws~ ~nws~ ~fws~ ~snn~`
/// and `#message#` error annotations. Precedence from tightest to loosest:
/// atom, whitespace attribute, prefix predicate, quantifier, error
/// annotation, sequence, choice.
pub fn string_to_parsing_expression(
    expression: &str,
) -> Result<Rc<ParsingExpression>, GrammarError> {
    let mut tokenizer = ExpressionTokenizer::new(expression)?;
    let parsed = parse_choice(&mut tokenizer)?;
    match parsed {
        Some(expr) => Ok(expr),
        None => Err(GrammarError::new(expression, "Empty grammar expression")),
    }
}

fn parse_atom(
    tok: &mut ExpressionTokenizer,
) -> Result<Option<Rc<ParsingExpression>>, GrammarError> {
    let token = match tok.current_token() {
        Some(token) => token.to_string(),
        None => return Ok(None),
    };
    let first = token.chars().next().unwrap_or('\0');
    if first == '\'' {
        let expr = Rc::new(ParsingExpression::literal(&token[1..token.len() - 1]));
        tok.advance()?;
        return Ok(Some(expr));
    }
    if token == "(" {
        tok.advance()?;
        let expr = parse_choice(tok)?;
        match tok.current_token() {
            None => return Err(GrammarError::new(tok.source(), "Missing closing bracket")),
            Some(")") => {}
            Some(other) => {
                return Err(GrammarError::new(
                    other,
                    "Expected a closing bracket, not this token",
                ))
            }
        }
        tok.advance()?;
        return Ok(expr);
    }
    if first.is_alphanumeric() {
        let expr = Rc::new(ParsingExpression::NonTerminal(token));
        tok.advance()?;
        return Ok(Some(expr));
    }
    if first == '[' {
        let regex = Regex::new(&format!("^{}", token))
            .map_err(|err| GrammarError::new(token.as_str(), format!("Invalid regex: {}", err)))?;
        let expr = Rc::new(ParsingExpression::Terminal {
            representation: token,
            regex: Some(regex),
        });
        tok.advance()?;
        return Ok(Some(expr));
    }
    Err(GrammarError::new(token, "Invalid atomic token"))
}

fn parse_attribute(
    tok: &mut ExpressionTokenizer,
) -> Result<Option<Rc<ParsingExpression>>, GrammarError> {
    let policy = match tok.current_token() {
        Some("~sws~") => Some(WhitespacePolicy::Skip),
        Some("~nws~") => Some(WhitespacePolicy::NoSkip),
        Some("~fws~") => Some(WhitespacePolicy::ForceSkip),
        Some("~snn~") => Some(WhitespacePolicy::SkipNoNewlines),
        _ => None,
    };
    match policy {
        Some(policy) => {
            tok.advance()?;
            match parse_atom(tok)? {
                Some(child) => Ok(Some(Rc::new(ParsingExpression::WhitespaceMode(
                    child, policy,
                )))),
                None => Err(GrammarError::new(
                    tok.source(),
                    "A whitespace marker needs an expression to attach to",
                )),
            }
        }
        // Unmarked atoms get the default skipping policy. This makes every
        // marker local to the atom it precedes: whatever the surrounding
        // expression does, the next atom starts skipping again.
        None => Ok(parse_atom(tok)?.map(|child| {
            Rc::new(ParsingExpression::WhitespaceMode(
                child,
                WhitespacePolicy::Skip,
            ))
        })),
    }
}

fn parse_prefix(
    tok: &mut ExpressionTokenizer,
) -> Result<Option<Rc<ParsingExpression>>, GrammarError> {
    let wrap: Option<fn(Rc<ParsingExpression>) -> ParsingExpression> = match tok.current_token() {
        Some("!") => Some(ParsingExpression::Not),
        Some("&") => Some(ParsingExpression::And),
        _ => None,
    };
    match wrap {
        Some(wrap) => {
            tok.advance()?;
            match parse_attribute(tok)? {
                Some(child) => Ok(Some(Rc::new(wrap(child)))),
                None => Err(GrammarError::new(
                    tok.source(),
                    "A predicate needs an expression to attach to",
                )),
            }
        }
        None => parse_attribute(tok),
    }
}

fn parse_quantifier(
    tok: &mut ExpressionTokenizer,
) -> Result<Option<Rc<ParsingExpression>>, GrammarError> {
    let child = match parse_prefix(tok)? {
        Some(child) => child,
        None => return Ok(None),
    };
    let wrap: Option<fn(Rc<ParsingExpression>) -> ParsingExpression> = match tok.current_token() {
        Some("?") => Some(ParsingExpression::Optional),
        Some("*") => Some(ParsingExpression::ZeroOrMore),
        Some("+") => Some(ParsingExpression::OneOrMore),
        _ => None,
    };
    match wrap {
        Some(wrap) => {
            tok.advance()?;
            Ok(Some(Rc::new(wrap(child))))
        }
        None => Ok(Some(child)),
    }
}

fn parse_error_info(
    tok: &mut ExpressionTokenizer,
) -> Result<Option<Rc<ParsingExpression>>, GrammarError> {
    let child = match parse_quantifier(tok)? {
        Some(child) => child,
        None => return Ok(None),
    };
    if let Some(token) = tok.current_token() {
        if token.starts_with('#') {
            let message = token[1..token.len() - 1].to_string();
            tok.advance()?;
            return Ok(Some(Rc::new(ParsingExpression::ErrorAnnotation(
                child, message,
            ))));
        }
    }
    Ok(Some(child))
}

fn parse_sequence(
    tok: &mut ExpressionTokenizer,
) -> Result<Option<Rc<ParsingExpression>>, GrammarError> {
    let left = match parse_error_info(tok)? {
        Some(left) => left,
        None => return Ok(None),
    };
    let mut children = vec![left];
    while let Some(token) = tok.current_token() {
        if token == "|" || token == ")" {
            break;
        }
        match parse_error_info(tok)? {
            Some(next) => children.push(next),
            None => break,
        }
    }
    if children.len() == 1 {
        return Ok(children.pop());
    }
    Ok(Some(Rc::new(ParsingExpression::Sequence(children))))
}

fn parse_choice(
    tok: &mut ExpressionTokenizer,
) -> Result<Option<Rc<ParsingExpression>>, GrammarError> {
    let left = match parse_sequence(tok)? {
        Some(left) => left,
        None => return Ok(None),
    };
    let mut children = vec![left];
    while tok.current_token() == Some("|") {
        tok.advance()?;
        match parse_sequence(tok)? {
            Some(next) => children.push(next),
            None => return Err(GrammarError::new(tok.source(), "Choice without alternative")),
        }
    }
    if children.len() == 1 {
        return Ok(children.pop());
    }
    Ok(Some(Rc::new(ParsingExpression::Choice(children))))
}

/// Splits a grammar snippet into expression tokens, one ahead of the parser.
struct ExpressionTokenizer<'e> {
    source: &'e str,
    offset: usize,
    current_token: Option<String>,
}

impl<'e> ExpressionTokenizer<'e> {
    fn new(source: &'e str) -> Result<Self, GrammarError> {
        let mut tokenizer = Self {
            source,
            offset: 0,
            current_token: None,
        };
        tokenizer.gen_next_token()?;
        Ok(tokenizer)
    }

    fn source(&self) -> &str {
        self.source
    }

    fn current_token(&self) -> Option<&str> {
        self.current_token.as_deref()
    }

    fn advance(&mut self) -> Result<(), GrammarError> {
        self.gen_next_token()
    }

    fn gen_next_token(&mut self) -> Result<(), GrammarError> {
        self.skip_whitespaces();
        let Some(current) = self.current_char() else {
            self.current_token = None;
            return Ok(());
        };
        self.current_token = Some(match current {
            '\'' => self.consume_string('\'', '\'')?,
            '[' => self.consume_string('[', ']')?,
            '#' => self.consume_string('#', '#')?,
            '~' => self.consume_string('~', '~')?,
            '+' | '*' | ')' | '(' | '|' | '/' | '?' | '!' | '&' => {
                self.offset += current.len_utf8();
                current.to_string()
            }
            c if c.is_alphanumeric() => {
                let start = self.offset;
                self.consume_non_terminal();
                self.source[start..self.offset].to_string()
            }
            c => return Err(GrammarError::new(c.to_string(), "Invalid input char")),
        });
        Ok(())
    }

    fn consume_non_terminal(&mut self) {
        while let Some(c) = self.current_char() {
            if !c.is_alphanumeric() && c != '_' {
                break;
            }
            self.offset += c.len_utf8();
        }
    }

    fn consume_string(&mut self, start: char, end: char) -> Result<String, GrammarError> {
        let mut ret = String::new();
        ret.push(start);
        self.offset += start.len_utf8();
        loop {
            let Some(current) = self.current_char() else {
                return Err(GrammarError::new(
                    self.source,
                    "Unterminated string in expression",
                ));
            };
            if current == '\\' {
                if let Some(next) = self.next_char() {
                    if next == end || next == '\\' {
                        self.offset += current.len_utf8() + next.len_utf8();
                        ret.push(next);
                        continue;
                    }
                }
            }
            self.offset += current.len_utf8();
            ret.push(current);
            if current == end {
                return Ok(ret);
            }
        }
    }

    fn current_char(&self) -> Option<char> {
        self.source[self.offset..].chars().next()
    }

    fn next_char(&self) -> Option<char> {
        self.source[self.offset..].chars().nth(1)
    }

    fn skip_whitespaces(&mut self) {
        while let Some(c) = self.current_char() {
            if c != ' ' && c != '\t' && c != '\n' {
                break;
            }
            self.offset += c.len_utf8();
        }
    }
}
