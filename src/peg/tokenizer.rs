use super::{ParsingState, WhitespacePolicy};
use crate::util::Position;
use once_cell::unsync::OnceCell;
use regex::Regex;

/// The tokenizer of the PEG engine: an immutable source buffer matched at a
/// caller-supplied cursor.
///
/// All operations are pure with respect to the tokenizer; the cursor travels
/// in [ParsingState] values, so any number of alternative parses can probe the
/// same buffer.
pub struct PegTokenizer {
    code: String,
    line_breaks: OnceCell<Vec<usize>>,
}

impl PegTokenizer {
    pub fn new(code: String) -> Self {
        Self {
            code,
            line_breaks: OnceCell::new(),
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn slice(&self, start: usize, end: usize) -> &str {
        &self.code[start..end]
    }

    /// Match a fixed string at the cursor, skipping leading whitespace
    /// according to `policy`. Returns the advanced cursor on success; on
    /// mismatch the cursor is unchanged and `None` is returned.
    ///
    /// Only leading whitespace is skipped. Trailing whitespace stays in the
    /// buffer so that a following terminal under a stricter policy (e.g. the
    /// newline separators of scope expressions) still sees it.
    pub fn match_string(
        &self,
        state: ParsingState,
        policy: WhitespacePolicy,
        string: &str,
    ) -> Option<ParsingState> {
        let mut state = self.skip_whitespaces(state, policy);
        if !self.code[state.cursor..].starts_with(string) {
            return None;
        }
        state.cursor += string.len();
        Some(state)
    }

    /// Match a left-anchored regex at the cursor; same contract as
    /// [PegTokenizer::match_string]. Patterns are expected to carry a leading
    /// `^` so they cannot match further into the buffer.
    pub fn match_regex(
        &self,
        state: ParsingState,
        policy: WhitespacePolicy,
        regex: &Regex,
    ) -> Option<ParsingState> {
        let mut state = self.skip_whitespaces(state, policy);
        let found = regex.find(&self.code[state.cursor..])?;
        if found.start() != 0 || found.end() == 0 {
            return None;
        }
        state.cursor += found.end();
        Some(state)
    }

    pub fn skip_whitespaces(
        &self,
        mut state: ParsingState,
        policy: WhitespacePolicy,
    ) -> ParsingState {
        let skippable: &[char] = match policy {
            WhitespacePolicy::Skip | WhitespacePolicy::ForceSkip => &[' ', '\t', '\n'],
            WhitespacePolicy::SkipNoNewlines => &[' ', '\t'],
            WhitespacePolicy::NoSkip => return state,
        };
        let rest = &self.code[state.cursor..];
        state.cursor += rest.len() - rest.trim_start_matches(skippable).len();
        state
    }

    /// Whether only whitespace is left beyond the cursor.
    pub fn is_empty(&self, state: ParsingState) -> bool {
        self.skip_whitespaces(state, WhitespacePolicy::Skip).cursor >= self.code.len()
    }

    /// The line and column of a byte offset, both 1-based. The line break
    /// table is built lazily on first use.
    pub fn position(&self, cursor: usize) -> Position {
        let line_breaks = self.line_breaks.get_or_init(|| {
            self.code
                .bytes()
                .enumerate()
                .filter_map(|(index, b)| if b == b'\n' { Some(index) } else { None })
                .collect()
        });
        let index = match line_breaks.binary_search(&cursor) {
            Ok(index) | Err(index) => index,
        };
        let line_start = if index == 0 {
            0
        } else {
            line_breaks[index - 1] + 1
        };
        let column = self.code[line_start..cursor].chars().count() + 1;
        Position::new(index + 1, column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(cursor: usize) -> ParsingState {
        ParsingState { cursor }
    }

    #[test]
    fn matches_strings() {
        let t = PegTokenizer::new("a b c def".to_string());
        let mut s = state(0);
        for expected in ["a", "b", "c"] {
            s = t.match_string(s, WhitespacePolicy::Skip, expected).unwrap();
        }
        assert!(!t.is_empty(s));
        assert!(t.match_string(s, WhitespacePolicy::Skip, "xy").is_none());
        let s = t.match_string(s, WhitespacePolicy::Skip, "de").unwrap();
        assert!(t.match_string(s, WhitespacePolicy::Skip, "de").is_none());
        let s = t.match_string(s, WhitespacePolicy::Skip, "f").unwrap();
        assert!(t.is_empty(s));
    }

    #[test]
    fn matches_regexes() {
        let t = PegTokenizer::new("a b c def".to_string());
        let s = t
            .match_regex(state(0), WhitespacePolicy::Skip, &Regex::new("^.").unwrap())
            .unwrap();
        let s = t.match_string(s, WhitespacePolicy::Skip, "b").unwrap();
        let s = t
            .match_regex(s, WhitespacePolicy::Skip, &Regex::new("^c").unwrap())
            .unwrap();
        assert!(t
            .match_regex(s, WhitespacePolicy::Skip, &Regex::new("^f").unwrap())
            .is_none());
    }

    #[test]
    fn whitespace_policies() {
        let t = PegTokenizer::new("a \n b".to_string());
        // NoSkip refuses to move over whitespace.
        let s = t.match_string(state(0), WhitespacePolicy::NoSkip, "a").unwrap();
        assert!(t.match_string(s, WhitespacePolicy::NoSkip, "b").is_none());
        // SkipNoNewlines stops at the line break.
        let skipped = t.skip_whitespaces(s, WhitespacePolicy::SkipNoNewlines);
        assert_eq!(t.code().as_bytes()[skipped.cursor], b'\n');
        // Skip and ForceSkip run straight through it.
        assert!(t.match_string(s, WhitespacePolicy::Skip, "b").is_some());
        assert!(t.match_string(s, WhitespacePolicy::ForceSkip, "b").is_some());
    }

    #[test]
    fn cursor_accounts_for_every_byte() {
        // The sum of matched lengths plus skipped whitespace equals the
        // final cursor.
        let source = "  fn  name \n ( )";
        let t = PegTokenizer::new(source.to_string());
        let mut s = state(0);
        for word in ["fn", "name", "(", ")"] {
            s = t.match_string(s, WhitespacePolicy::Skip, word).unwrap();
        }
        assert_eq!(s.cursor, source.len());
        assert!(t.is_empty(s));
    }

    #[test]
    fn reports_positions() {
        let t = PegTokenizer::new("ab\ncd\nef".to_string());
        assert_eq!(t.position(0), crate::util::Position::new(1, 1));
        assert_eq!(t.position(1), crate::util::Position::new(1, 2));
        assert_eq!(t.position(3), crate::util::Position::new(2, 1));
        assert_eq!(t.position(7), crate::util::Position::new(3, 2));
    }
}
