use super::{ExpressionFailInfo, ExpressionFailReason, ParsingFailInfo, PegTokenizer};
use colored::Colorize;

/// A tree mirroring the failed expression structure, built from the
/// [ExpressionFailInfo] chain for rendering.
struct ErrorTree<'f> {
    source_node: &'f ExpressionFailInfo,
    children: Vec<ErrorTree<'f>>,
}

fn create_error_tree(info: &ExpressionFailInfo) -> ErrorTree<'_> {
    ErrorTree {
        source_node: info,
        children: info.children.iter().map(create_error_tree).collect(),
    }
}

impl<'f> ErrorTree<'f> {
    fn dump(&self, tokenizer: &PegTokenizer, depth: usize, out: &mut String) {
        out.push_str(&" ".repeat(depth));
        out.push_str(&dump_fail_info(self.source_node, tokenizer));
        out.push('\n');
        // A user-supplied message is the best explanation available; the
        // machinery below it would only repeat it less clearly.
        if self.source_node.is_additional_error_message() {
            return;
        }
        for child in &self.children {
            child.dump(tokenizer, depth + 1, out);
        }
    }
}

fn dump_fail_info(info: &ExpressionFailInfo, tokenizer: &PegTokenizer) -> String {
    let position = tokenizer.position(info.state.cursor);
    let header = format!("{}: {} - ", position, info.self_dump);
    let body = match &info.reason {
        ExpressionFailReason::Success => "Success!".to_string(),
        ExpressionFailReason::SequenceChildFailed { consumed } => format!(
            "Needed to parse more children - already parsed: '{}'. Children failure info:",
            consumed.trim()
        ),
        ExpressionFailReason::ChoiceNoChildSucceeded => {
            "No possible choice matched. The options were (in order):".to_string()
        }
        ExpressionFailReason::RequiredOneOrMore => {
            "We need to match one or more of the following, but not even one succeeded:"
                .to_string()
        }
        ExpressionFailReason::UnmatchedString { expected, found } => {
            format!("The string '{}' didn't match '{}'", expected, found)
        }
        ExpressionFailReason::UnmatchedRegex { expected, found } => {
            format!("The regex '{}' didn't match '{}'", expected, found)
        }
        ExpressionFailReason::PredicateNotSatisfied => {
            "The lookahead predicate wasn't satisfied here".to_string()
        }
        ExpressionFailReason::AdditionalErrorMessage { message, found } => {
            format!("{}, got: '{}'", message, found)
        }
    };
    let line = format!("{}{}", header, body);
    match &info.reason {
        ExpressionFailReason::SequenceChildFailed { .. } => line.as_str().cyan().to_string(),
        ExpressionFailReason::ChoiceNoChildSucceeded => line.as_str().blue().to_string(),
        ExpressionFailReason::AdditionalErrorMessage { .. } => line.as_str().red().to_string(),
        _ => line,
    }
}

/// Render a parse failure as an indented, colour-annotated tree; the
/// indentation depth of every line equals its depth in the failure structure.
pub fn errors_to_string(info: &ParsingFailInfo, tokenizer: &PegTokenizer) -> String {
    let tree = create_error_tree(&info.error);
    let mut ret = String::new();
    if info.eof {
        ret.push_str("Unexpected EOF\n");
    }
    tree.dump(tokenizer, 0, &mut ret);
    ret
}
