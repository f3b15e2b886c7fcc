use crate::datatype::Datatype;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// How a value ended up on the stack. Parameters and locals carry names;
/// everything the compiler pushes for its own purposes (callee references,
/// arguments under construction, list elements) is implicitly copied.
pub enum StorageType {
    Local,
    Parameter,
    ImplicitlyCopied,
}

#[derive(Debug, Clone)]
pub struct VariableEntry {
    pub name: Option<String>,
    pub datatype: Datatype,
    pub storage: StorageType,
}

#[derive(Debug, Clone)]
struct Node {
    /// The value described by this node exists from this instruction pointer
    /// onwards (until a later pop marker at the same level).
    start_ip: i32,
    /// The function-relative stack height in bytes right after this value was
    /// pushed; the value occupies the bytes directly below it.
    stack_size: i32,
    variable: Option<VariableEntry>,
    /// A pop marker records that everything recorded earlier at the same
    /// level has been removed from the stack by this ip.
    is_pop_marker: bool,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// Per-function metadata recorded by the compiler, mapping instruction
/// pointers to the set of live, typed values on the stack. This is the
/// garbage collector's only source of type information for its roots.
///
/// The tree mirrors the expression structure: compound expressions open a
/// subtree for their operands and seal it with a pop marker once the
/// operands are consumed; their result is then recorded one level up.
#[derive(Debug, Clone)]
pub struct StackInformationTree {
    nodes: Vec<Node>,
}

impl StackInformationTree {
    pub fn new(start_ip: i32) -> Self {
        Self {
            nodes: vec![Node {
                start_ip,
                stack_size: 0,
                variable: None,
                is_pop_marker: false,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    pub fn root(&self) -> usize {
        0
    }

    pub fn parent_of(&self, node: usize) -> Option<usize> {
        self.nodes[node].parent
    }

    /// Add a child under `parent` and return its id. Children must be added
    /// in nondecreasing `start_ip` order; the lookup relies on it.
    pub fn add_child(
        &mut self,
        parent: usize,
        start_ip: i32,
        stack_size: i32,
        variable: Option<VariableEntry>,
        is_pop_marker: bool,
    ) -> usize {
        debug_assert!(self
            .nodes[parent]
            .children
            .last()
            .map_or(true, |&last| self.nodes[last].start_ip <= start_ip));
        let id = self.nodes.len();
        self.nodes.push(Node {
            start_ip,
            stack_size,
            variable,
            is_pop_marker,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent].children.push(id);
        id
    }

    /// The deepest, latest node whose `start_ip` does not exceed `ip`.
    fn best_node_for_ip(&self, ip: i32) -> usize {
        let mut current = self.root();
        loop {
            let next = self.nodes[current]
                .children
                .iter()
                .rev()
                .find(|&&child| self.nodes[child].start_ip <= ip);
            match next {
                Some(&child) => current = child,
                None => return current,
            }
        }
    }

    /// The function-relative stack height at `ip`.
    pub fn stack_size_at(&self, ip: i32) -> i32 {
        self.nodes[self.best_node_for_ip(ip)].stack_size
    }

    /// Every value live at `ip`, as pairs of (stack height after the value,
    /// entry). Walks from the best node backwards through previous siblings
    /// and up through parents; a pop marker cuts off everything recorded
    /// before it at its level.
    pub fn live_entries_at(&self, ip: i32) -> Vec<(i32, &VariableEntry)> {
        let mut entries = Vec::new();
        let mut current = self.best_node_for_ip(ip);
        loop {
            let node = &self.nodes[current];
            if node.is_pop_marker {
                // Everything recorded before this marker at this level has
                // been popped; resume one level up.
                match node.parent {
                    Some(parent) => current = parent,
                    None => break,
                }
                continue;
            }
            if let Some(variable) = &node.variable {
                entries.push((node.stack_size, variable));
            }
            current = match self.previous_sibling(current) {
                Some(previous) => previous,
                None => match node.parent {
                    Some(parent) => parent,
                    None => break,
                },
            };
        }
        entries
    }

    fn previous_sibling(&self, node: usize) -> Option<usize> {
        let parent = self.nodes[node].parent?;
        let siblings = &self.nodes[parent].children;
        let index = siblings.iter().position(|&child| child == node)?;
        index.checked_sub(1).map(|i| siblings[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, datatype: Datatype) -> Option<VariableEntry> {
        Some(VariableEntry {
            name: Some(name.to_string()),
            datatype,
            storage: StorageType::Local,
        })
    }

    #[test]
    fn finds_live_variables_per_ip() {
        let mut tree = StackInformationTree::new(0);
        let root = tree.root();
        tree.add_child(root, 0, 8, entry("a", Datatype::I32), false);
        let scope = tree.add_child(root, 9, 8, None, false);
        tree.add_child(scope, 18, 16, entry("b", Datatype::I32), false);
        tree.add_child(scope, 30, 8, None, true); // scope popped b
        tree.add_child(root, 30, 16, entry("r", Datatype::I32), false);

        // Inside the scope both a and b are live.
        let live: Vec<_> = tree
            .live_entries_at(20)
            .iter()
            .map(|(_, e)| e.name.clone().unwrap())
            .collect();
        assert_eq!(live, vec!["b", "a"]);

        // After the scope, b is gone and the scope result is live.
        let live: Vec<_> = tree
            .live_entries_at(31)
            .iter()
            .map(|(_, e)| e.name.clone().unwrap())
            .collect();
        assert_eq!(live, vec!["r", "a"]);

        assert_eq!(tree.stack_size_at(20), 16);
        assert_eq!(tree.stack_size_at(31), 16);
    }

    #[test]
    fn pop_marker_within_a_construct_hides_operands() {
        let mut tree = StackInformationTree::new(0);
        let root = tree.root();
        let call = tree.add_child(root, 0, 0, None, false);
        tree.add_child(call, 9, 8, entry("callee", Datatype::I32), false);
        tree.add_child(call, 18, 16, entry("arg", Datatype::I32), false);
        tree.add_child(call, 23, 8, None, true); // the call consumed both
        tree.add_child(root, 23, 8, entry("result", Datatype::I32), false);

        // While the arguments are being pushed they're visible.
        let live: Vec<_> = tree
            .live_entries_at(18)
            .iter()
            .map(|(_, e)| e.name.clone().unwrap())
            .collect();
        assert_eq!(live, vec!["arg", "callee"]);

        // After the call only the result remains.
        let live: Vec<_> = tree
            .live_entries_at(40)
            .iter()
            .map(|(_, e)| e.name.clone().unwrap())
            .collect();
        assert_eq!(live, vec!["result"]);
    }
}
