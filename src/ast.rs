use crate::datatype::Datatype;
use crate::util::Position;
use ptree::TreeItem;
use std::borrow::Cow;

#[derive(Debug, Clone, Copy, Default)]
/// The source range a node was parsed from, plus the line and column of its
/// first byte.
pub struct SourceCodeRef {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

impl SourceCodeRef {
    pub fn position(&self) -> Position {
        Position::new(self.line, self.column)
    }
}

#[derive(Debug, Clone)]
/// All declarations of one source file.
pub struct ModuleRootNode {
    pub source: SourceCodeRef,
    pub name: String,
    pub declarations: Vec<FunctionDeclarationNode>,
}

#[derive(Debug, Clone)]
pub struct FunctionDeclarationNode {
    pub source: SourceCodeRef,
    pub name: IdentifierNode,
    pub parameters: Vec<Parameter>,
    pub return_type: Datatype,
    pub body: ScopeNode,
}

#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: IdentifierNode,
    pub datatype: Datatype,
}

#[derive(Debug, Clone)]
/// A (possibly module-qualified) name. Type completion fills in the resolved
/// datatype and declaration id.
pub struct IdentifierNode {
    pub source: SourceCodeRef,
    pub name: Vec<String>,
    pub resolved: Option<(Datatype, i32)>,
}

impl IdentifierNode {
    pub fn joined_name(&self) -> String {
        self.name.join(".")
    }
    pub fn datatype(&self) -> Option<Datatype> {
        self.resolved.as_ref().map(|(datatype, _)| datatype.clone())
    }
    pub fn id(&self) -> Option<i32> {
        self.resolved.as_ref().map(|(_, id)| *id)
    }
}

#[derive(Debug, Clone)]
pub struct ScopeNode {
    pub source: SourceCodeRef,
    pub expressions: Vec<ExpressionNode>,
}

impl ScopeNode {
    /// A scope evaluates to its last expression; an empty scope is the empty
    /// tuple.
    pub fn datatype(&self) -> Option<Datatype> {
        match self.expressions.last() {
            Some(last) => last.datatype(),
            None => Some(Datatype::empty_tuple()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Plus,
    Minus,
    Multiply,
    Divide,
    LogicalAnd,
    LogicalOr,
    LogicalEquals,
    LogicalNotEquals,
    ComparisonLessThan,
    ComparisonLessEqualThan,
    ComparisonMoreThan,
    ComparisonMoreEqualThan,
}

impl BinaryOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOperator::Plus => "+",
            BinaryOperator::Minus => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::LogicalAnd => "&&",
            BinaryOperator::LogicalOr => "||",
            BinaryOperator::LogicalEquals => "==",
            BinaryOperator::LogicalNotEquals => "!=",
            BinaryOperator::ComparisonLessThan => "<",
            BinaryOperator::ComparisonLessEqualThan => "<=",
            BinaryOperator::ComparisonMoreThan => ">",
            BinaryOperator::ComparisonMoreEqualThan => ">=",
        }
    }
    /// Operators whose result is a bool regardless of operand type.
    pub fn yields_bool(&self) -> bool {
        !matches!(
            self,
            BinaryOperator::Plus
                | BinaryOperator::Minus
                | BinaryOperator::Multiply
                | BinaryOperator::Divide
        )
    }
    /// Operators that require bool operands.
    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOperator::LogicalAnd | BinaryOperator::LogicalOr)
    }
}

#[derive(Debug, Clone)]
pub struct LiteralInt32Node {
    pub source: SourceCodeRef,
    pub value: i32,
}

#[derive(Debug, Clone)]
pub struct BinaryExpressionNode {
    pub source: SourceCodeRef,
    pub left: ExpressionNode,
    pub operator: BinaryOperator,
    pub right: ExpressionNode,
}

#[derive(Debug, Clone)]
/// `x = e`; binds a new name in the enclosing scope.
pub struct AssignmentExpression {
    pub source: SourceCodeRef,
    pub left: IdentifierNode,
    pub right: ExpressionNode,
}

#[derive(Debug, Clone)]
/// The if/else-if/else chain; each arm is a condition and its scope.
pub struct IfExpressionNode {
    pub source: SourceCodeRef,
    pub children: Vec<(ExpressionNode, ScopeNode)>,
    pub else_body: Option<ScopeNode>,
}

#[derive(Debug, Clone)]
pub struct FunctionCallExpressionNode {
    pub source: SourceCodeRef,
    pub name: ExpressionNode,
    pub params: Vec<ExpressionNode>,
}

#[derive(Debug, Clone)]
pub struct TupleCreationNode {
    pub source: SourceCodeRef,
    pub params: Vec<ExpressionNode>,
}

#[derive(Debug, Clone)]
/// `[a, b]` or the typed empty list `[:T]`.
pub struct ListCreationNode {
    pub source: SourceCodeRef,
    pub base_type: Option<Datatype>,
    pub params: Vec<ExpressionNode>,
}

#[derive(Debug, Clone)]
pub enum ExpressionNode {
    LiteralInt32(LiteralInt32Node),
    Identifier(IdentifierNode),
    Binary(Box<BinaryExpressionNode>),
    Assignment(Box<AssignmentExpression>),
    Scope(ScopeNode),
    If(Box<IfExpressionNode>),
    FunctionCall(Box<FunctionCallExpressionNode>),
    TupleCreation(TupleCreationNode),
    ListCreation(ListCreationNode),
}

impl ExpressionNode {
    pub fn source(&self) -> SourceCodeRef {
        match self {
            ExpressionNode::LiteralInt32(node) => node.source,
            ExpressionNode::Identifier(node) => node.source,
            ExpressionNode::Binary(node) => node.source,
            ExpressionNode::Assignment(node) => node.source,
            ExpressionNode::Scope(node) => node.source,
            ExpressionNode::If(node) => node.source,
            ExpressionNode::FunctionCall(node) => node.source,
            ExpressionNode::TupleCreation(node) => node.source,
            ExpressionNode::ListCreation(node) => node.source,
        }
    }

    /// The expression's type, if completion has determined it yet.
    pub fn datatype(&self) -> Option<Datatype> {
        match self {
            ExpressionNode::LiteralInt32(_) => Some(Datatype::I32),
            ExpressionNode::Identifier(node) => node.datatype(),
            ExpressionNode::Binary(node) => {
                if node.operator.yields_bool() {
                    Some(Datatype::Bool)
                } else {
                    node.left.datatype()
                }
            }
            ExpressionNode::Assignment(node) => node.right.datatype(),
            ExpressionNode::Scope(node) => node.datatype(),
            ExpressionNode::If(node) => node.children.first()?.1.datatype(),
            ExpressionNode::FunctionCall(node) => {
                let (return_type, _) = match node.name.datatype()? {
                    Datatype::Function(return_type, params) => (return_type, params),
                    _ => return None,
                };
                Some(*return_type)
            }
            ExpressionNode::TupleCreation(node) => {
                let types: Option<Vec<Datatype>> =
                    node.params.iter().map(|p| p.datatype()).collect();
                Some(Datatype::Tuple(types?))
            }
            ExpressionNode::ListCreation(node) => {
                node.base_type.clone().map(Datatype::list)
            }
        }
    }
}

#[derive(Debug, Clone)]
/// A printable snapshot of an AST subtree, rendered through `ptree`.
pub struct DumpTree {
    label: String,
    children: Vec<DumpTree>,
}

impl TreeItem for DumpTree {
    type Child = Self;
    fn write_self<W: std::io::Write>(&self, f: &mut W, _: &ptree::Style) -> std::io::Result<()> {
        write!(f, "{}", self.label)
    }
    fn children(&self) -> Cow<[Self::Child]> {
        Cow::from(&self.children)
    }
}

impl DumpTree {
    fn new(label: String, children: Vec<DumpTree>) -> Self {
        Self { label, children }
    }
    pub fn render(&self) -> String {
        let mut out = Vec::new();
        ptree::write_tree(self, &mut out).expect("writing to a Vec can't fail");
        String::from_utf8_lossy(&out).into_owned()
    }
}

impl ModuleRootNode {
    pub fn dump_tree(&self) -> DumpTree {
        DumpTree::new(
            format!("Module {}", self.name),
            self.declarations.iter().map(|d| d.dump_tree()).collect(),
        )
    }
    pub fn print(&self) -> std::io::Result<()> {
        ptree::print_tree(&self.dump_tree())
    }
}

impl FunctionDeclarationNode {
    pub fn dump_tree(&self) -> DumpTree {
        let mut children = Vec::new();
        for param in &self.parameters {
            children.push(DumpTree::new(
                format!("Param {}: {}", param.name.joined_name(), param.datatype),
                Vec::new(),
            ));
        }
        children.push(self.body.dump_tree());
        DumpTree::new(
            format!(
                "FunctionDeclaration {} -> {}",
                self.name.joined_name(),
                self.return_type
            ),
            children,
        )
    }
}

impl ScopeNode {
    pub fn dump_tree(&self) -> DumpTree {
        DumpTree::new(
            "Scope".to_string(),
            self.expressions.iter().map(|e| e.dump_tree()).collect(),
        )
    }
}

impl ExpressionNode {
    pub fn dump_tree(&self) -> DumpTree {
        match self {
            ExpressionNode::LiteralInt32(node) => {
                DumpTree::new(format!("Literal {}", node.value), Vec::new())
            }
            ExpressionNode::Identifier(node) => DumpTree::new(
                match &node.resolved {
                    Some((datatype, id)) => {
                        format!("Identifier {}: {} #{}", node.joined_name(), datatype, id)
                    }
                    None => format!("Identifier {}", node.joined_name()),
                },
                Vec::new(),
            ),
            ExpressionNode::Binary(node) => DumpTree::new(
                format!("Binary {}", node.operator.symbol()),
                vec![node.left.dump_tree(), node.right.dump_tree()],
            ),
            ExpressionNode::Assignment(node) => DumpTree::new(
                format!("Assignment {}", node.left.joined_name()),
                vec![node.right.dump_tree()],
            ),
            ExpressionNode::Scope(node) => node.dump_tree(),
            ExpressionNode::If(node) => {
                let mut children = Vec::new();
                for (condition, body) in &node.children {
                    children.push(DumpTree::new(
                        "Condition".to_string(),
                        vec![condition.dump_tree()],
                    ));
                    children.push(body.dump_tree());
                }
                if let Some(else_body) = &node.else_body {
                    children.push(DumpTree::new(
                        "Else".to_string(),
                        vec![else_body.dump_tree()],
                    ));
                }
                DumpTree::new("If".to_string(), children)
            }
            ExpressionNode::FunctionCall(node) => {
                let mut children = vec![node.name.dump_tree()];
                children.extend(node.params.iter().map(|p| p.dump_tree()));
                DumpTree::new("FunctionCall".to_string(), children)
            }
            ExpressionNode::TupleCreation(node) => DumpTree::new(
                "TupleCreation".to_string(),
                node.params.iter().map(|p| p.dump_tree()).collect(),
            ),
            ExpressionNode::ListCreation(node) => DumpTree::new(
                match &node.base_type {
                    Some(base) => format!("ListCreation [{}]", base),
                    None => "ListCreation".to_string(),
                },
                node.params.iter().map(|p| p.dump_tree()).collect(),
            ),
        }
    }
}
