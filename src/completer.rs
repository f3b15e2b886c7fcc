use crate::ast::{
    ExpressionNode, FunctionDeclarationNode, IdentifierNode, ModuleRootNode, ScopeNode,
};
use crate::datatype::Datatype;
use crate::error::CompilationError;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct VariableDeclaration {
    datatype: Datatype,
    id: i32,
    overrideable: bool,
}

type ScopeFrame = BTreeMap<String, VariableDeclaration>;

/// Completes the type information of parsed modules.
///
/// Runs in two passes: [DatatypeCompleter::declare_modules] registers every
/// top-level declaration (shallowly, so modules can call each other), then
/// [DatatypeCompleter::complete] walks each module and resolves every
/// identifier to its datatype and declaration id.
///
/// Ids are allocated so that function declarations always receive even
/// numbers: a function reference on the VM stack carries its id verbatim and
/// the low bit must stay clear to distinguish it from a lambda pointer.
pub struct DatatypeCompleter {
    modules: BTreeMap<String, ScopeFrame>,
    scope: Vec<ScopeFrame>,
    current_module: String,
    next_function_id: i32,
    next_variable_id: i32,
}

impl DatatypeCompleter {
    pub fn new() -> Self {
        Self {
            modules: BTreeMap::new(),
            scope: Vec::new(),
            current_module: String::new(),
            next_function_id: 0,
            next_variable_id: 1,
        }
    }

    /// Register every module's top-level declarations. Function names are
    /// non-overrideable; a second declaration with the same name fails here,
    /// before any bytecode is emitted.
    pub fn declare_modules(
        &mut self,
        modules: &mut [ModuleRootNode],
    ) -> Result<(), CompilationError> {
        for module in modules.iter_mut() {
            self.scope.push(ScopeFrame::new());
            for declaration in module.declarations.iter_mut() {
                let param_types = declaration
                    .parameters
                    .iter()
                    .map(|p| p.datatype.clone())
                    .collect();
                let function_type =
                    Datatype::function(declaration.return_type.clone(), param_types);
                self.declare_function(declaration.name.joined_name(), function_type)
                    .map_err(|message| {
                        CompilationError::at(declaration.source.position(), message)
                    })?;
            }
            let frame = self.scope.pop().expect("a scope frame was just pushed");
            self.modules.insert(module.name.clone(), frame);
        }
        Ok(())
    }

    /// Declare a host-provided function under `module`. Returns the id the
    /// compiler must bind its descriptor to.
    pub fn declare_native_function(
        &mut self,
        module: &str,
        name: &str,
        datatype: Datatype,
    ) -> Result<i32, CompilationError> {
        let id = self.next_function_id;
        self.next_function_id += 2;
        let frame = self.modules.entry(module.to_string()).or_default();
        if frame.contains_key(name) {
            return Err(CompilationError::new(format!(
                "A declaration named '{}.{}' already exists",
                module, name
            )));
        }
        frame.insert(
            name.to_string(),
            VariableDeclaration {
                datatype,
                id,
                overrideable: false,
            },
        );
        Ok(id)
    }

    pub fn complete(&mut self, module: &mut ModuleRootNode) -> Result<(), CompilationError> {
        self.current_module = module.name.clone();
        self.scope.push(ScopeFrame::new());
        let result = module
            .declarations
            .iter_mut()
            .try_for_each(|declaration| declaration.complete_datatype(self));
        self.scope.pop();
        result
    }

    fn declare_function(&mut self, name: String, datatype: Datatype) -> Result<i32, String> {
        let id = self.next_function_id;
        self.next_function_id += 2;
        self.insert_declaration(name, datatype, id, false)?;
        Ok(id)
    }

    fn declare_variable(&mut self, name: String, datatype: Datatype) -> Result<i32, String> {
        if name.contains('.') {
            return Err("The '.' character is not allowed in variable declarations".to_string());
        }
        let id = self.next_variable_id;
        self.next_variable_id += 2;
        self.insert_declaration(name, datatype, id, true)?;
        Ok(id)
    }

    fn insert_declaration(
        &mut self,
        name: String,
        datatype: Datatype,
        id: i32,
        overrideable: bool,
    ) -> Result<(), String> {
        let current = self
            .scope
            .last_mut()
            .expect("declarations always happen inside a scope");
        if let Some(existing) = current.get(&name) {
            if !existing.overrideable {
                return Err(format!(
                    "Overriding the non-overrideable name '{}'",
                    name
                ));
            }
            current.remove(&name);
        }
        current.insert(
            name,
            VariableDeclaration {
                datatype,
                id,
                overrideable,
            },
        );
        Ok(())
    }

    fn variable_type(&self, name: &[String]) -> Result<(Datatype, i32), String> {
        if name.len() == 1 {
            for frame in self.scope.iter().rev() {
                if let Some(declaration) = frame.get(&name[0]) {
                    return Ok((declaration.datatype.clone(), declaration.id));
                }
            }
        }
        let (module, terminal) = match name.len() {
            1 => (self.current_module.as_str(), name[0].as_str()),
            2 => (name[0].as_str(), name[1].as_str()),
            _ => return Err(format!("'{}' has too many segments", name.join("."))),
        };
        if let Some(declarations) = self.modules.get(module) {
            if let Some(declaration) = declarations.get(terminal) {
                return Ok((declaration.datatype.clone(), declaration.id));
            }
        }
        Err(format!("Couldn't find a variable called {}", name.join(".")))
    }
}

impl Default for DatatypeCompleter {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionDeclarationNode {
    pub(crate) fn complete_datatype(
        &mut self,
        completer: &mut DatatypeCompleter,
    ) -> Result<(), CompilationError> {
        completer.scope.push(ScopeFrame::new());
        let result = (|| {
            self.name.complete_datatype(completer)?;
            for param in self.parameters.iter_mut() {
                completer
                    .declare_variable(param.name.joined_name(), param.datatype.clone())
                    .map_err(|message| {
                        CompilationError::at(param.name.source.position(), message)
                    })?;
                param.name.complete_datatype(completer)?;
            }
            self.body.complete_datatype(completer)?;
            let body_type = self
                .body
                .datatype()
                .expect("a completed scope always has a type");
            if body_type != self.return_type {
                return Err(CompilationError::at(
                    self.source.position(),
                    format!(
                        "This function's declared return type ({}) and actual return type ({}) don't match",
                        self.return_type, body_type
                    ),
                ));
            }
            Ok(())
        })();
        completer.scope.pop();
        result
    }
}

impl IdentifierNode {
    pub(crate) fn complete_datatype(
        &mut self,
        completer: &mut DatatypeCompleter,
    ) -> Result<(), CompilationError> {
        let resolved = completer
            .variable_type(&self.name)
            .map_err(|message| CompilationError::at(self.source.position(), message))?;
        self.resolved = Some(resolved);
        Ok(())
    }
}

impl ScopeNode {
    pub(crate) fn complete_datatype(
        &mut self,
        completer: &mut DatatypeCompleter,
    ) -> Result<(), CompilationError> {
        completer.scope.push(ScopeFrame::new());
        let result = self
            .expressions
            .iter_mut()
            .try_for_each(|expression| expression.complete_datatype(completer));
        completer.scope.pop();
        result
    }
}

impl ExpressionNode {
    pub(crate) fn complete_datatype(
        &mut self,
        completer: &mut DatatypeCompleter,
    ) -> Result<(), CompilationError> {
        match self {
            ExpressionNode::LiteralInt32(_) => Ok(()),
            ExpressionNode::Identifier(node) => node.complete_datatype(completer),
            ExpressionNode::Binary(node) => {
                node.left.complete_datatype(completer)?;
                node.right.complete_datatype(completer)?;
                let lhs = node.left.datatype().expect("lhs was completed");
                let rhs = node.right.datatype().expect("rhs was completed");
                let position = node.source.position();
                if lhs != rhs {
                    return Err(CompilationError::at(
                        position,
                        format!("lhs={} and rhs={} don't match", lhs, rhs),
                    ));
                }
                if node.operator.is_logical() {
                    if lhs != Datatype::Bool {
                        return Err(CompilationError::at(
                            position,
                            format!("'{}' needs bool operands, not {}", node.operator.symbol(), lhs),
                        ));
                    }
                } else if !lhs.is_integer() {
                    return Err(CompilationError::at(
                        position,
                        format!(
                            "'{}' needs integer operands, not {}",
                            node.operator.symbol(),
                            lhs
                        ),
                    ));
                }
                Ok(())
            }
            ExpressionNode::Assignment(node) => {
                node.right.complete_datatype(completer)?;
                let right_type = node.right.datatype().expect("rhs was completed");
                completer
                    .declare_variable(node.left.joined_name(), right_type)
                    .map_err(|message| {
                        CompilationError::at(node.left.source.position(), message)
                    })?;
                node.left.complete_datatype(completer)
            }
            ExpressionNode::Scope(node) => node.complete_datatype(completer),
            ExpressionNode::If(node) => {
                let mut branch_type: Option<Datatype> = None;
                for (condition, body) in node.children.iter_mut() {
                    condition.complete_datatype(completer)?;
                    let condition_type = condition.datatype().expect("condition was completed");
                    if condition_type != Datatype::Bool {
                        return Err(CompilationError::at(
                            condition.source().position(),
                            format!("An if condition must be a bool, not {}", condition_type),
                        ));
                    }
                    body.complete_datatype(completer)?;
                    let body_type = body.datatype().expect("body was completed");
                    match &branch_type {
                        Some(previous) => {
                            if *previous != body_type {
                                return Err(CompilationError::at(
                                    node.source.position(),
                                    format!(
                                        "Not all branches of this if expression return the same value. \
                                         Previous branches return {}, but one returns {}",
                                        previous, body_type
                                    ),
                                ));
                            }
                        }
                        None => branch_type = Some(body_type),
                    }
                }
                let branch_type = branch_type.expect("an if expression has at least one branch");
                match node.else_body.as_mut() {
                    Some(else_body) => {
                        else_body.complete_datatype(completer)?;
                        let else_type = else_body.datatype().expect("else body was completed");
                        if else_type != branch_type {
                            return Err(CompilationError::at(
                                node.source.position(),
                                format!(
                                    "The else branch of this if expression returns a value different \
                                     from the other branches. Previous branches return {}, but the \
                                     else branch returns {}",
                                    branch_type, else_type
                                ),
                            ));
                        }
                    }
                    None => {
                        if branch_type != Datatype::empty_tuple() {
                            return Err(CompilationError::at(
                                node.source.position(),
                                format!(
                                    "An if expression without an else branch can't produce a value; \
                                     the branches return {}",
                                    branch_type
                                ),
                            ));
                        }
                    }
                }
                Ok(())
            }
            ExpressionNode::FunctionCall(node) => {
                node.name.complete_datatype(completer)?;
                for param in node.params.iter_mut() {
                    param.complete_datatype(completer)?;
                }
                let callee_type = node.name.datatype().expect("callee was completed");
                let position = node.source.position();
                let (_, expected_params) = match &callee_type {
                    Datatype::Function(return_type, params) => (return_type, params),
                    _ => {
                        return Err(CompilationError::at(
                            position,
                            format!("Calling non-function type '{}'", callee_type),
                        ))
                    }
                };
                if expected_params.len() != node.params.len() {
                    return Err(CompilationError::at(
                        position,
                        format!(
                            "Function {} expects {} arguments, but {} have been passed",
                            callee_type,
                            expected_params.len(),
                            node.params.len()
                        ),
                    ));
                }
                for (index, (param, expected)) in
                    node.params.iter().zip(expected_params).enumerate()
                {
                    let passed = param.datatype().expect("parameter was completed");
                    if passed != *expected {
                        return Err(CompilationError::at(
                            position,
                            format!(
                                "Function {} got passed invalid argument types; at position {} we \
                                 expected a '{}', but got passed a '{}'",
                                callee_type, index, expected, passed
                            ),
                        ));
                    }
                }
                Ok(())
            }
            ExpressionNode::TupleCreation(node) => node
                .params
                .iter_mut()
                .try_for_each(|param| param.complete_datatype(completer)),
            ExpressionNode::ListCreation(node) => {
                eprintln!("DEBUG enter ListCreation, params={}", node.params.len());
                for param in node.params.iter_mut() {
                    param.complete_datatype(completer)?;
                }
                eprintln!("DEBUG list elements completed");
                for param in node.params.iter() {
                    let param_type = param.datatype().expect("list element was completed");
                    eprintln!("DEBUG param_type={:?}", param_type);
                    match &node.base_type {
                        Some(base) => {
                            eprintln!("DEBUG comparing base={:?} param={:?}", base, param_type);
                            if *base != param_type {
                                return Err(CompilationError::at(
                                    node.source.position(),
                                    format!(
                                        "Not all elements in the created list have the same type; \
                                         previous children had the type {}, but one has the type {}",
                                        base, param_type
                                    ),
                                ));
                            }
                        }
                        None => node.base_type = Some(param_type),
                    }
                }
                if node.base_type.is_none() {
                    return Err(CompilationError::at(
                        node.source.position(),
                        "Can't determine the type of this list. Hint: Try something like [:i32] \
                         to create an empty list",
                    ));
                }
                Ok(())
            }
        }
    }
}
