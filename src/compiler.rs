use crate::ast::{
    BinaryOperator, ExpressionNode, FunctionDeclarationNode, IdentifierNode, ModuleRootNode,
    ScopeNode,
};
use crate::datatype::Datatype;
use crate::error::CompilationError;
use crate::instruction::Instruction;
use crate::program::{Function, NativeFunction, Program};
use crate::stack_info::{StackInformationTree, StorageType, VariableEntry};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct VariableInfoOnStack {
    /// Stack height right after the variable's bytes, measured from the
    /// bottom of the function frame.
    end_offset: usize,
    size_on_stack: usize,
}

#[derive(Debug, Default)]
struct StackFrame {
    variables: BTreeMap<i32, VariableInfoOnStack>,
    /// Bytes of discarded mid-scope values, popped in one go at scope exit.
    bytes_to_pop_on_exit: usize,
}

/// Lowers completed modules to a [Program].
///
/// The compiler tracks the symbolic stack height in bytes while emitting, so
/// every instruction's operands can be addressed relative to the top; the
/// height must agree with the VM's runtime stack at every point. Alongside
/// the code it records the stack information tree that later tells the GC
/// which stack bytes hold which types.
pub struct Compiler<'c> {
    modules: &'c [ModuleRootNode],
    native_functions: Vec<NativeFunction>,
    code: Vec<u8>,
    functions: BTreeMap<String, Function>,
    auxiliary_types: Vec<Datatype>,
    stack_size: usize,
    stack_frames: Vec<StackFrame>,
    stack_information: StackInformationTree,
    tree_cursor: usize,
}

impl<'c> Compiler<'c> {
    pub fn new(modules: &'c [ModuleRootNode], native_functions: Vec<NativeFunction>) -> Self {
        Self {
            modules,
            native_functions,
            code: Vec::new(),
            functions: BTreeMap::new(),
            auxiliary_types: Vec::new(),
            stack_size: 0,
            stack_frames: Vec::new(),
            stack_information: StackInformationTree::new(0),
            tree_cursor: 0,
        }
    }

    pub fn compile(mut self) -> Result<Program, CompilationError> {
        let modules = self.modules;
        for module in modules {
            for declaration in &module.declarations {
                self.compile_function(module, declaration)?;
            }
        }
        Ok(Program {
            code: self.code,
            functions: self.functions,
            auxiliary_types: self.auxiliary_types,
            native_functions: self.native_functions,
        })
    }

    fn compile_function(
        &mut self,
        module: &ModuleRootNode,
        declaration: &FunctionDeclarationNode,
    ) -> Result<(), CompilationError> {
        let offset = self.code.len() as i32;
        self.stack_size = 0;
        self.stack_frames = vec![StackFrame::default()];
        self.stack_information = StackInformationTree::new(offset);
        self.tree_cursor = self.stack_information.root();

        for param in &declaration.parameters {
            let size = param.datatype.size_on_stack();
            self.stack_size += size;
            let id = param
                .name
                .id()
                .expect("parameters are resolved during completion");
            self.stack_frames
                .last_mut()
                .expect("the function frame was just pushed")
                .variables
                .insert(
                    id,
                    VariableInfoOnStack {
                        end_offset: self.stack_size,
                        size_on_stack: size,
                    },
                );
            self.stack_information.add_child(
                self.tree_cursor,
                offset,
                self.stack_size as i32,
                Some(VariableEntry {
                    name: Some(param.name.joined_name()),
                    datatype: param.datatype.clone(),
                    storage: StorageType::Parameter,
                }),
                false,
            );
        }

        let return_size = declaration.return_type.size_on_stack();
        self.compile_scope(&declaration.body)?;

        // The function frame still holds the parameters; pop them below the
        // return value in a single instruction.
        let frame = self
            .stack_frames
            .pop()
            .expect("the function frame is still open");
        debug_assert_eq!(frame.bytes_to_pop_on_exit, 0);
        let frame_bytes: usize = frame
            .variables
            .values()
            .map(|v| v.size_on_stack)
            .sum::<usize>()
            + frame.bytes_to_pop_on_exit;
        if frame_bytes > 0 {
            self.add_instruction_2(
                Instruction::POP_N_BELOW,
                frame_bytes as i32,
                return_size as i32,
            );
            self.stack_size -= frame_bytes;
        }
        self.add_instruction_1(Instruction::RETURN, return_size as i32);
        assert_eq!(
            self.stack_size, return_size,
            "the tracked stack height must equal the return size when a function ends"
        );

        let id = declaration
            .name
            .id()
            .expect("declarations are resolved during completion");
        debug_assert_eq!(id % 2, 0, "function ids carry a cleared tag bit");
        let qualified_name = format!("{}.{}", module.name, declaration.name.joined_name());
        self.functions.insert(
            qualified_name,
            Function {
                name: declaration.name.joined_name(),
                id,
                offset,
                len: self.code.len() as i32 - offset,
                return_type: declaration.return_type.clone(),
                return_type_size: return_size,
                parameter_types: declaration
                    .parameters
                    .iter()
                    .map(|p| p.datatype.clone())
                    .collect(),
                template_parameters: BTreeMap::new(),
                stack_information: std::mem::replace(
                    &mut self.stack_information,
                    StackInformationTree::new(0),
                ),
            },
        );
        Ok(())
    }

    fn compile_scope(&mut self, scope: &ScopeNode) -> Result<(), CompilationError> {
        let return_type = scope
            .datatype()
            .expect("a completed scope always has a type");
        let return_size = return_type.size_on_stack();
        self.stack_frames.push(StackFrame::default());
        self.open_construct();

        for (index, expression) in scope.expressions.iter().enumerate() {
            self.compile_expression(expression)?;
            // Every line's value except the last is dead weight; it stays on
            // the stack until the single cleanup below.
            if index + 1 != scope.expressions.len() {
                let size = expression
                    .datatype()
                    .expect("a completed expression has a type")
                    .size_on_stack();
                self.stack_frames
                    .last_mut()
                    .expect("the scope frame is open")
                    .bytes_to_pop_on_exit += size;
            }
        }

        let frame = self.stack_frames.pop().expect("the scope frame is open");
        let frame_bytes: usize = frame
            .variables
            .values()
            .map(|v| v.size_on_stack)
            .sum::<usize>()
            + frame.bytes_to_pop_on_exit;
        if frame_bytes > 0 {
            self.add_instruction_2(
                Instruction::POP_N_BELOW,
                frame_bytes as i32,
                return_size as i32,
            );
            self.stack_size -= frame_bytes;
        }
        self.add_marker();
        self.close_construct();
        self.note_value(return_type, None, StorageType::ImplicitlyCopied);
        Ok(())
    }

    fn compile_expression(&mut self, expression: &ExpressionNode) -> Result<(), CompilationError> {
        match expression {
            ExpressionNode::LiteralInt32(node) => {
                self.add_push_8(node.value as i64);
                self.stack_size += 8;
                self.note_value(Datatype::I32, None, StorageType::ImplicitlyCopied);
                Ok(())
            }
            ExpressionNode::Identifier(node) => self.load_variable_to_stack(node),
            ExpressionNode::Binary(node) => {
                self.open_construct();
                self.compile_expression(&node.left)?;
                self.compile_expression(&node.right)?;
                let operand_type = node.left.datatype().expect("operands are completed");
                let instruction = binary_operation_instruction(&operand_type, node.operator)
                    .ok_or_else(|| {
                        CompilationError::at(
                            node.source.position(),
                            format!(
                                "The operator '{}' is not available for {} operands",
                                node.operator.symbol(),
                                operand_type
                            ),
                        )
                    })?;
                self.add_instruction(instruction);
                self.stack_size -= 8;
                self.add_marker();
                self.close_construct();
                let result_type = if node.operator.yields_bool() {
                    Datatype::Bool
                } else {
                    operand_type
                };
                self.note_value(result_type, None, StorageType::ImplicitlyCopied);
                Ok(())
            }
            ExpressionNode::Assignment(node) => {
                self.compile_expression(&node.right)?;
                let datatype = node.right.datatype().expect("rhs is completed");
                let size = datatype.size_on_stack();
                self.add_instruction_1(Instruction::REPUSH_N, size as i32);
                self.stack_size += size;
                let id = node.left.id().expect("lhs is resolved during completion");
                self.stack_frames
                    .last_mut()
                    .expect("assignments happen inside a scope")
                    .variables
                    .insert(
                        id,
                        VariableInfoOnStack {
                            end_offset: self.stack_size,
                            size_on_stack: size,
                        },
                    );
                self.note_value(
                    datatype,
                    Some(node.left.joined_name()),
                    StorageType::Local,
                );
                Ok(())
            }
            ExpressionNode::Scope(node) => self.compile_scope(node),
            ExpressionNode::If(node) => {
                let return_type = expression.datatype().expect("the if is completed");
                let return_size = return_type.size_on_stack();
                let stack_before = self.stack_size;
                self.open_construct();
                let mut end_jumps = Vec::new();
                for (index, (condition, body)) in node.children.iter().enumerate() {
                    if index > 0 {
                        self.add_marker();
                    }
                    self.compile_expression(condition)?;
                    let else_jump = self.add_jump_placeholder(Instruction::JUMP_IF_FALSE);
                    self.stack_size -= 8;
                    self.add_marker();
                    self.compile_scope(body)?;
                    assert_eq!(
                        self.stack_size,
                        stack_before + return_size,
                        "each if branch must leave exactly the return value"
                    );
                    end_jumps.push(self.add_jump_placeholder(Instruction::JUMP));
                    self.stack_size = stack_before;
                    self.patch_jump(else_jump);
                }
                if let Some(else_body) = &node.else_body {
                    self.add_marker();
                    self.compile_scope(else_body)?;
                    assert_eq!(
                        self.stack_size,
                        stack_before + return_size,
                        "the else branch must leave exactly the return value"
                    );
                } else {
                    self.stack_size = stack_before + return_size;
                }
                for end_jump in end_jumps {
                    self.patch_jump(end_jump);
                }
                self.close_construct();
                self.note_value(return_type, None, StorageType::ImplicitlyCopied);
                Ok(())
            }
            ExpressionNode::FunctionCall(node) => {
                self.open_construct();
                self.compile_expression(&node.name)?;
                let mut argument_bytes = 0usize;
                for param in &node.params {
                    self.compile_expression(param)?;
                    argument_bytes += param
                        .datatype()
                        .expect("arguments are completed")
                        .size_on_stack();
                }
                let return_type = expression.datatype().expect("the call is completed");
                let return_size = return_type.size_on_stack();
                self.add_instruction_1(Instruction::CALL, argument_bytes as i32);
                self.stack_size -= argument_bytes + 8;
                self.stack_size += return_size;
                self.close_construct();
                self.note_value(return_type, None, StorageType::ImplicitlyCopied);
                Ok(())
            }
            ExpressionNode::TupleCreation(node) => {
                // A tuple's first element sits on top of its stack region, so
                // the elements are emitted back to front.
                for param in node.params.iter().rev() {
                    self.compile_expression(param)?;
                }
                Ok(())
            }
            ExpressionNode::ListCreation(node) => {
                let element_type = node
                    .base_type
                    .clone()
                    .expect("list element types are completed");
                let element_size = element_type.size_on_stack();
                self.open_construct();
                for param in &node.params {
                    self.compile_expression(param)?;
                }
                self.add_instruction_2(
                    Instruction::CREATE_LIST,
                    node.params.len() as i32,
                    element_size as i32,
                );
                self.stack_size -= node.params.len() * element_size;
                self.stack_size += 8;
                self.add_marker();
                self.close_construct();
                self.note_value(
                    Datatype::list(element_type),
                    None,
                    StorageType::ImplicitlyCopied,
                );
                Ok(())
            }
        }
    }

    /// Copy a variable's bytes to the top, or push a tagged reference if the
    /// identifier names a function.
    fn load_variable_to_stack(&mut self, node: &IdentifierNode) -> Result<(), CompilationError> {
        let (datatype, id) = node
            .resolved
            .clone()
            .expect("identifiers are resolved during completion");
        for frame in self.stack_frames.iter().rev() {
            if let Some(info) = frame.variables.get(&id) {
                let (size, offset) = (info.size_on_stack, self.stack_size - info.end_offset);
                self.add_instruction_2(Instruction::REPUSH_FROM_N, size as i32, offset as i32);
                self.stack_size += size;
                self.note_value(
                    datatype,
                    Some(node.joined_name()),
                    StorageType::ImplicitlyCopied,
                );
                return Ok(());
            }
        }
        if matches!(datatype, Datatype::Function(..)) {
            self.add_push_8(id as i64);
            self.stack_size += 8;
            self.note_value(
                datatype,
                Some(node.joined_name()),
                StorageType::ImplicitlyCopied,
            );
            return Ok(());
        }
        Err(CompilationError::at(
            node.source.position(),
            format!(
                "Couldn't locate the variable '{}' on the stack",
                node.joined_name()
            ),
        ))
    }

    fn add_instruction(&mut self, instruction: Instruction) {
        self.code.push(instruction as u8);
    }
    fn add_instruction_1(&mut self, instruction: Instruction, param: i32) {
        self.code.push(instruction as u8);
        self.code.extend_from_slice(&param.to_le_bytes());
    }
    fn add_instruction_2(&mut self, instruction: Instruction, param1: i32, param2: i32) {
        self.code.push(instruction as u8);
        self.code.extend_from_slice(&param1.to_le_bytes());
        self.code.extend_from_slice(&param2.to_le_bytes());
    }
    fn add_push_8(&mut self, value: i64) {
        self.code.push(Instruction::PUSH_8 as u8);
        self.code.extend_from_slice(&value.to_le_bytes());
    }
    /// Emit a jump with a dummy target and return the immediate's offset for
    /// later patching.
    fn add_jump_placeholder(&mut self, instruction: Instruction) -> usize {
        self.code.push(instruction as u8);
        let label = self.code.len();
        self.code.extend_from_slice(&0i32.to_le_bytes());
        label
    }
    /// Point a previously emitted jump at the current end of the code.
    fn patch_jump(&mut self, label: usize) {
        let target = self.code.len() as i32;
        self.code[label..label + 4].copy_from_slice(&target.to_le_bytes());
    }

    fn current_ip(&self) -> i32 {
        self.code.len() as i32
    }
    fn open_construct(&mut self) {
        self.tree_cursor = self.stack_information.add_child(
            self.tree_cursor,
            self.current_ip(),
            self.stack_size as i32,
            None,
            false,
        );
    }
    fn close_construct(&mut self) {
        self.tree_cursor = self
            .stack_information
            .parent_of(self.tree_cursor)
            .expect("close_construct is matched with open_construct");
    }
    fn add_marker(&mut self) {
        self.stack_information.add_child(
            self.tree_cursor,
            self.current_ip(),
            self.stack_size as i32,
            None,
            true,
        );
    }
    fn note_value(&mut self, datatype: Datatype, name: Option<String>, storage: StorageType) {
        self.stack_information.add_child(
            self.tree_cursor,
            self.current_ip(),
            self.stack_size as i32,
            Some(VariableEntry {
                name,
                datatype,
                storage,
            }),
            false,
        );
    }
}

fn binary_operation_instruction(
    operand_type: &Datatype,
    operator: BinaryOperator,
) -> Option<Instruction> {
    match (operand_type, operator) {
        (Datatype::I32, BinaryOperator::Plus) => Some(Instruction::ADD_I32),
        (Datatype::I32, BinaryOperator::Minus) => Some(Instruction::SUB_I32),
        (Datatype::I32, BinaryOperator::Multiply) => Some(Instruction::MUL_I32),
        (Datatype::I32, BinaryOperator::Divide) => Some(Instruction::DIV_I32),
        (Datatype::I32, BinaryOperator::ComparisonLessThan) => {
            Some(Instruction::COMPARE_LESS_THAN_I32)
        }
        (Datatype::I32, BinaryOperator::ComparisonLessEqualThan) => {
            Some(Instruction::COMPARE_LESS_EQUAL_THAN_I32)
        }
        (Datatype::I32, BinaryOperator::ComparisonMoreThan) => {
            Some(Instruction::COMPARE_MORE_THAN_I32)
        }
        (Datatype::I32, BinaryOperator::ComparisonMoreEqualThan) => {
            Some(Instruction::COMPARE_MORE_EQUAL_THAN_I32)
        }
        (Datatype::I32, BinaryOperator::LogicalEquals) => Some(Instruction::COMPARE_EQUALS_I32),
        (Datatype::I32, BinaryOperator::LogicalNotEquals) => {
            Some(Instruction::COMPARE_NOT_EQUALS_I32)
        }
        (Datatype::Bool, BinaryOperator::LogicalAnd) => Some(Instruction::LOGICAL_AND),
        (Datatype::Bool, BinaryOperator::LogicalOr) => Some(Instruction::LOGICAL_OR),
        _ => None,
    }
}
