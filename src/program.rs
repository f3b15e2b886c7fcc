use crate::datatype::Datatype;
use crate::external_value::ExternalVMValue;
use crate::instruction::Instruction;
use crate::stack_info::StackInformationTree;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};

/// One compiled function: where its body lives in the code region and what
/// the VM and GC need to know about it.
#[derive(Debug, Clone)]
pub struct Function {
    /// Unqualified name; the map key is the module-qualified one.
    pub name: String,
    /// The declaration id; always even so a pushed reference keeps its tag
    /// bit clear.
    pub id: i32,
    pub offset: i32,
    pub len: i32,
    pub return_type: Datatype,
    pub return_type_size: usize,
    pub parameter_types: Vec<Datatype>,
    pub template_parameters: BTreeMap<String, Datatype>,
    pub stack_information: StackInformationTree,
}

/// The signature of a host function callable from samal code.
pub type NativeCallback = Box<dyn FnMut(Vec<ExternalVMValue>) -> ExternalVMValue>;

/// A host-provided function registered with the pipeline; called by id
/// through the regular `CALL` instruction.
pub struct NativeFunction {
    pub full_name: String,
    pub id: i32,
    pub datatype: Datatype,
    pub callback: RefCell<NativeCallback>,
}

impl Debug for NativeFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeFunction")
            .field("full_name", &self.full_name)
            .field("id", &self.id)
            .field("datatype", &self.datatype)
            .finish()
    }
}

/// An immutable bundle of everything the VM needs to run: the contiguous
/// code region, the function table, the auxiliary type table (lambda capture
/// layouts, used by the GC) and the native function descriptors.
#[derive(Debug, Default)]
pub struct Program {
    pub code: Vec<u8>,
    /// Keyed by module-qualified name (`Main.fib`).
    pub functions: BTreeMap<String, Function>,
    pub auxiliary_types: Vec<Datatype>,
    pub native_functions: Vec<NativeFunction>,
}

impl Program {
    /// Look a function up by its qualified name, falling back to a bare-name
    /// search across modules.
    pub fn find_function(&self, name: &str) -> Option<&Function> {
        if let Some(function) = self.functions.get(name) {
            return Some(function);
        }
        self.functions.values().find(|f| f.name == name)
    }

    pub fn function_by_id(&self, id: i32) -> Option<&Function> {
        self.functions.values().find(|f| f.id == id)
    }

    pub fn native_function_by_id(&self, id: i32) -> Option<&NativeFunction> {
        self.native_functions.iter().find(|f| f.id == id)
    }

    /// The function whose body contains the instruction pointer.
    pub fn function_containing_ip(&self, ip: i32) -> Option<&Function> {
        self.functions
            .values()
            .find(|f| ip >= f.offset && ip < f.offset + f.len)
    }

    fn read_i32(&self, offset: usize) -> i32 {
        i32::from_le_bytes(
            self.code[offset..offset + 4]
                .try_into()
                .expect("4 bytes are 4 bytes"),
        )
    }

    /// A human-readable listing of every function's instructions.
    pub fn disassemble(&self) -> String {
        let mut ret = String::new();
        for (qualified_name, function) in &self.functions {
            ret += &format!("Function {} ({})", qualified_name, function.id);
            if !function.template_parameters.is_empty() {
                ret.push('<');
                let rendered: Vec<String> = function
                    .template_parameters
                    .iter()
                    .map(|(name, datatype)| format!("{} => {}", name, datatype))
                    .collect();
                ret += &rendered.join(",");
                ret.push('>');
            }
            ret.push('\n');
            let mut offset = function.offset as usize;
            let end = (function.offset + function.len) as usize;
            while offset < end {
                let instruction = Instruction::try_from(self.code[offset])
                    .unwrap_or_else(|op| panic!("Undecodable opcode {} at {}", op, offset));
                ret += &format!(" {} {}", offset, instruction.to_str());
                let width = instruction.width();
                if width >= 5 {
                    ret += &format!(" {}", self.read_i32(offset + 1));
                }
                if width >= 9 {
                    ret += &format!(" {}", self.read_i32(offset + 5));
                }
                ret.push('\n');
                offset += width;
            }
            ret.push('\n');
        }
        for native_function in &self.native_functions {
            ret += &format!(
                "Native function {} ({})\n",
                native_function.full_name, native_function.id
            );
        }
        ret
    }
}
