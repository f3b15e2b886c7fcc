use crate::ast::ModuleRootNode;
use crate::compiler::Compiler;
use crate::completer::DatatypeCompleter;
use crate::datatype::Datatype;
use crate::error::{CompilationError, ParseFailure};
use crate::parser::Parser;
use crate::program::{NativeCallback, NativeFunction, Program};
use crate::vm::{VMParameters, VM};
use std::cell::RefCell;

struct PendingNativeFunction {
    module: String,
    name: String,
    datatype: Datatype,
    callback: NativeCallback,
}

/// The front-to-back compilation pipeline: feed it module sources and native
/// functions, then compile everything into a ready-to-run [VM].
pub struct Pipeline {
    parser: Parser,
    modules: Vec<ModuleRootNode>,
    native_functions: Vec<PendingNativeFunction>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            parser: Parser::new(),
            modules: Vec::new(),
            native_functions: Vec::new(),
        }
    }

    /// Parse `contents` as the module `module_name` and queue it for
    /// compilation.
    pub fn add_file_from_memory(
        &mut self,
        module_name: &str,
        contents: &str,
    ) -> Result<(), ParseFailure> {
        eprintln!("DEBUG add_file_from_memory enter");
        let module = self.parser.parse(module_name, contents)?;
        eprintln!("DEBUG parsed module ok");
        self.modules.push(module);
        Ok(())
    }

    /// Register a host function callable as `module.name` from samal code.
    /// `datatype` must be a function type; arguments are marshalled through
    /// [crate::ExternalVMValue] according to it.
    pub fn add_native_function(
        &mut self,
        module: &str,
        name: &str,
        datatype: Datatype,
        callback: NativeCallback,
    ) {
        self.native_functions.push(PendingNativeFunction {
            module: module.to_string(),
            name: name.to_string(),
            datatype,
            callback,
        });
    }

    /// Parse a datatype snippet; every named type must resolve.
    pub fn type_from_string(&self, type_string: &str) -> Result<Datatype, CompilationError> {
        let datatype = self.incomplete_type_from_string(type_string)?;
        if datatype.has_undetermined_template_types() {
            return Err(CompilationError::new(format!(
                "The type '{}' contains undetermined names",
                datatype
            )));
        }
        Ok(datatype)
    }

    /// Parse a datatype snippet, allowing unresolved names to remain.
    pub fn incomplete_type_from_string(
        &self,
        type_string: &str,
    ) -> Result<Datatype, CompilationError> {
        self.parser
            .parse_datatype(type_string)
            .map_err(|failure| CompilationError::new(failure.to_string()))
    }

    /// Complete and compile every queued module into a [Program].
    pub fn compile_to_program(mut self) -> Result<Program, CompilationError> {
        eprintln!("DEBUG compile_to_program enter");
        let mut completer = DatatypeCompleter::new();
        completer.declare_modules(&mut self.modules)?;
        eprintln!("DEBUG modules declared");
        let mut native_functions = Vec::new();
        for pending in self.native_functions {
            if !matches!(pending.datatype, Datatype::Function(..)) {
                return Err(CompilationError::new(format!(
                    "The native function '{}.{}' needs a function type, not '{}'",
                    pending.module, pending.name, pending.datatype
                )));
            }
            let id = completer.declare_native_function(
                &pending.module,
                &pending.name,
                pending.datatype.clone(),
            )?;
            native_functions.push(NativeFunction {
                full_name: format!("{}.{}", pending.module, pending.name),
                id,
                datatype: pending.datatype,
                callback: RefCell::new(pending.callback),
            });
        }
        for module in self.modules.iter_mut() {
            completer.complete(module)?;
        }
        Compiler::new(&self.modules, native_functions).compile()
    }

    /// Compile and wrap the result in a VM configured with `params`.
    pub fn compile(self, params: VMParameters) -> Result<VM, CompilationError> {
        Ok(VM::new(self.compile_to_program()?, params))
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}
