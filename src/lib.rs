//! samal is a small statically-typed functional language, shipped here as a
//! self-contained toolchain: a generic PEG parser engine that interprets
//! grammars held as data, a type completer, a bytecode compiler targeting a
//! custom stack machine, and a virtual machine whose heap is managed by a
//! relocating two-space garbage collector.
//!
//! # Overview
//!
//! Source text flows through the [Pipeline]: the [parser](Parser) evaluates
//! the samal grammar with the [PEG engine](peg) and builds the [AST](ast);
//! the [DatatypeCompleter] resolves every identifier and completes the type
//! information; the [Compiler] lowers the typed AST to a linear instruction
//! stream over an explicit value stack and records, per instruction pointer,
//! which stack slots are live and what types they hold; the [VM] interprets
//! the bytecode and the [GC](gc::GC) uses exactly that compile-time type
//! information to trace and relocate the live value graph.
//!
//! # Example
//!
//! ```
//! use samal::{ExternalVMValue, Pipeline, VMParameters};
//!
//! let mut pipeline = Pipeline::new();
//! pipeline
//!     .add_file_from_memory(
//!         "Main",
//!         r#"
//! fn fib(n : i32) -> i32 {
//!     if n < 2 {
//!         n
//!     } else {
//!         fib(n - 1) + fib(n - 2)
//!     }
//! }"#,
//!     )
//!     .unwrap();
//! let mut vm = pipeline.compile(VMParameters::default()).unwrap();
//! let result = vm
//!     .run_external("fib", &[ExternalVMValue::wrap_int32(10)])
//!     .unwrap();
//! assert_eq!(result.as_i32(), Some(55));
//! ```

pub mod ast;
mod compiler;
mod completer;
mod datatype;
mod error;
mod external_value;
pub mod gc;
mod instruction;
mod parser;
pub mod peg;
mod pipeline;
mod program;
mod stack_info;
mod util;
mod vm;

#[cfg(test)]
mod __tests__;

pub use compiler::Compiler;
pub use completer::DatatypeCompleter;
pub use datatype::{Datatype, EnumInfo, EnumVariant, StructField, StructInfo, TemplateParamMap};
pub use error::{CompilationError, ParseFailure, RuntimeError};
pub use external_value::ExternalVMValue;
pub use instruction::Instruction;
pub use parser::Parser;
pub use pipeline::Pipeline;
pub use program::{Function, NativeCallback, NativeFunction, Program};
pub use stack_info::{StackInformationTree, StorageType, VariableEntry};
pub use util::{Log, Position};
pub use vm::{Stack, VMParameters, VM};
