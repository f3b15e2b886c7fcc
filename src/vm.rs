use crate::error::RuntimeError;
use crate::external_value::ExternalVMValue;
use crate::gc::GC;
use crate::instruction::Instruction;
use crate::program::Program;
use crate::util::Log;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
/// Knobs for the runtime: how much heap to start with and how many function
/// calls may pass between collection opportunities.
pub struct VMParameters {
    pub initial_heap_size: usize,
    pub function_calls_per_gc_run: i32,
}

impl Default for VMParameters {
    fn default() -> Self {
        Self {
            initial_heap_size: 1024 * 1024,
            function_calls_per_gc_run: 1024,
        }
    }
}

/// The byte-addressable value stack. Grows upward; "offset N from top"
/// addresses the byte `len - N`. Doubling growth is handled by the backing
/// `Vec`; raw pointers into the buffer are invalidated by any push.
#[derive(Debug, Default)]
pub struct Stack {
    data: Vec<u8>,
}

impl Stack {
    pub fn new() -> Self {
        Self {
            data: Vec::with_capacity(10 * 1024),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn pop(&mut self, len: usize) {
        assert!(self.data.len() >= len, "stack underflow");
        self.data.truncate(self.data.len() - len);
    }

    /// Copy `len` bytes located `offset` below the top back onto the top.
    pub fn repush(&mut self, offset: usize, len: usize) {
        assert!(self.data.len() >= offset + len, "stack underflow");
        let start = self.data.len() - offset - len;
        self.data.extend_from_within(start..start + len);
    }

    /// Delete `len` bytes that sit `offset` bytes below the top, keeping the
    /// top `offset` bytes in place.
    pub fn pop_below(&mut self, offset: usize, len: usize) {
        assert!(self.data.len() >= offset + len, "stack underflow");
        let start = self.data.len() - offset - len;
        self.data.drain(start..start + len);
    }

    pub fn read_i64(&self, offset_from_top: usize) -> i64 {
        let start = self.data.len() - offset_from_top;
        i64::from_le_bytes(
            self.data[start..start + 8]
                .try_into()
                .expect("8 bytes are 8 bytes"),
        )
    }

    pub fn write_i64(&mut self, offset_from_top: usize, value: i64) {
        let start = self.data.len() - offset_from_top;
        self.data[start..start + 8].copy_from_slice(&value.to_le_bytes());
    }

    pub fn base_ptr(&mut self) -> *mut u8 {
        self.data.as_mut_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn move_data(&self) -> Vec<u8> {
        self.data.clone()
    }

    pub fn dump(&self) -> String {
        let mut ret = String::new();
        for (index, byte) in self.data.iter().enumerate() {
            ret += &format!("{} ", byte);
            if index % 8 == 7 {
                ret.push('\n');
            }
        }
        ret
    }
}

/// The bytecode interpreter: an instruction pointer, the value stack and the
/// garbage-collected heap, executing one [Program].
pub struct VM {
    program: Program,
    stack: Stack,
    gc: GC,
    ip: i32,
    function_entries: HashMap<i32, i32>,
    log: Log<&'static str>,
}

impl VM {
    pub fn new(program: Program, params: VMParameters) -> Self {
        let function_entries = program
            .functions
            .values()
            .map(|f| (f.id, f.offset))
            .collect();
        Self {
            program,
            stack: Stack::new(),
            gc: GC::new(&params),
            ip: 0,
            function_entries,
            log: Log::None,
        }
    }

    pub fn set_log(&mut self, log: Log<&'static str>) {
        self.log = log;
    }

    pub fn program(&self) -> &Program {
        &self.program
    }
    pub fn stack(&self) -> &Stack {
        &self.stack
    }
    pub fn gc(&self) -> &GC {
        &self.gc
    }

    /// Run `function_name` with the arguments already laid out in stack
    /// format (reverse declaration order, packed). The returned bytes are
    /// exactly the function's return size.
    pub fn run(&mut self, function_name: &str, initial_stack: Vec<u8>) -> Result<Vec<u8>, RuntimeError> {
        let function = self
            .program
            .find_function(function_name)
            .ok_or_else(|| RuntimeError::new(format!("Function {} not found", function_name)))?;
        self.ip = function.offset;
        self.stack.clear();
        self.stack.push_bytes(&initial_stack);
        loop {
            #[cfg(debug_assertions)]
            if self.log.order() >= Log::Verbose(()).order() {
                println!("[{}] ip={} stack={} bytes", self.log, self.ip, self.stack.len());
            }
            if !self.interpret_instruction()? {
                return Ok(self.stack.move_data());
            }
        }
    }

    /// Run a function with host-side values and wrap its result back up.
    pub fn run_external(
        &mut self,
        function_name: &str,
        args: &[ExternalVMValue],
    ) -> Result<ExternalVMValue, RuntimeError> {
        let (parameter_types, return_type) = {
            let function = self.program.find_function(function_name).ok_or_else(|| {
                RuntimeError::new(format!("Function {} not found", function_name))
            })?;
            (function.parameter_types.clone(), function.return_type.clone())
        };
        if parameter_types.len() != args.len() {
            return Err(RuntimeError::new(format!(
                "Function {} takes {} arguments, got {}",
                function_name,
                parameter_types.len(),
                args.len()
            )));
        }
        let mut initial_stack = Vec::new();
        for (arg, expected) in args.iter().zip(&parameter_types) {
            if arg.datatype() != expected {
                return Err(RuntimeError::new(format!(
                    "Argument type mismatch: expected {}, got {}",
                    expected,
                    arg.datatype()
                )));
            }
            initial_stack.extend(arg.to_stack_value());
        }
        let result = self.run(function_name, initial_stack)?;
        assert_eq!(result.len(), return_type.size_on_stack());
        // The heap backing any list results stays alive inside this VM.
        Ok(unsafe { ExternalVMValue::wrap_from_ptr(&return_type, result.as_ptr()) })
    }

    fn read_code_i32(&self, offset: i32) -> i32 {
        let offset = offset as usize;
        i32::from_le_bytes(
            self.program.code[offset..offset + 4]
                .try_into()
                .expect("4 bytes are 4 bytes"),
        )
    }

    fn read_code_i64(&self, offset: i32) -> i64 {
        let offset = offset as usize;
        i64::from_le_bytes(
            self.program.code[offset..offset + 8]
                .try_into()
                .expect("8 bytes are 8 bytes"),
        )
    }

    fn binary_i32<F: Fn(i32, i32) -> i64>(&mut self, op: F) {
        let lhs = self.stack.read_i64(16) as i32;
        let rhs = self.stack.read_i64(8) as i32;
        let result = op(lhs, rhs);
        self.stack.pop(16);
        self.stack.push_bytes(&result.to_le_bytes());
    }

    /// Decode, dispatch and execute one instruction. Returns `false` once
    /// the outermost function has returned.
    fn interpret_instruction(&mut self) -> Result<bool, RuntimeError> {
        let opcode = *self
            .program
            .code
            .get(self.ip as usize)
            .ok_or_else(|| RuntimeError::new(format!("Instruction pointer {} out of bounds", self.ip)))?;
        let instruction = Instruction::try_from(opcode)
            .map_err(|op| RuntimeError::new(format!("Undecodable opcode {} at {}", op, self.ip)))?;
        let mut increment_ip = true;
        match instruction {
            Instruction::PUSH_4 => {
                return Err(RuntimeError::new(
                    "PUSH_4 is only available in the compact stack mode",
                ));
            }
            Instruction::PUSH_8 => {
                let value = self.read_code_i64(self.ip + 1);
                self.stack.push_bytes(&value.to_le_bytes());
            }
            Instruction::POP_N_BELOW => {
                let len = self.read_code_i32(self.ip + 1) as usize;
                let offset = self.read_code_i32(self.ip + 5) as usize;
                self.stack.pop_below(offset, len);
            }
            Instruction::ADD_I32 => self.binary_i32(|l, r| (l.wrapping_add(r)) as i64),
            Instruction::SUB_I32 => self.binary_i32(|l, r| (l.wrapping_sub(r)) as i64),
            Instruction::MUL_I32 => self.binary_i32(|l, r| (l.wrapping_mul(r)) as i64),
            Instruction::DIV_I32 => {
                if self.stack.read_i64(8) == 0 {
                    return Err(RuntimeError::new("Division by zero"));
                }
                self.binary_i32(|l, r| l.wrapping_div(r) as i64);
            }
            Instruction::COMPARE_LESS_THAN_I32 => self.binary_i32(|l, r| (l < r) as i64),
            Instruction::COMPARE_LESS_EQUAL_THAN_I32 => self.binary_i32(|l, r| (l <= r) as i64),
            Instruction::COMPARE_MORE_THAN_I32 => self.binary_i32(|l, r| (l > r) as i64),
            Instruction::COMPARE_MORE_EQUAL_THAN_I32 => self.binary_i32(|l, r| (l >= r) as i64),
            Instruction::COMPARE_EQUALS_I32 => self.binary_i32(|l, r| (l == r) as i64),
            Instruction::COMPARE_NOT_EQUALS_I32 => self.binary_i32(|l, r| (l != r) as i64),
            Instruction::LOGICAL_AND => self.binary_i32(|l, r| (l != 0 && r != 0) as i64),
            Instruction::LOGICAL_OR => self.binary_i32(|l, r| (l != 0 || r != 0) as i64),
            Instruction::REPUSH_N => {
                let len = self.read_code_i32(self.ip + 1) as usize;
                self.stack.repush(0, len);
            }
            Instruction::REPUSH_FROM_N => {
                let len = self.read_code_i32(self.ip + 1) as usize;
                let offset = self.read_code_i32(self.ip + 5) as usize;
                self.stack.repush(offset, len);
            }
            Instruction::JUMP => {
                self.ip = self.read_code_i32(self.ip + 1);
                increment_ip = false;
            }
            Instruction::JUMP_IF_FALSE => {
                let value = self.stack.read_i64(8);
                self.stack.pop(8);
                if value == 0 {
                    self.ip = self.read_code_i32(self.ip + 1);
                    increment_ip = false;
                }
            }
            Instruction::CALL => {
                let argument_bytes = self.read_code_i32(self.ip + 1) as usize;
                // The call is the collection safe point: every frame in the
                // chain is suspended at a call site, so the stack information
                // trees describe the whole stack.
                self.gc
                    .request_collection(self.ip, &mut self.stack, &self.program);
                let function_reference = self.stack.read_i64(argument_bytes + 8);
                if function_reference % 2 != 0 {
                    // A lambda: the entry point lives in its capture block.
                    let block = (function_reference & !1) as *const u8;
                    let entry = unsafe {
                        let mut bytes = [0u8; 4];
                        std::ptr::copy_nonoverlapping(block.add(4), bytes.as_mut_ptr(), 4);
                        i32::from_le_bytes(bytes)
                    };
                    self.stack
                        .write_i64(argument_bytes + 8, (self.ip + 5) as i64);
                    self.ip = entry;
                    increment_ip = false;
                } else {
                    let id = function_reference as i32;
                    if let Some(entry) = self.function_entries.get(&id) {
                        self.stack
                            .write_i64(argument_bytes + 8, (self.ip + 5) as i64);
                        self.ip = *entry;
                        increment_ip = false;
                    } else if self.program.native_function_by_id(id).is_some() {
                        self.call_native_function(id, argument_bytes)?;
                    } else {
                        return Err(RuntimeError::new(format!(
                            "No function with id {} exists",
                            id
                        )));
                    }
                }
            }
            Instruction::RETURN => {
                let return_size = self.read_code_i32(self.ip + 1) as usize;
                if self.stack.len() == return_size {
                    // Only the outermost frame runs without a return address
                    // below its value.
                    return Ok(false);
                }
                let return_address = self.stack.read_i64(return_size + 8);
                self.stack.pop_below(return_size, 8);
                self.ip = return_address as i32;
                increment_ip = false;
            }
            Instruction::CREATE_LIST => {
                let count = self.read_code_i32(self.ip + 1) as usize;
                let element_size = self.read_code_i32(self.ip + 5) as usize;
                let mut next_ptr: u64 = 0;
                for index in 0..count {
                    let cell = self.gc.alloc((8 + element_size) as i32);
                    let element_start = self.stack.len() - (index + 1) * element_size;
                    unsafe {
                        std::ptr::copy_nonoverlapping(
                            next_ptr.to_le_bytes().as_ptr(),
                            cell,
                            8,
                        );
                        std::ptr::copy_nonoverlapping(
                            self.stack.as_slice()[element_start..].as_ptr(),
                            cell.add(8),
                            element_size,
                        );
                    }
                    next_ptr = cell as u64;
                }
                self.stack.pop(count * element_size);
                self.stack.push_bytes(&next_ptr.to_le_bytes());
            }
        }
        if increment_ip {
            self.ip += instruction.width() as i32;
        }
        Ok(true)
    }

    fn call_native_function(
        &mut self,
        id: i32,
        argument_bytes: usize,
    ) -> Result<(), RuntimeError> {
        let native = self
            .program
            .native_function_by_id(id)
            .expect("the caller checked the id");
        let (return_type, parameter_types) = match &native.datatype {
            crate::datatype::Datatype::Function(return_type, params) => {
                (return_type.as_ref().clone(), params.clone())
            }
            other => {
                return Err(RuntimeError::new(format!(
                    "Native function {} has the non-function type {}",
                    native.full_name, other
                )))
            }
        };
        let mut args = Vec::with_capacity(parameter_types.len());
        let mut offset_from_top = argument_bytes;
        let stack_slice = self.stack.as_slice();
        for parameter_type in &parameter_types {
            let start = stack_slice.len() - offset_from_top;
            let value =
                unsafe { ExternalVMValue::wrap_from_ptr(parameter_type, stack_slice[start..].as_ptr()) };
            args.push(value);
            offset_from_top -= parameter_type.size_on_stack();
        }
        let result = (native.callback.borrow_mut())(args);
        let result_bytes = result.to_stack_value();
        assert_eq!(
            result_bytes.len(),
            return_type.size_on_stack(),
            "a native function must return its declared type"
        );
        self.stack.pop(argument_bytes + 8);
        self.stack.push_bytes(&result_bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_byte_operations() {
        let mut stack = Stack::new();
        stack.push_bytes(&1i64.to_le_bytes());
        stack.push_bytes(&2i64.to_le_bytes());
        stack.push_bytes(&3i64.to_le_bytes());
        assert_eq!(stack.read_i64(8), 3);
        assert_eq!(stack.read_i64(24), 1);

        // Duplicate the middle slot onto the top.
        stack.repush(8, 8);
        assert_eq!(stack.read_i64(8), 2);
        assert_eq!(stack.len(), 32);

        // Delete the original middle slot, preserving everything above it.
        stack.pop_below(16, 8);
        assert_eq!(stack.len(), 24);
        assert_eq!(stack.read_i64(8), 2);
        assert_eq!(stack.read_i64(16), 3);
        assert_eq!(stack.read_i64(24), 1);

        stack.pop(16);
        assert_eq!(stack.len(), 8);
        assert_eq!(stack.read_i64(8), 1);
    }

    #[test]
    fn repush_grows_capacity_transparently() {
        let mut stack = Stack::new();
        stack.push_bytes(&7i64.to_le_bytes());
        for _ in 0..2000 {
            stack.repush(0, 8);
        }
        assert_eq!(stack.len(), 8 * 2001);
        assert_eq!(stack.read_i64(8), 7);
    }
}
