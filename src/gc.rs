use crate::datatype::Datatype;
use crate::instruction::Instruction;
use crate::program::Program;
use crate::util::Log;
use crate::vm::{Stack, VMParameters};
use std::collections::HashMap;

/// One semispace: a fixed, 8-aligned byte buffer with a bump offset.
#[derive(Debug, Default)]
struct Region {
    data: Vec<u64>,
    offset: usize,
}

impl Region {
    fn new(len: usize) -> Self {
        Self {
            data: vec![0u64; (len + 7) / 8],
            offset: 0,
        }
    }
    fn size(&self) -> usize {
        self.data.len() * 8
    }
    fn base(&mut self) -> *mut u8 {
        self.data.as_mut_ptr() as *mut u8
    }
    fn top(&mut self) -> *mut u8 {
        let offset = self.offset;
        unsafe { self.base().add(offset) }
    }
}

#[derive(Debug)]
struct TemporaryAllocation {
    data: Vec<u64>,
    len: usize,
}

/// The relocating two-space collector.
///
/// Allocation bumps within the active region; a request that would overflow
/// it is served from a side list of temporary allocations instead, which the
/// next collection migrates into the (possibly enlarged) reserve region and
/// frees. Collections run at call safe points once the call counter passes
/// the configured threshold: live values are traced from the value stack
/// (typed through the per-function stack information trees), every reachable
/// block is copied into the reserve region, and all pointers — including the
/// stack copies — are rewritten through the `moved_pointers` map.
pub struct GC {
    regions: [Region; 2],
    active_region: usize,
    temporary_allocations: Vec<TemporaryAllocation>,
    moved_pointers: HashMap<u64, u64>,
    function_calls_since_last_run: i32,
    config_function_calls_per_gc_run: i32,
    collections_run: usize,
    log: Log<&'static str>,
}

impl GC {
    pub fn new(params: &VMParameters) -> Self {
        Self {
            regions: [
                Region::new(params.initial_heap_size),
                Region::new(params.initial_heap_size),
            ],
            active_region: 0,
            temporary_allocations: Vec::new(),
            moved_pointers: HashMap::new(),
            function_calls_since_last_run: 0,
            config_function_calls_per_gc_run: params.function_calls_per_gc_run,
            collections_run: 0,
            log: Log::None,
        }
    }

    pub fn set_log(&mut self, log: Log<&'static str>) {
        self.log = log;
    }

    /// Bytes currently bump-allocated in the active region.
    pub fn active_region_offset(&self) -> usize {
        self.regions[self.active_region].offset
    }
    pub fn temporary_allocation_count(&self) -> usize {
        self.temporary_allocations.len()
    }
    pub fn collections_run(&self) -> usize {
        self.collections_run
    }

    /// Bump-allocate `size` bytes. Sizes stay even so the low pointer bit is
    /// free for tagging. Never collects; an allocation that doesn't fit goes
    /// to the temporary list until the next collection migrates it.
    pub fn alloc(&mut self, size: i32) -> *mut u8 {
        let mut size = size as usize;
        if size % 2 == 1 {
            size += 1;
        }
        let active = &mut self.regions[self.active_region];
        if active.offset + size >= active.size() {
            let mut temporary = TemporaryAllocation {
                data: vec![0u64; (size + 7) / 8],
                len: size,
            };
            let ptr = temporary.data.as_mut_ptr() as *mut u8;
            self.temporary_allocations.push(temporary);
            return ptr;
        }
        let ptr = active.top();
        active.offset += size;
        ptr
    }

    /// The call-counting collection trigger; invoked by the VM on every
    /// `CALL` before the function reference slot is rewritten.
    pub fn request_collection(&mut self, ip: i32, stack: &mut Stack, program: &Program) {
        self.function_calls_since_last_run += 1;
        if self.function_calls_since_last_run > self.config_function_calls_per_gc_run {
            self.perform_collection(ip, stack, program);
            self.function_calls_since_last_run = 0;
        }
    }

    pub fn perform_collection(&mut self, ip: i32, stack: &mut Stack, program: &Program) {
        #[cfg(debug_assertions)]
        if self.log.order() >= Log::Default(()).order() {
            println!(
                "[{}] collecting at ip {}; {} bytes active, {} temporaries",
                self.log,
                ip,
                self.active_region_offset(),
                self.temporary_allocations.len()
            );
        }
        let active_size = self.regions[self.active_region].size();
        let other = 1 - self.active_region;
        self.regions[other].offset = 0;
        if !self.temporary_allocations.is_empty() || self.regions[other].size() < active_size {
            // The target region might not fit everything; resize it to the
            // active size plus every temporary allocation.
            let temporary_size: usize = self.temporary_allocations.iter().map(|t| t.len).sum();
            self.regions[other] = Region::new(active_size + temporary_size);
        }
        self.moved_pointers.clear();
        for (address, datatype) in collect_roots(ip, stack, program) {
            self.search_for_ptrs(address as *mut u8, &datatype, program);
        }
        self.active_region = 1 - self.active_region;
        self.temporary_allocations.clear();
        self.collections_run += 1;
    }

    fn other_region(&mut self) -> &mut Region {
        &mut self.regions[1 - self.active_region]
    }

    /// Evacuate `len` bytes at `ptr` into the reserve region and remember
    /// the move.
    fn copy_to_other(&mut self, ptr: u64, len: usize) -> u64 {
        debug_assert!(!self.moved_pointers.contains_key(&ptr));
        let other = self.other_region();
        assert!(
            other.size() >= other.offset + len,
            "the reserve region must have been sized to hold every live byte"
        );
        let new_ptr = other.top();
        unsafe {
            std::ptr::copy_nonoverlapping(ptr as *const u8, new_ptr, len);
        }
        other.offset += len;
        self.moved_pointers.insert(ptr, new_ptr as u64);
        new_ptr as u64
    }

    /// Trace one typed slot: follow every heap pointer inside it, evacuate
    /// what it reaches and rewrite the pointers in place.
    fn search_for_ptrs(&mut self, ptr: *mut u8, datatype: &Datatype, program: &Program) {
        match datatype {
            Datatype::I32
            | Datatype::I64
            | Datatype::F32
            | Datatype::F64
            | Datatype::Char
            | Datatype::Bool
            | Datatype::Byte => {}
            Datatype::Tuple(types) => {
                let mut offset = datatype.size_on_stack();
                for element in types {
                    offset -= element.size_on_stack();
                    self.search_for_ptrs(unsafe { ptr.add(offset) }, element, program);
                }
            }
            Datatype::Str => {
                // Strings are character lists at runtime.
                self.search_for_ptrs(ptr, &Datatype::list(Datatype::Char), program)
            }
            Datatype::List(contained) => {
                let element_size = contained.size_on_stack();
                let mut ptr_to_current = ptr;
                loop {
                    let current = read_u64(ptr_to_current);
                    if current == 0 {
                        break;
                    }
                    if let Some(new_ptr) = self.moved_pointers.get(&current) {
                        write_u64(ptr_to_current, *new_ptr);
                        break;
                    }
                    self.search_for_ptrs(
                        unsafe { (current as *mut u8).add(8) },
                        contained,
                        program,
                    );
                    let new_ptr = self.copy_to_other(current, element_size + 8);
                    write_u64(ptr_to_current, new_ptr);
                    ptr_to_current = new_ptr as *mut u8;
                }
            }
            Datatype::Function(..) => {
                let value = read_u64(ptr);
                if value % 2 == 0 {
                    // A plain function id; nothing lives on the heap.
                    return;
                }
                let block = value & !1;
                if let Some(new_ptr) = self.moved_pointers.get(&block) {
                    write_u64(ptr, new_ptr | 1);
                    return;
                }
                let captured_size = read_i32(block as *const u8) as usize;
                let total_size = captured_size + 16;
                let aux_type_id = read_i32(unsafe { (block as *const u8).add(8) }) as usize;
                let capture_layout = program.auxiliary_types[aux_type_id].clone();
                let mut offset = total_size;
                for captured in capture_layout.tuple_info() {
                    offset -= captured.size_on_stack();
                    self.search_for_ptrs(
                        unsafe { (block as *mut u8).add(offset) },
                        captured,
                        program,
                    );
                }
                let new_ptr = self.copy_to_other(block, total_size);
                write_u64(ptr, new_ptr | 1);
            }
            Datatype::Struct(info) => {
                let mut offset = datatype.size_on_stack();
                for index in 0..info.fields.len() {
                    let field_type = info.field_type(index);
                    offset -= field_type.size_on_stack();
                    self.search_for_ptrs(unsafe { ptr.add(offset) }, &field_type, program);
                }
            }
            Datatype::Enum(info) => {
                let selected = read_u64(ptr) as usize;
                let mut offset = info.largest_field_size_plus_index();
                for index in 0..info.variants[selected].params.len() {
                    let param_type = info.variant_param_type(selected, index);
                    offset -= param_type.size_on_stack();
                    self.search_for_ptrs(unsafe { ptr.add(offset) }, &param_type, program);
                }
            }
            Datatype::Pointer(base) => {
                let value = read_u64(ptr);
                if value == 0 {
                    return;
                }
                if let Some(new_ptr) = self.moved_pointers.get(&value) {
                    write_u64(ptr, *new_ptr);
                    return;
                }
                self.search_for_ptrs(value as *mut u8, base, program);
                let new_ptr = self.copy_to_other(value, base.size_on_stack());
                write_u64(ptr, new_ptr);
            }
            Datatype::UndeterminedIdentifier(name) => {
                let completed = datatype.complete_with_saved_template_parameters();
                if completed.has_undetermined_template_types() {
                    panic!("The type '{}' never got determined before collection", name);
                }
                self.search_for_ptrs(ptr, &completed, program);
            }
        }
    }
}

/// Walk the call chain and report every typed live stack slot as an
/// (absolute address, datatype) root.
///
/// The innermost frame is described by its stack information tree at the
/// current ip. Each caller is reached through the return address that sits
/// below the callee's arguments; it is described at its own `CALL` ip, and
/// truncated below its function-reference slot, because that slot holds the
/// return address (not a function value) while the callee runs — and the
/// argument bytes above it already belong to the callee's frame.
fn collect_roots(ip: i32, stack: &mut Stack, program: &Program) -> Vec<(usize, Datatype)> {
    let mut roots = Vec::new();
    let base = stack.base_ptr() as usize;
    let mut frame_ip = ip;
    let mut truncate_at: Option<usize> = None;

    let innermost = program
        .function_containing_ip(frame_ip)
        .expect("the instruction pointer is inside a compiled function");
    let height = innermost.stack_information.stack_size_at(frame_ip) as usize;
    assert!(height <= stack.len(), "stack bookkeeping out of sync");
    let mut frame_base = stack.len() - height;

    loop {
        let function = program
            .function_containing_ip(frame_ip)
            .expect("every frame belongs to a compiled function");
        for (stack_size_after, entry) in function.stack_information.live_entries_at(frame_ip) {
            let end = frame_base + stack_size_after as usize;
            if let Some(limit) = truncate_at {
                if end > limit {
                    continue;
                }
            }
            let size = entry.datatype.size_on_stack();
            roots.push((base + end - size, entry.datatype.clone()));
        }
        if frame_base == 0 {
            break;
        }
        let return_address = i64::from_le_bytes(
            stack.as_slice()[frame_base - 8..frame_base]
                .try_into()
                .expect("8 bytes are 8 bytes"),
        ) as i32;
        let caller_ip = return_address - Instruction::CALL.width() as i32;
        let argument_bytes = i32::from_le_bytes(
            program.code[caller_ip as usize + 1..caller_ip as usize + 5]
                .try_into()
                .expect("4 bytes are 4 bytes"),
        ) as usize;
        let caller = program
            .function_containing_ip(caller_ip)
            .expect("return addresses point back into compiled code");
        let caller_height = caller.stack_information.stack_size_at(caller_ip) as usize;
        truncate_at = Some(frame_base - 8);
        frame_base = frame_base + argument_bytes - caller_height;
        frame_ip = caller_ip;
    }
    roots
}

fn read_u64(ptr: *const u8) -> u64 {
    let mut bytes = [0u8; 8];
    unsafe {
        std::ptr::copy_nonoverlapping(ptr, bytes.as_mut_ptr(), 8);
    }
    u64::from_le_bytes(bytes)
}

fn write_u64(ptr: *mut u8, value: u64) {
    unsafe {
        std::ptr::copy_nonoverlapping(value.to_le_bytes().as_ptr(), ptr, 8);
    }
}

fn read_i32(ptr: *const u8) -> i32 {
    let mut bytes = [0u8; 4];
    unsafe {
        std::ptr::copy_nonoverlapping(ptr, bytes.as_mut_ptr(), 4);
    }
    i32::from_le_bytes(bytes)
}
