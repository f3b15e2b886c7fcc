use crate::datatype::{Datatype, EnumVariant};
use crate::external_value::ExternalVMValue;
use crate::gc::GC;
use crate::instruction::Instruction;
use crate::program::{Function, Program};
use crate::stack_info::{StackInformationTree, StorageType, VariableEntry};
use crate::vm::{Stack, VMParameters};
use std::collections::BTreeMap;

/// A one-function program whose stack information tree describes the slots a
/// test pushes by hand; ip 0 sits inside the function.
fn test_program(slots: &[(i32, Datatype)], auxiliary_types: Vec<Datatype>) -> Program {
    let mut tree = StackInformationTree::new(0);
    let root = tree.root();
    for (stack_size_after, datatype) in slots {
        tree.add_child(
            root,
            0,
            *stack_size_after,
            Some(VariableEntry {
                name: None,
                datatype: datatype.clone(),
                storage: StorageType::ImplicitlyCopied,
            }),
            false,
        );
    }
    let mut functions = BTreeMap::new();
    functions.insert(
        "Test.roots".to_string(),
        Function {
            name: "roots".to_string(),
            id: 0,
            offset: 0,
            len: 5,
            return_type: Datatype::empty_tuple(),
            return_type_size: 0,
            parameter_types: Vec::new(),
            template_parameters: BTreeMap::new(),
            stack_information: tree,
        },
    );
    Program {
        code: vec![Instruction::RETURN as u8, 0, 0, 0, 0],
        functions,
        auxiliary_types,
        native_functions: Vec::new(),
    }
}

fn params(initial_heap_size: usize) -> VMParameters {
    VMParameters {
        initial_heap_size,
        function_calls_per_gc_run: 1,
    }
}

fn write_cell(cell: *mut u8, next: u64, value: i64) {
    unsafe {
        std::ptr::copy_nonoverlapping(next.to_le_bytes().as_ptr(), cell, 8);
        std::ptr::copy_nonoverlapping(value.to_le_bytes().as_ptr(), cell.add(8), 8);
    }
}

#[test]
fn shared_lists_are_copied_once() {
    let mut gc = GC::new(&params(1024));
    let cell = gc.alloc(16);
    write_cell(cell, 0, 42);

    let mut stack = Stack::new();
    stack.push_bytes(&(cell as u64).to_le_bytes());
    stack.push_bytes(&(cell as u64).to_le_bytes());
    let list_type = Datatype::list(Datatype::I32);
    let program = test_program(&[(8, list_type.clone()), (16, list_type.clone())], Vec::new());

    gc.perform_collection(0, &mut stack, &program);

    let first = stack.read_i64(16) as u64;
    let second = stack.read_i64(8) as u64;
    assert_eq!(first, second, "both slots must agree after forwarding");
    assert_ne!(first, cell as u64, "the cell must have moved");
    // Exactly one copy of the one live cell.
    assert_eq!(gc.active_region_offset(), 16);

    let bytes = first.to_le_bytes();
    let wrapped = unsafe { ExternalVMValue::wrap_from_ptr(&list_type, bytes.as_ptr()) };
    assert_eq!(wrapped.dump(), "[42]");
}

#[test]
fn unreachable_blocks_are_dropped() {
    let mut gc = GC::new(&params(1024));
    let live = gc.alloc(16);
    write_cell(live, 0, 1);
    let garbage = gc.alloc(16);
    write_cell(garbage, 0, 2);
    assert_eq!(gc.active_region_offset(), 32);

    let mut stack = Stack::new();
    stack.push_bytes(&(live as u64).to_le_bytes());
    let program = test_program(&[(8, Datatype::list(Datatype::I32))], Vec::new());
    gc.perform_collection(0, &mut stack, &program);

    // Only the reachable cell survived into the new active region.
    assert_eq!(gc.active_region_offset(), 16);
}

#[test]
fn plain_function_references_have_no_heap_part() {
    let mut gc = GC::new(&params(1024));
    let mut stack = Stack::new();
    stack.push_bytes(&6i64.to_le_bytes()); // an even, tag-free function id
    let function_type = Datatype::function(Datatype::I32, vec![Datatype::I32]);
    let program = test_program(&[(8, function_type)], Vec::new());

    gc.perform_collection(0, &mut stack, &program);
    assert_eq!(stack.read_i64(8), 6, "plain ids pass through unchanged");
    assert_eq!(gc.active_region_offset(), 0);
}

#[test]
fn lambda_blocks_are_forwarded_with_their_captures() {
    // Capture layout: (i32, [i32]). Block layout:
    // [captured size:4][entry ip:4][aux type id:4][pad:4][list][i32].
    let auxiliary_types = vec![Datatype::Tuple(vec![
        Datatype::I32,
        Datatype::list(Datatype::I32),
    ])];
    let mut gc = GC::new(&params(1024));

    let captured_list = gc.alloc(16);
    write_cell(captured_list, 0, 9);

    let block = gc.alloc(32);
    unsafe {
        std::ptr::copy_nonoverlapping(16i32.to_le_bytes().as_ptr(), block, 4);
        std::ptr::copy_nonoverlapping(77i32.to_le_bytes().as_ptr(), block.add(4), 4);
        std::ptr::copy_nonoverlapping(0i32.to_le_bytes().as_ptr(), block.add(8), 4);
        std::ptr::copy_nonoverlapping((captured_list as u64).to_le_bytes().as_ptr(), block.add(16), 8);
        std::ptr::copy_nonoverlapping(5i64.to_le_bytes().as_ptr(), block.add(24), 8);
    }

    let mut stack = Stack::new();
    stack.push_bytes(&((block as u64) | 1).to_le_bytes());
    let function_type = Datatype::function(Datatype::I32, vec![]);
    let program = test_program(&[(8, function_type)], auxiliary_types);

    gc.perform_collection(0, &mut stack, &program);

    let forwarded = stack.read_i64(8) as u64;
    assert_eq!(forwarded & 1, 1, "the lambda tag bit survives forwarding");
    let new_block = (forwarded & !1) as *const u8;
    assert_ne!(new_block as u64, block as u64);
    unsafe {
        let read_i32 = |ptr: *const u8| {
            let mut bytes = [0u8; 4];
            std::ptr::copy_nonoverlapping(ptr, bytes.as_mut_ptr(), 4);
            i32::from_le_bytes(bytes)
        };
        let read_i64_at = |ptr: *const u8| {
            let mut bytes = [0u8; 8];
            std::ptr::copy_nonoverlapping(ptr, bytes.as_mut_ptr(), 8);
            i64::from_le_bytes(bytes)
        };
        assert_eq!(read_i32(new_block), 16);
        assert_eq!(read_i32(new_block.add(4)), 77);
        assert_eq!(read_i32(new_block.add(8)), 0);
        assert_eq!(read_i64_at(new_block.add(24)), 5);
        // The captured list was evacuated too and the capture slot patched.
        let new_list = read_i64_at(new_block.add(16)) as u64;
        assert_ne!(new_list, captured_list as u64);
        assert_eq!(read_i64_at((new_list as *const u8).add(8)), 9);
    }
    // One 16-byte cell plus the 32-byte block.
    assert_eq!(gc.active_region_offset(), 48);
}

#[test]
fn pointers_are_forwarded() {
    let mut gc = GC::new(&params(1024));
    let pointee = gc.alloc(8);
    unsafe {
        std::ptr::copy_nonoverlapping(99i64.to_le_bytes().as_ptr(), pointee, 8);
    }
    let mut stack = Stack::new();
    stack.push_bytes(&(pointee as u64).to_le_bytes());
    let program = test_program(&[(8, Datatype::pointer(Datatype::I64))], Vec::new());

    gc.perform_collection(0, &mut stack, &program);

    let forwarded = stack.read_i64(8) as u64;
    assert_ne!(forwarded, pointee as u64);
    let wrapped =
        unsafe { ExternalVMValue::wrap_from_ptr(&Datatype::I64, forwarded as *const u8) };
    assert_eq!(wrapped.as_i64(), Some(99));
}

#[test]
fn enums_trace_only_the_selected_variant() {
    // enum Shape { Scalar(i32), Listy([i32]) }, 16 bytes on the stack.
    let enum_type = Datatype::enum_type(
        "Shape",
        vec![
            EnumVariant {
                name: "Scalar".to_string(),
                params: vec![Datatype::I32],
            },
            EnumVariant {
                name: "Listy".to_string(),
                params: vec![Datatype::list(Datatype::I32)],
            },
        ],
        Vec::new(),
    );
    assert_eq!(enum_type.size_on_stack(), 16);

    let mut gc = GC::new(&params(1024));
    let cell = gc.alloc(16);
    write_cell(cell, 0, 7);

    let mut stack = Stack::new();
    stack.push_bytes(&1i64.to_le_bytes()); // discriminant: Listy
    stack.push_bytes(&(cell as u64).to_le_bytes());
    let program = test_program(&[(16, enum_type.clone())], Vec::new());

    gc.perform_collection(0, &mut stack, &program);

    assert_eq!(stack.read_i64(16), 1, "the discriminant is untouched");
    assert_ne!(stack.read_i64(8) as u64, cell as u64);
    let wrapped =
        unsafe { ExternalVMValue::wrap_from_ptr(&enum_type, stack.as_slice().as_ptr()) };
    assert_eq!(wrapped.dump(), "Listy([7])");
}

#[test]
fn oversize_allocations_migrate_into_the_next_heap() {
    // An 8-byte heap can't hold a 16-byte cons cell.
    let mut gc = GC::new(&params(8));
    let cell = gc.alloc(16);
    write_cell(cell, 0, 11);
    assert_eq!(gc.temporary_allocation_count(), 1);

    let mut stack = Stack::new();
    stack.push_bytes(&(cell as u64).to_le_bytes());
    let list_type = Datatype::list(Datatype::I32);
    let program = test_program(&[(8, list_type.clone())], Vec::new());

    gc.perform_collection(0, &mut stack, &program);

    assert_eq!(gc.temporary_allocation_count(), 0);
    assert_eq!(gc.active_region_offset(), 16);
    let forwarded = stack.read_i64(8) as u64;
    assert_ne!(forwarded, cell as u64);
    let bytes = forwarded.to_le_bytes();
    let wrapped = unsafe { ExternalVMValue::wrap_from_ptr(&list_type, bytes.as_ptr()) };
    assert_eq!(wrapped.dump(), "[11]");
}

#[test]
fn strings_are_traced_as_character_lists() {
    let mut gc = GC::new(&params(1024));
    let cell = gc.alloc(16);
    write_cell(cell, 0, 'x' as i64);

    let mut stack = Stack::new();
    stack.push_bytes(&(cell as u64).to_le_bytes());
    let program = test_program(&[(8, Datatype::Str)], Vec::new());

    gc.perform_collection(0, &mut stack, &program);
    assert_ne!(stack.read_i64(8) as u64, cell as u64);
    assert_eq!(gc.active_region_offset(), 16);
}

#[test]
fn long_lists_are_forwarded_link_by_link() {
    // A longer chain exercises predecessor patching link by link.
    let mut gc = GC::new(&params(4096));
    let mut next = 0u64;
    let mut head = std::ptr::null_mut();
    for value in (0..10).rev() {
        let cell = gc.alloc(16);
        write_cell(cell, next, value);
        next = cell as u64;
        head = cell;
    }
    let mut stack = Stack::new();
    stack.push_bytes(&(head as u64).to_le_bytes());
    let list_type = Datatype::list(Datatype::I32);
    let program = test_program(&[(8, list_type.clone())], Vec::new());

    gc.perform_collection(0, &mut stack, &program);

    assert_eq!(gc.active_region_offset(), 160);
    let forwarded = stack.read_i64(8).to_le_bytes();
    let wrapped = unsafe { ExternalVMValue::wrap_from_ptr(&list_type, forwarded.as_ptr()) };
    assert_eq!(wrapped.dump(), "[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]");
}
