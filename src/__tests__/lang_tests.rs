use crate::external_value::ExternalVMValue;
use crate::parser::Parser;
use crate::pipeline::Pipeline;
use crate::vm::{VMParameters, VM};

fn compile(code: &str, params: VMParameters) -> VM {
    let mut pipeline = Pipeline::new();
    pipeline.add_file_from_memory("Main", code).unwrap();
    pipeline.compile(params).unwrap()
}

fn run_i32(vm: &mut VM, name: &str, args: &[i32]) -> i32 {
    let args: Vec<ExternalVMValue> = args.iter().map(|&a| ExternalVMValue::wrap_int32(a)).collect();
    vm.run_external(name, &args)
        .unwrap()
        .as_i32()
        .expect("an i32 result")
}

#[test]
fn identity_function() {
    let mut vm = compile("fn a(n: i32) -> i32 { n }", VMParameters::default());
    assert_eq!(run_i32(&mut vm, "a", &[5]), 5);

    // The raw byte interface: one packed 8-byte slot in, return-size bytes out.
    let result = vm.run("a", 5i64.to_le_bytes().to_vec()).unwrap();
    assert_eq!(result, 5i64.to_le_bytes().to_vec());
}

#[test]
fn fibonacci() {
    let mut vm = compile(
        "fn fib(n:i32)->i32{ if n<2 { n } else { fib(n-1)+fib(n-2) } }",
        VMParameters::default(),
    );
    assert_eq!(run_i32(&mut vm, "fib", &[10]), 55);
}

#[test]
fn scopes_and_shadowing() {
    let mut vm = compile(
        r"
fn magicNumber(p : i32) -> i32 {
  x = p + 1
  i = if 10 < 5 {
    3
  } else {
    x = 3
    p + x
  }
  x + i + p
}",
        VMParameters::default(),
    );
    // x = 6, the inner x = 3 shadows only inside the else scope, i = 8.
    assert_eq!(run_i32(&mut vm, "magicNumber", &[5]), 19);
}

#[test]
fn else_if_chains() {
    let mut vm = compile(
        r"
fn classify(n : i32) -> i32 {
  if n < 0 {
    0
  } else if n == 0 {
    1
  } else {
    2
  }
}",
        VMParameters::default(),
    );
    assert_eq!(run_i32(&mut vm, "classify", &[-7]), 0);
    assert_eq!(run_i32(&mut vm, "classify", &[0]), 1);
    assert_eq!(run_i32(&mut vm, "classify", &[3]), 2);
}

#[test]
fn arithmetic_and_logic() {
    let mut vm = compile(
        r"
fn calc(a : i32, b : i32, c : i32) -> i32 {
  a * b / c - 1
}
fn inRange(n : i32) -> bool {
  0 <= n && n < 10 || n == 42
}",
        VMParameters::default(),
    );
    assert_eq!(run_i32(&mut vm, "calc", &[6, 4, 2]), 11);
    // Operator chains associate to the right, as the grammar reads:
    // 6 * (4 / 3) - 1.
    assert_eq!(run_i32(&mut vm, "calc", &[6, 4, 3]), 5);
    for (n, expected) in [(5, true), (12, false), (42, true)] {
        let result = vm
            .run_external("inRange", &[ExternalVMValue::wrap_int32(n)])
            .unwrap();
        assert_eq!(result.as_bool(), Some(expected), "inRange({})", n);
    }
}

#[test]
fn chained_calls_return_functions() {
    let mut vm = compile(
        r"
fn add(a : i32) -> fn(i32) -> i32 {
  add2
}
fn add2(b : i32) -> i32 {
  b + 2
}
fn go(n : i32) -> i32 {
  add(n)(n)
}",
        VMParameters::default(),
    );
    assert_eq!(run_i32(&mut vm, "go", &[5]), 7);
}

#[test]
fn tuples_round_trip() {
    let mut vm = compile(
        r"
fn pair(a : i32, b : i32) -> (i32, i32) {
  (a, b)
}
fn first(p : (i32, i32)) -> i32 {
  swallow(p)
}
fn swallow(p : (i32, i32)) -> i32 {
  99
}",
        VMParameters::default(),
    );
    let result = vm
        .run_external(
            "pair",
            &[ExternalVMValue::wrap_int32(1), ExternalVMValue::wrap_int32(2)],
        )
        .unwrap();
    assert_eq!(result.dump(), "(1, 2)");

    let tuple = ExternalVMValue::wrap_tuple(vec![
        ExternalVMValue::wrap_int32(8),
        ExternalVMValue::wrap_int32(9),
    ]);
    let result = vm.run_external("first", &[tuple]).unwrap();
    assert_eq!(result.as_i32(), Some(99));
}

#[test]
fn unit_functions() {
    let mut vm = compile(
        r"
fn nothing(p : i32) -> () {
  ()
}",
        VMParameters::default(),
    );
    let result = vm
        .run_external("nothing", &[ExternalVMValue::wrap_int32(1)])
        .unwrap();
    assert_eq!(result.to_stack_value().len(), 0);
}

#[test]
fn lists_materialise_on_the_heap() {
    let mut vm = compile(
        r"
fn makeList(a : i32) -> [i32] {
  [a, a + 1, a + 2]
}
fn emptyList() -> [i32] {
  [:i32]
}",
        VMParameters::default(),
    );
    let result = vm
        .run_external("makeList", &[ExternalVMValue::wrap_int32(5)])
        .unwrap();
    assert_eq!(result.dump(), "[5, 6, 7]");
    let result = vm.run_external("emptyList", &[]).unwrap();
    assert_eq!(result.dump(), "[]");
}

#[test]
fn lists_survive_collections() {
    // One collection opportunity per call: the recursion below forces many
    // cycles while xs sits live on the stack.
    let params = VMParameters {
        initial_heap_size: 4 * 1024,
        function_calls_per_gc_run: 1,
    };
    let mut vm = compile(
        r"
fn deep(n : i32) -> i32 {
  if n < 1 {
    0
  } else {
    deep(n - 1)
  }
}
fn keep(a : i32) -> [i32] {
  xs = [a, a + 1]
  d = deep(50)
  xs
}",
        params,
    );
    let result = vm
        .run_external("keep", &[ExternalVMValue::wrap_int32(7)])
        .unwrap();
    assert_eq!(result.dump(), "[7, 8]");
    assert!(vm.gc().collections_run() > 0);
}

#[test]
fn oversize_allocations_live_as_temporaries_until_collected() {
    // A heap too small for even one cons cell: every allocation takes the
    // temporary path and the next collection migrates the live ones.
    let params = VMParameters {
        initial_heap_size: 8,
        function_calls_per_gc_run: 1,
    };
    let mut vm = compile(
        r"
fn deep(n : i32) -> i32 {
  if n < 1 {
    0
  } else {
    deep(n - 1)
  }
}
fn keep(a : i32) -> [i32] {
  xs = [a, a + 1, a + 2]
  d = deep(10)
  xs
}",
        params,
    );
    let result = vm
        .run_external("keep", &[ExternalVMValue::wrap_int32(1)])
        .unwrap();
    assert_eq!(result.dump(), "[1, 2, 3]");
    assert!(vm.gc().collections_run() > 0);
    assert_eq!(vm.gc().temporary_allocation_count(), 0);
}

#[test]
fn native_functions_are_callable() {
    let mut pipeline = Pipeline::new();
    let triple_type = pipeline.type_from_string("fn(i32) -> i32").unwrap();
    pipeline.add_native_function(
        "Math",
        "triple",
        triple_type,
        Box::new(|args| ExternalVMValue::wrap_int32(args[0].as_i32().unwrap() * 3)),
    );
    pipeline
        .add_file_from_memory(
            "Main",
            r"
fn go(n : i32) -> i32 {
  Math.triple(n) + 1
}",
        )
        .unwrap();
    let mut vm = pipeline.compile(VMParameters::default()).unwrap();
    assert_eq!(run_i32(&mut vm, "go", &[5]), 16);
}

#[test]
fn unknown_functions_are_runtime_errors() {
    let mut vm = compile("fn a(n: i32) -> i32 { n }", VMParameters::default());
    let error = vm.run("nope", Vec::new()).err().unwrap();
    assert!(error.message.contains("not found"));
}

#[test]
fn parsed_modules_render_as_trees() {
    let parser = Parser::new();
    let module = parser
        .parse("Main", "fn a(n: i32) -> i32 { n }")
        .unwrap();
    let rendered = module.dump_tree().render();
    assert!(rendered.contains("Module Main"), "{}", rendered);
    assert!(rendered.contains("FunctionDeclaration a -> i32"), "{}", rendered);
    assert!(rendered.contains("Param n: i32"), "{}", rendered);
    assert!(rendered.contains("Identifier n"), "{}", rendered);
}

#[test]
fn missing_if_body_reports_expected_expression() {
    let parser = Parser::new();
    let failure = parser.parse_expression("if true").err().unwrap();
    assert!(
        failure.rendered.contains("Expected Expression"),
        "rendered error:\n{}",
        failure.rendered
    );
}

#[test]
fn parse_failures_render_a_tree() {
    let mut pipeline = Pipeline::new();
    let failure = pipeline
        .add_file_from_memory("Main", "fn a( -> i32 { 5 }")
        .err()
        .unwrap();
    assert!(!failure.rendered.is_empty());
    assert!(failure.to_string().starts_with("SyntaxError"));
}

#[test]
fn division_by_zero_is_a_runtime_error() {
    let mut vm = compile(
        "fn div(a : i32, b : i32) -> i32 { a / b }",
        VMParameters::default(),
    );
    assert_eq!(run_i32(&mut vm, "div", &[10, 2]), 5);
    let error = vm
        .run_external(
            "div",
            &[ExternalVMValue::wrap_int32(1), ExternalVMValue::wrap_int32(0)],
        )
        .err()
        .unwrap();
    assert!(error.message.contains("zero"));
}
