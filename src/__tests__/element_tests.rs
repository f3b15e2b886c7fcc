use crate::datatype::{Datatype, StructField, TemplateParamMap};

#[test]
fn template_type_inference_binds_parameters() {
    let incomplete = Datatype::Tuple(vec![
        Datatype::undetermined("T"),
        Datatype::undetermined("S"),
    ]);
    let full = Datatype::Tuple(vec![Datatype::I32, Datatype::I64]);
    let mut map = TemplateParamMap::new();
    incomplete.infer_template_types(&full, &mut map).unwrap();
    assert_eq!(map.len(), 2);
    assert_eq!(map["T"], Datatype::I32);
    assert_eq!(map["S"], Datatype::I64);
}

#[test]
fn template_type_inference_rejects_shape_mismatches() {
    let incomplete = Datatype::Tuple(vec![
        Datatype::undetermined("T"),
        Datatype::undetermined("S"),
    ]);
    let mut map = TemplateParamMap::new();
    assert!(incomplete
        .infer_template_types(&Datatype::I64, &mut map)
        .is_err());
}

#[test]
fn template_type_inference_rejects_conflicting_bindings() {
    let incomplete = Datatype::Tuple(vec![
        Datatype::undetermined("T"),
        Datatype::undetermined("T"),
    ]);
    let full = Datatype::Tuple(vec![Datatype::I32, Datatype::I64]);
    let mut map = TemplateParamMap::new();
    assert!(incomplete.infer_template_types(&full, &mut map).is_err());
}

#[test]
fn inference_and_completion_round_trip() {
    let pattern = Datatype::function(
        Datatype::undetermined("R"),
        vec![Datatype::list(Datatype::undetermined("T"))],
    );
    let instance = Datatype::function(Datatype::Bool, vec![Datatype::list(Datatype::I32)]);
    let mut map = TemplateParamMap::new();
    pattern.infer_template_types(&instance, &mut map).unwrap();
    assert_eq!(pattern.complete_with_template_parameters(&map), instance);
}

#[test]
fn completion_substitutes_recursively() {
    let mut map = TemplateParamMap::new();
    map.insert("T".to_string(), Datatype::I32);
    let datatype = Datatype::Tuple(vec![
        Datatype::list(Datatype::undetermined("T")),
        Datatype::function(Datatype::undetermined("T"), vec![Datatype::Bool]),
    ]);
    let completed = datatype.complete_with_template_parameters(&map);
    assert_eq!(
        completed,
        Datatype::Tuple(vec![
            Datatype::list(Datatype::I32),
            Datatype::function(Datatype::I32, vec![Datatype::Bool]),
        ])
    );
    assert!(!completed.has_undetermined_template_types());
    assert!(datatype.has_undetermined_template_types());
}

#[test]
fn structs_capture_their_template_environment() {
    let datatype = Datatype::struct_type(
        "Box",
        vec![StructField {
            name: "value".to_string(),
            datatype: Datatype::undetermined("T"),
        }],
        vec!["T".to_string()],
    );
    assert!(datatype.has_undetermined_template_types());

    let mut map = TemplateParamMap::new();
    map.insert("T".to_string(), Datatype::I64);
    let completed = datatype.complete_with_template_parameters(&map);
    assert!(!completed.has_undetermined_template_types());
    // The field resolves lazily, in the captured environment.
    match &completed {
        Datatype::Struct(info) => assert_eq!(info.field_type(0), Datatype::I64),
        other => panic!("expected a struct, got {}", other),
    }
}

#[test]
fn stack_sizes_follow_the_slot_discipline() {
    assert_eq!(Datatype::I32.size_on_stack(), 8);
    assert_eq!(Datatype::Bool.size_on_stack(), 8);
    assert_eq!(Datatype::list(Datatype::I32).size_on_stack(), 8);
    assert_eq!(
        Datatype::function(Datatype::I32, vec![Datatype::I32]).size_on_stack(),
        8
    );
    assert_eq!(
        Datatype::Tuple(vec![Datatype::I32, Datatype::I64, Datatype::Bool]).size_on_stack(),
        24
    );
    assert_eq!(Datatype::empty_tuple().size_on_stack(), 0);
}

#[test]
fn datatypes_render_their_source_syntax() {
    assert_eq!(
        Datatype::function(Datatype::I32, vec![Datatype::I32, Datatype::Bool]).to_string(),
        "fn(i32,bool) -> i32"
    );
    assert_eq!(
        Datatype::Tuple(vec![Datatype::I32, Datatype::I64]).to_string(),
        "(i32,i64)"
    );
    assert_eq!(Datatype::list(Datatype::I32).to_string(), "[i32]");
    assert_eq!(
        Datatype::undetermined("T").to_string(),
        "<undetermined 'T'>"
    );
}

#[test]
fn equality_is_structural() {
    assert_eq!(
        Datatype::Tuple(vec![Datatype::I32]),
        Datatype::Tuple(vec![Datatype::I32])
    );
    assert_ne!(
        Datatype::Tuple(vec![Datatype::I32]),
        Datatype::Tuple(vec![Datatype::I64])
    );
    assert_ne!(
        Datatype::function(Datatype::I32, vec![]),
        Datatype::function(Datatype::I64, vec![])
    );
}
