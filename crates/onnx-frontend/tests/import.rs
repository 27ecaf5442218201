use onnx_frontend::builder::{GraphBuilder, NodeBuilder};
use onnx_frontend::protos::GraphProto;
use onnx_frontend::{
    Attributes, ConversionError, ConversionRule, ConvertContext, ImportError, ImportWarning,
    Importer, Inputs, OperatorRegistry, RegistryError,
};
use pretty_assertions::assert_eq;
use protobuf::Message;
use rstest::rstest;
use tensor_ir::{DType, Expr, Op, OpAttrs, TensorData, evaluate};

fn floats(values: &[f32], shape: &[usize]) -> TensorData {
    TensorData::from_vec(values.to_vec(), shape).unwrap()
}

/// `y = x + w` with `w` an initializer.
fn add_weight_graph() -> GraphProto {
    GraphBuilder::new("add_weight")
        .input("x", DType::Float32, &[2])
        .initializer("w", &floats(&[10.0, 20.0], &[2]))
        .node(NodeBuilder::new("Add").inputs(&["x", "w"]).output("y").build())
        .output("y")
        .build()
}

#[rstest]
#[case::frozen(true)]
#[case::parameterized(false)]
fn lone_initializer_round_trips(#[case] freeze: bool) {
    let value = floats(&[1.0, 2.0, 3.0], &[3]);
    let graph = GraphBuilder::new("g")
        .initializer("w", &value)
        .output("w")
        .build();

    let imported = Importer::new()
        .freeze_params(freeze)
        .import_graph(&graph, 13)
        .unwrap();

    if freeze {
        assert!(imported.function.params.is_empty());
        assert!(imported.params.is_empty());
        assert_eq!(imported.function.body.as_constant(), Some(&value));
    } else {
        assert_eq!(imported.function.params.len(), 1);
        assert_eq!(imported.params.get("w"), Some(&value));
    }
}

#[test]
fn frozen_initializers_are_constants() {
    let imported = Importer::new()
        .freeze_params(true)
        .import_graph(&add_weight_graph(), 13)
        .unwrap();

    assert_eq!(imported.function.params.len(), 1);
    assert_eq!(imported.function.params[0].name_hint(), "x");
    assert!(imported.params.is_empty());

    let out = evaluate(&imported.function, vec![floats(&[1.0, 2.0], &[2])])
        .unwrap()
        .into_tensor()
        .unwrap();
    assert_eq!(out, floats(&[11.0, 22.0], &[2]));
}

#[test]
fn unfrozen_initializers_become_trailing_parameters() {
    let imported = Importer::new()
        .import_graph(&add_weight_graph(), 13)
        .unwrap();

    let names: Vec<&str> = imported
        .function
        .params
        .iter()
        .map(|param| param.name_hint())
        .collect();
    assert_eq!(names, vec!["x", "w"]);
    assert_eq!(imported.params.get("w"), Some(&floats(&[10.0, 20.0], &[2])));

    let out = evaluate(
        &imported.function,
        vec![floats(&[1.0, 2.0], &[2]), imported.params["w"].clone()],
    )
    .unwrap()
    .into_tensor()
    .unwrap();
    assert_eq!(out, floats(&[11.0, 22.0], &[2]));
}

#[test]
fn initializer_listed_as_input_keeps_its_input_position() {
    let mut graph = add_weight_graph();
    let w = onnx_frontend::builder::value_info("w", DType::Float32, &[Some(2)]);
    graph.input.insert(0, w);

    let imported = Importer::new().import_graph(&graph, 13).unwrap();
    let names: Vec<&str> = imported
        .function
        .params
        .iter()
        .map(|param| param.name_hint())
        .collect();
    assert_eq!(names, vec!["w", "x"]);
}

#[test]
fn every_unsupported_operator_is_reported() {
    let graph = GraphBuilder::new("g")
        .input("x", DType::Float32, &[2])
        .node(NodeBuilder::new("Frobnicate").input("x").output("a").build())
        .node(NodeBuilder::new("Round").input("a").output("b").build())
        .node(NodeBuilder::new("Quux").input("b").output("y").build())
        .output("y")
        .build();

    let err = Importer::new().import_graph(&graph, 10).unwrap_err();
    let ImportError::UnsupportedOperatorSet(missing) = err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(
        missing,
        vec![
            RegistryError::UnknownOperator("Frobnicate".to_string()),
            RegistryError::UnsupportedVersion {
                op: "Round".to_string(),
                requested: 10,
                earliest: 11,
            },
            RegistryError::UnknownOperator("Quux".to_string()),
        ]
    );
}

#[test]
fn scalar_permutation_is_a_malformed_attribute() {
    let graph = GraphBuilder::new("g")
        .input("x", DType::Float32, &[2, 3])
        .node(
            NodeBuilder::new("Transpose")
                .name("transpose_0")
                .input("x")
                .output("y")
                .attr_int("perm", 1)
                .build(),
        )
        .output("y")
        .build();

    let err = Importer::new().import_graph(&graph, 13).unwrap_err();
    match err {
        ImportError::MalformedAttribute { op, node, .. } => {
            assert_eq!(op, "Transpose");
            assert_eq!(node, "transpose_0");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn failing_rule_reports_the_node() {
    let graph = GraphBuilder::new("g")
        .input("x", DType::Float32, &[2, 3])
        .input("y", DType::Float32, &[4])
        .node(NodeBuilder::new("Add").name("bad_add").inputs(&["x", "y"]).output("z").build())
        .output("z")
        .build();

    let err = Importer::new().import_graph(&graph, 13).unwrap_err();
    match err {
        ImportError::ConversionRule { op, node, position, .. } => {
            assert_eq!(op, "Add");
            assert_eq!(node, "bad_add");
            assert_eq!(position, 0);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn unknown_shape_override_is_rejected() {
    let err = Importer::new()
        .shape("not_an_input", &[1])
        .import_graph(&add_weight_graph(), 13)
        .unwrap_err();
    assert!(matches!(err, ImportError::UnknownInputOverride(name) if name == "not_an_input"));
}

#[test]
fn overrides_replace_declared_types() {
    let graph = GraphBuilder::new("g")
        .symbolic_input("x", DType::Float32, &[None, Some(3)])
        .node(NodeBuilder::new("Relu").input("x").output("y").build())
        .output("y")
        .build();

    let imported = Importer::new()
        .shape("x", &[4, 3])
        .input_dtype("x", DType::Float64)
        .import_graph(&graph, 13)
        .unwrap();

    assert!(imported.warnings.is_empty());
    assert_eq!(
        imported.function.params[0].ty().to_string(),
        "Tensor[(4, 3), float64]"
    );
}

#[test]
fn symbolic_input_without_override_warns() {
    let graph = GraphBuilder::new("g")
        .symbolic_input("x", DType::Float32, &[None, Some(3)])
        .node(NodeBuilder::new("Relu").input("x").output("y").build())
        .output("y")
        .build();

    let imported = Importer::new().import_graph(&graph, 13).unwrap();
    assert_eq!(
        imported.warnings,
        vec![ImportWarning::SymbolicInputShape {
            input: "x".to_string()
        }]
    );
}

#[test]
fn requesting_an_older_opset_warns_and_dispatches_older_rules() {
    let graph = GraphBuilder::new("g")
        .input("x", DType::Float32, &[2, 2])
        .node(NodeBuilder::new("Softmax").input("x").output("y").build())
        .output("y")
        .build();

    let imported = Importer::new()
        .opset(11)
        .import_model(&GraphBuilder::from(graph).into_model(13))
        .unwrap();

    assert_eq!(imported.opset, 11);
    assert_eq!(
        imported.warnings,
        vec![ImportWarning::OpsetDowngrade {
            requested: 11,
            model: 13
        }]
    );
}

fn duplicate(
    inputs: &Inputs,
    _attrs: &Attributes,
    _ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    let x = inputs.required(0)?.clone();
    Ok(vec![
        x.clone(),
        Expr::call(Op::Add, vec![x.clone(), x], OpAttrs::new()),
    ])
}

#[test]
fn caller_rules_extend_the_registry() {
    let mut registry = OperatorRegistry::onnx();
    registry.register("Duplicate", 1, ConversionRule::Custom(duplicate));

    let graph = GraphBuilder::new("g")
        .input("x", DType::Float32, &[2])
        .node(NodeBuilder::new("Duplicate").input("x").outputs(&["", "y"]).build())
        .output("y")
        .build();
    let imported = Importer::new()
        .registry(registry)
        .import_graph(&graph, 13)
        .unwrap();

    let out = evaluate(&imported.function, vec![floats(&[1.0, 2.0], &[2])])
        .unwrap()
        .into_tensor()
        .unwrap();
    assert_eq!(out, floats(&[2.0, 4.0], &[2]));
}

#[test]
fn produced_and_declared_outputs_must_agree() {
    let mut registry = OperatorRegistry::onnx();
    registry.register("Duplicate", 1, ConversionRule::Custom(duplicate));

    let graph = GraphBuilder::new("g")
        .input("x", DType::Float32, &[2])
        .node(NodeBuilder::new("Duplicate").input("x").outputs(&["a", "b", "c"]).build())
        .output("a")
        .build();
    let err = Importer::new()
        .registry(registry)
        .import_graph(&graph, 13)
        .unwrap_err();

    assert!(matches!(
        err,
        ImportError::ArityMismatch {
            produced: 2,
            declared: 3,
            ..
        }
    ));
}

#[test]
fn serialized_models_round_trip_through_a_file() {
    let model = GraphBuilder::from(add_weight_graph()).into_model(13);
    let path = std::env::temp_dir().join(format!("onnx-frontend-{}.onnx", std::process::id()));
    std::fs::write(&path, model.write_to_bytes().unwrap()).unwrap();

    let imported = Importer::new().freeze_params(true).import_file(&path);
    std::fs::remove_file(&path).unwrap();

    let imported = imported.unwrap();
    assert_eq!(imported.opset, 13);
    assert_eq!(imported.function.params.len(), 1);
}

fn negate(
    inputs: &Inputs,
    _attrs: &Attributes,
    _ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    let x = inputs.required(0)?.clone();
    Ok(vec![Expr::call(Op::Negative, vec![x], OpAttrs::new())])
}

#[test]
fn a_lone_value_is_not_moved_to_a_later_slot() {
    let mut registry = OperatorRegistry::onnx();
    registry.register("Negate", 1, ConversionRule::Custom(negate));

    let graph = GraphBuilder::new("g")
        .input("x", DType::Float32, &[2])
        .node(NodeBuilder::new("Negate").input("x").outputs(&["", "second"]).build())
        .output("second")
        .build();
    let err = Importer::new()
        .registry(registry)
        .import_graph(&graph, 13)
        .unwrap_err();

    assert!(matches!(
        err,
        ImportError::ArityMismatch {
            produced: 0,
            declared: 1,
            ..
        }
    ));
}
