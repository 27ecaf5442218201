use std::str::FromStr;

use strum::EnumString;
use tensor_ir::{DType, Expr, Op, OpAttrs};

use super::{call, scalar};
use crate::{
    AttrConverter, AttributeValue, Attributes, ConversionError, ConversionRule, ConvertContext,
    Inputs, OperatorRegistry,
};

pub(super) fn register(registry: &mut OperatorRegistry) {
    registry.register("Identity", 1, ConversionRule::Custom(identity));

    registry
        .register("Add", 1, ConversionRule::Custom(add_v1))
        .register("Sub", 1, ConversionRule::Custom(sub_v1))
        .register("Mul", 1, ConversionRule::Custom(mul_v1))
        .register("Div", 1, ConversionRule::Custom(div_v1));
    for (name, op) in [
        ("Add", Op::Add),
        ("Sub", Op::Subtract),
        ("Mul", Op::Multiply),
        ("Div", Op::Divide),
    ] {
        registry.register(name, 7, ConversionRule::Elementwise { op, arity: 2 });
    }

    let binary = [
        ("Pow", Op::Power, 1),
        ("Equal", Op::Equal, 1),
        ("Less", Op::Less, 1),
        ("Greater", Op::Greater, 1),
        ("LessOrEqual", Op::LessEqual, 12),
        ("GreaterOrEqual", Op::GreaterEqual, 12),
        ("And", Op::LogicalAnd, 1),
        ("Or", Op::LogicalOr, 1),
        ("Xor", Op::LogicalXor, 1),
    ];
    for (name, op, since) in binary {
        registry.register(name, since, ConversionRule::Elementwise { op, arity: 2 });
    }

    let unary = [
        ("Neg", Op::Negative, 1),
        ("Abs", Op::Abs, 1),
        ("Sqrt", Op::Sqrt, 1),
        ("Exp", Op::Exp, 1),
        ("Log", Op::Log, 1),
        ("Floor", Op::Floor, 1),
        ("Ceil", Op::Ceil, 1),
        ("Round", Op::Round, 11),
        ("Not", Op::LogicalNot, 1),
    ];
    for (name, op, since) in unary {
        registry.register(name, since, ConversionRule::Elementwise { op, arity: 1 });
    }

    registry
        .register("Sum", 1, ConversionRule::Custom(sum))
        .register("Mean", 1, ConversionRule::Custom(mean))
        .register("Max", 1, ConversionRule::Custom(max))
        .register("Min", 1, ConversionRule::Custom(min));

    registry
        .register("Cast", 1, ConversionRule::Custom(cast_v1))
        .register("Cast", 6, ConversionRule::Custom(cast_v6));

    registry
        .register(
            "Clip",
            1,
            ConversionRule::Transform(
                AttrConverter::new(Op::Clip)
                    .rename("min", "a_min")
                    .rename("max", "a_max")
                    .with_default("a_min", f64::NEG_INFINITY)
                    .with_default("a_max", f64::INFINITY),
            ),
        )
        .register("Clip", 11, ConversionRule::Custom(clip_v11));

    registry.register("Where", 9, ConversionRule::Elementwise { op: Op::Where, arity: 3 });
}

fn identity(
    inputs: &Inputs,
    _attrs: &Attributes,
    _ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    inputs.expect_len(1)?;
    Ok(vec![inputs.required(0)?.clone()])
}

macro_rules! legacy_binary {
    ($($name:ident => $op:expr),* $(,)?) => {
        $(
            fn $name(
                inputs: &Inputs,
                attrs: &Attributes,
                ctx: &mut ConvertContext<'_, '_>,
            ) -> Result<Vec<Expr>, ConversionError> {
                legacy_broadcast($op, inputs, attrs, ctx)
            }
        )*
    };
}

legacy_binary! {
    add_v1 => Op::Add,
    sub_v1 => Op::Subtract,
    mul_v1 => Op::Multiply,
    div_v1 => Op::Divide,
}

/// Binary arithmetic before opset 7, where `broadcast=1` with an `axis` aligns the right
/// operand to that axis of the left one instead of to its trailing dimensions.
fn legacy_broadcast(
    op: Op,
    inputs: &Inputs,
    attrs: &Attributes,
    ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    inputs.expect_len(2)?;
    let lhs = inputs.required(0)?.clone();
    let mut rhs = inputs.required(1)?.clone();

    if attrs.int_or("broadcast", 0)? == 1 {
        if let Some(axis) = attrs.int("axis")? {
            let lhs_rank = ctx.tensor_type(&lhs)?.rank() as i64;
            let rhs_rank = ctx.tensor_type(&rhs)?.rank() as i64;
            let axis = if axis < 0 { axis + lhs_rank } else { axis };
            let count = lhs_rank - axis - rhs_rank;
            if count > 0 {
                rhs = Expr::call(
                    Op::ExpandDims,
                    vec![rhs],
                    OpAttrs::new()
                        .with("axis", rhs_rank)
                        .with("num_newaxis", count),
                );
            }
        }
    }

    Ok(vec![call(op, vec![lhs, rhs])])
}

/// Left fold of every given input with a binary operator.
fn fold_inputs(op: Op, inputs: &Inputs) -> Result<Expr, ConversionError> {
    let args = inputs.present();
    let (first, rest) = args
        .split_first()
        .ok_or(ConversionError::InvalidInputCount {
            expected: "at least 1".to_string(),
            actual: 0,
        })?;
    Ok(rest
        .iter()
        .fold(first.clone(), |acc, arg| call(op, vec![acc, arg.clone()])))
}

fn sum(
    inputs: &Inputs,
    _attrs: &Attributes,
    _ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    Ok(vec![fold_inputs(Op::Add, inputs)?])
}

fn mean(
    inputs: &Inputs,
    _attrs: &Attributes,
    ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    let total = fold_inputs(Op::Add, inputs)?;
    let dtype = ctx.tensor_type(&total)?.dtype;
    let count = inputs.present().len();
    Ok(vec![call(Op::Divide, vec![total, scalar(dtype, count as f64)])])
}

fn max(
    inputs: &Inputs,
    _attrs: &Attributes,
    _ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    Ok(vec![fold_inputs(Op::Maximum, inputs)?])
}

fn min(
    inputs: &Inputs,
    _attrs: &Attributes,
    _ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    Ok(vec![fold_inputs(Op::Minimum, inputs)?])
}

/// Element type names accepted by `Cast` before opset 6.
#[derive(Debug, Clone, Copy, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
enum TypeName {
    Float,
    Float16,
    Double,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Bool,
}

impl From<TypeName> for DType {
    fn from(name: TypeName) -> Self {
        match name {
            TypeName::Float | TypeName::Float16 => DType::Float32,
            TypeName::Double => DType::Float64,
            TypeName::Int8 => DType::Int8,
            TypeName::Int16 | TypeName::Int32 | TypeName::Uint16 => DType::Int32,
            TypeName::Int64 => DType::Int64,
            TypeName::Uint8 => DType::Uint8,
            TypeName::Bool => DType::Bool,
        }
    }
}

fn cast_target(attrs: &Attributes) -> Result<DType, ConversionError> {
    let unknown =
        |found: String| ConversionError::invalid_attribute("to", format!("unknown type {found}"));
    match attrs.get("to") {
        None => Err(ConversionError::MissingAttribute("to".to_string())),
        Some(AttributeValue::Int(code)) => {
            let code = i32::try_from(*code).map_err(|_| unknown(code.to_string()))?;
            crate::dtype_from_proto(code).ok_or_else(|| unknown(code.to_string()))
        }
        Some(AttributeValue::String(name)) => TypeName::from_str(name)
            .map(DType::from)
            .map_err(|_| unknown(name.clone())),
        Some(other) => Err(ConversionError::AttributeKind {
            name: "to".to_string(),
            expected: "an int or a string",
            found: other.kind(),
        }),
    }
}

fn cast_v1(
    inputs: &Inputs,
    attrs: &Attributes,
    _ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    inputs.expect_len(1)?;
    let dtype = cast_target(attrs)?;
    Ok(vec![Expr::call(
        Op::Cast,
        vec![inputs.required(0)?.clone()],
        OpAttrs::new().with("dtype", dtype),
    )])
}

fn cast_v6(
    inputs: &Inputs,
    attrs: &Attributes,
    _ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    inputs.expect_len(1)?;
    let code = attrs.required_int("to")?;
    let dtype = i32::try_from(code)
        .ok()
        .and_then(crate::dtype_from_proto)
        .ok_or_else(|| ConversionError::invalid_attribute("to", format!("unknown type {code}")))?;
    Ok(vec![Expr::call(
        Op::Cast,
        vec![inputs.required(0)?.clone()],
        OpAttrs::new().with("dtype", dtype),
    )])
}

/// `Clip` with optional `min` and `max` inputs. Bounds known at import time become
/// attributes, the others elementwise `maximum`/`minimum` calls.
fn clip_v11(
    inputs: &Inputs,
    _attrs: &Attributes,
    ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    inputs.expect_between(1, 3)?;
    let data = inputs.required(0)?.clone();

    let mut attrs = OpAttrs::new()
        .with("a_min", f64::NEG_INFINITY)
        .with("a_max", f64::INFINITY);
    let mut dynamic = Vec::new();
    for (index, name, op) in [(1, "a_min", Op::Maximum), (2, "a_max", Op::Minimum)] {
        let Some(bound) = inputs.get(index) else {
            continue;
        };
        match ctx.constant_value(bound) {
            Some(value) if value.len() == 1 => attrs.insert(name, value.to_f64_vec()[0]),
            Some(value) => {
                return Err(ConversionError::invalid_attribute(
                    name,
                    format!("expected a single bound, found shape {:?}", value.shape()),
                ));
            }
            None => dynamic.push((op, bound.clone())),
        }
    }

    let clipped = Expr::call(Op::Clip, vec![data], attrs);
    Ok(vec![dynamic
        .into_iter()
        .fold(clipped, |acc, (op, bound)| call(op, vec![acc, bound]))])
}

#[cfg(test)]
mod tests {
    use super::super::tests::{floats, import, ints, run};
    use crate::builder::{GraphBuilder, NodeBuilder};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tensor_ir::{DType, TensorData, TensorType, Type, infer_type};

    #[test]
    fn legacy_broadcast_aligns_to_the_axis() {
        let graph = GraphBuilder::new("g")
            .input("a", DType::Float32, &[2, 3])
            .input("b", DType::Float32, &[2])
            .node(
                NodeBuilder::new("Add")
                    .inputs(&["a", "b"])
                    .output("y")
                    .attr_int("broadcast", 1)
                    .attr_int("axis", 0)
                    .build(),
            )
            .output("y")
            .build();

        let imported = import(graph, 6);
        let out = run(
            &imported.function,
            vec![floats(&[0.0; 6], &[2, 3]), floats(&[1.0, 2.0], &[2])],
        );
        assert_eq!(out, floats(&[1.0, 1.0, 1.0, 2.0, 2.0, 2.0], &[2, 3]));
    }

    #[test]
    fn mean_divides_the_sum() {
        let graph = GraphBuilder::new("g")
            .input("a", DType::Float32, &[2])
            .input("b", DType::Float32, &[2])
            .input("c", DType::Float32, &[2])
            .node(NodeBuilder::new("Mean").inputs(&["a", "b", "c"]).output("y").build())
            .output("y")
            .build();

        let imported = import(graph, 13);
        let out = run(
            &imported.function,
            vec![
                floats(&[1.0, 2.0], &[2]),
                floats(&[2.0, 4.0], &[2]),
                floats(&[3.0, 6.0], &[2]),
            ],
        );
        assert_eq!(out, floats(&[2.0, 4.0], &[2]));
    }

    #[rstest]
    #[case::by_name(1, NodeBuilder::new("Cast").attr_string("to", "INT64"))]
    #[case::by_code(13, NodeBuilder::new("Cast").attr_int("to", 7))]
    fn cast_targets(#[case] opset: usize, #[case] node: NodeBuilder) {
        let graph = GraphBuilder::new("g")
            .input("x", DType::Float32, &[2])
            .node(node.input("x").output("y").build())
            .output("y")
            .build();

        let imported = import(graph, opset);
        assert_eq!(
            infer_type(&imported.function.body).unwrap(),
            Type::Tensor(TensorType::fixed(DType::Int64, &[2]))
        );
        let out = run(&imported.function, vec![floats(&[1.0, -2.0], &[2])]);
        assert_eq!(out, ints(&[1, -2], &[2]));
    }

    #[test]
    fn constant_clip_bounds_become_attributes() {
        let graph = GraphBuilder::new("g")
            .input("x", DType::Float32, &[3])
            .initializer("lo", &TensorData::scalar(-1.0f32))
            .node(NodeBuilder::new("Clip").inputs(&["x", "lo", ""]).output("y").build())
            .output("y")
            .build();

        let imported = import(graph, 11);
        let call = imported.function.body.as_call().unwrap();
        assert_eq!(call.attrs.float_or("a_min", 0.0).unwrap(), -1.0);
        assert_eq!(call.args.len(), 1);

        let out = run(&imported.function, vec![floats(&[-5.0, 0.5, 5.0], &[3])]);
        assert_eq!(out, floats(&[-1.0, 0.5, 5.0], &[3]));
    }

    #[test]
    fn comparisons_need_opset_12_for_inclusive_forms() {
        let registry = crate::OperatorRegistry::onnx();
        assert!(registry.resolve("LessOrEqual", 11).is_err());
        assert!(registry.resolve("LessOrEqual", 12).is_ok());
        assert_eq!(registry.resolve("Less", 12).unwrap().0, 1);
    }
}
