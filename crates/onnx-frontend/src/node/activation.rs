use tensor_ir::{DType, Expr, Op, OpAttrs};

use super::normalize_axis;
use crate::{
    AttrConverter, Attributes, ConversionError, ConversionRule, ConvertContext, Inputs,
    OperatorRegistry,
};

pub(super) fn register(registry: &mut OperatorRegistry) {
    for (name, op) in [("Relu", Op::Relu), ("Sigmoid", Op::Sigmoid), ("Tanh", Op::Tanh)] {
        registry.register(name, 1, ConversionRule::Elementwise { op, arity: 1 });
    }

    registry.register(
        "LeakyRelu",
        1,
        ConversionRule::Transform(AttrConverter::new(Op::LeakyRelu).with_default("alpha", 0.01)),
    );

    registry
        .register("Softmax", 1, ConversionRule::Custom(softmax_v1))
        .register("LogSoftmax", 1, ConversionRule::Custom(log_softmax_v1));
    for (name, op) in [("Softmax", Op::Softmax), ("LogSoftmax", Op::LogSoftmax)] {
        registry.register(
            name,
            13,
            ConversionRule::Transform(AttrConverter::new(op).with_default("axis", -1i64)),
        );
    }

    registry.register("Dropout", 1, ConversionRule::Custom(dropout));
}

fn softmax_v1(
    inputs: &Inputs,
    attrs: &Attributes,
    ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    coerced_softmax(Op::Softmax, inputs, attrs, ctx)
}

fn log_softmax_v1(
    inputs: &Inputs,
    attrs: &Attributes,
    ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    coerced_softmax(Op::LogSoftmax, inputs, attrs, ctx)
}

/// Softmax before opset 13 normalizes over every dimension from `axis` on, as if the input
/// were flattened to `[before, after]`.
fn coerced_softmax(
    op: Op,
    inputs: &Inputs,
    attrs: &Attributes,
    ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    inputs.expect_len(1)?;
    let data = inputs.required(0)?.clone();
    let ty = ctx.tensor_type(&data)?;
    let axis = normalize_axis("axis", attrs.int_or("axis", 1)?, ty.rank())?;

    if axis + 1 == ty.rank() {
        return Ok(vec![Expr::call(op, vec![data], OpAttrs::new().with("axis", -1i64))]);
    }

    let Some(shape) = ty.static_shape() else {
        return Err(ConversionError::Unsupported(format!(
            "{op} over axis {axis} of a dynamic shape"
        )));
    };
    let before: usize = shape[..axis].iter().product();
    let after: usize = shape[axis..].iter().product();

    let flat = Expr::call(
        Op::Reshape,
        vec![data],
        OpAttrs::new().with("newshape", vec![before as i64, after as i64]),
    );
    let normalized = Expr::call(op, vec![flat], OpAttrs::new().with("axis", 1i64));
    let restored = Expr::call(
        Op::Reshape,
        vec![normalized],
        OpAttrs::new().with("newshape", shape.iter().map(|&dim| dim as i64).collect::<Vec<_>>()),
    );
    Ok(vec![restored])
}

/// Dropout is the identity at inference. A requested mask output is all ones.
fn dropout(
    inputs: &Inputs,
    attrs: &Attributes,
    ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    inputs.expect_between(1, 3)?;
    let data = inputs.required(0)?.clone();

    let converter = AttrConverter::new(Op::Dropout)
        .rename("ratio", "rate")
        .with_default("rate", 0.5)
        .ignore("is_test")
        .ignore("seed");
    let out = converter.convert(vec![data.clone()], attrs)?;

    if ctx.num_outputs() < 2 {
        return Ok(vec![out]);
    }
    let ones = Expr::call(Op::OnesLike, vec![data], OpAttrs::new());
    let mask = Expr::call(Op::Cast, vec![ones], OpAttrs::new().with("dtype", DType::Bool));
    Ok(vec![out, mask])
}

#[cfg(test)]
mod tests {
    use super::super::tests::{floats, import, run, run_tuple, unary_graph};
    use crate::builder::{GraphBuilder, NodeBuilder};
    use pretty_assertions::assert_eq;
    use tensor_ir::{DType, Op, TensorData};

    #[test]
    fn leaky_relu_defaults_alpha() {
        let graph = unary_graph(
            NodeBuilder::new("LeakyRelu").input("x").output("y").build(),
            DType::Float32,
            &[2],
        );
        let imported = import(graph, 13);

        let out = run(&imported.function, vec![floats(&[-100.0, 2.0], &[2])]);
        assert_eq!(out, floats(&[-1.0, 2.0], &[2]));
    }

    #[test]
    fn legacy_softmax_flattens_trailing_dimensions() {
        let graph = unary_graph(
            NodeBuilder::new("Softmax").input("x").output("y").build(),
            DType::Float32,
            &[1, 2, 2],
        );
        let imported = import(graph, 11);

        let restored = imported.function.body.as_call().unwrap();
        assert_eq!(restored.op, Op::Reshape);
        let out = run(&imported.function, vec![floats(&[0.0; 4], &[1, 2, 2])]);
        assert_eq!(out, floats(&[0.25; 4], &[1, 2, 2]));
    }

    #[test]
    fn softmax_13_uses_the_last_axis() {
        let graph = unary_graph(
            NodeBuilder::new("Softmax").input("x").output("y").build(),
            DType::Float32,
            &[2, 2],
        );
        let imported = import(graph, 13);

        let call = imported.function.body.as_call().unwrap();
        assert_eq!(call.op, Op::Softmax);
        assert_eq!(call.attrs.int_or("axis", 0).unwrap(), -1);
    }

    #[test]
    fn dropout_mask_is_all_ones() {
        let graph = GraphBuilder::new("g")
            .input("x", DType::Float32, &[3])
            .node(
                NodeBuilder::new("Dropout")
                    .input("x")
                    .outputs(&["y", "mask"])
                    .attr_float("ratio", 0.2)
                    .build(),
            )
            .output("y")
            .output("mask")
            .build();
        let imported = import(graph, 7);

        let out = run_tuple(&imported.function, vec![floats(&[1.0, 2.0, 3.0], &[3])]);
        assert_eq!(out[0], floats(&[1.0, 2.0, 3.0], &[3]));
        assert_eq!(
            out[1],
            TensorData::from_vec(vec![true, true, true], &[3]).unwrap()
        );
    }
}
