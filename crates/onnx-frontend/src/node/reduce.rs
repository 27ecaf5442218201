use tensor_ir::{Expr, Op, OpAttrs};

use super::{int_list, int_values};
use crate::{
    AttrConverter, Attributes, ConversionError, ConversionRule, ConvertContext, Inputs,
    OperatorRegistry,
};

const REDUCTIONS: [(&str, Op); 4] = [
    ("ReduceSum", Op::Sum),
    ("ReduceMean", Op::Mean),
    ("ReduceMax", Op::Max),
    ("ReduceMin", Op::Min),
];

pub(super) fn register(registry: &mut OperatorRegistry) {
    for (name, op) in REDUCTIONS {
        registry.register(
            name,
            1,
            ConversionRule::Transform(
                AttrConverter::new(op)
                    .transform("axes", "axis", int_list)
                    .with_default("keepdims", 1i64),
            ),
        );
    }

    // Axes moved to an input in opset 13 for ReduceSum and in opset 18 for the others.
    registry
        .register("ReduceSum", 13, ConversionRule::Custom(reduce_sum))
        .register("ReduceMean", 18, ConversionRule::Custom(reduce_mean))
        .register("ReduceMax", 18, ConversionRule::Custom(reduce_max))
        .register("ReduceMin", 18, ConversionRule::Custom(reduce_min));
}

macro_rules! axes_input_reduction {
    ($($name:ident => $op:expr),* $(,)?) => {
        $(
            fn $name(
                inputs: &Inputs,
                attrs: &Attributes,
                ctx: &mut ConvertContext<'_, '_>,
            ) -> Result<Vec<Expr>, ConversionError> {
                reduce_with_axes_input($op, inputs, attrs, ctx)
            }
        )*
    };
}

axes_input_reduction! {
    reduce_sum => Op::Sum,
    reduce_mean => Op::Mean,
    reduce_max => Op::Max,
    reduce_min => Op::Min,
}

/// Without axes, reduces everything unless `noop_with_empty_axes` asks for the identity.
fn reduce_with_axes_input(
    op: Op,
    inputs: &Inputs,
    attrs: &Attributes,
    ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    inputs.expect_between(1, 2)?;
    let data = inputs.required(0)?.clone();

    let axes = match inputs.get(1) {
        Some(axes) => int_values("axes", ctx.constant_value(axes))?,
        None => Vec::new(),
    };
    if axes.is_empty() && attrs.int_or("noop_with_empty_axes", 0)? != 0 {
        return Ok(vec![data]);
    }

    let mut op_attrs = OpAttrs::new().with("keepdims", attrs.int_or("keepdims", 1)? != 0);
    if !axes.is_empty() {
        op_attrs.insert("axis", axes);
    }
    Ok(vec![Expr::call(op, vec![data], op_attrs)])
}

#[cfg(test)]
mod tests {
    use super::super::tests::{floats, import, ints, run, unary_graph};
    use crate::builder::{GraphBuilder, NodeBuilder};
    use pretty_assertions::assert_eq;
    use tensor_ir::{DType, Op};

    #[test]
    fn attribute_axes_keep_dimensions_by_default() {
        let graph = unary_graph(
            NodeBuilder::new("ReduceMax")
                .input("x")
                .output("y")
                .attr_ints("axes", &[1])
                .build(),
            DType::Float32,
            &[2, 2],
        );
        let imported = import(graph, 13);

        let out = run(&imported.function, vec![floats(&[1.0, 4.0, 3.0, 2.0], &[2, 2])]);
        assert_eq!(out, floats(&[4.0, 3.0], &[2, 1]));
    }

    #[test]
    fn input_axes() {
        let graph = GraphBuilder::new("g")
            .input("x", DType::Float32, &[2, 2])
            .initializer("axes", &ints(&[0], &[1]))
            .node(
                NodeBuilder::new("ReduceSum")
                    .inputs(&["x", "axes"])
                    .output("y")
                    .attr_int("keepdims", 0)
                    .build(),
            )
            .output("y")
            .build();
        let imported = import(graph, 13);

        let out = run(&imported.function, vec![floats(&[1.0, 2.0, 3.0, 4.0], &[2, 2])]);
        assert_eq!(out, floats(&[4.0, 6.0], &[2]));
    }

    #[test]
    fn empty_axes_can_be_a_noop() {
        let graph = unary_graph(
            NodeBuilder::new("ReduceSum")
                .input("x")
                .output("y")
                .attr_int("noop_with_empty_axes", 1)
                .build(),
            DType::Float32,
            &[2],
        );
        let imported = import(graph, 13);

        assert!(imported.function.body.as_var().is_some());
    }

    #[test]
    fn opset_dispatch_picks_the_attribute_form_before_18() {
        let graph = unary_graph(
            NodeBuilder::new("ReduceMean")
                .input("x")
                .output("y")
                .attr_ints("axes", &[0])
                .attr_int("keepdims", 0)
                .build(),
            DType::Float32,
            &[2],
        );
        let imported = import(graph, 17);

        let call = imported.function.body.as_call().unwrap();
        assert_eq!(call.op, Op::Mean);
        assert_eq!(call.attrs.ints("axis").unwrap(), Some(vec![0]));
    }
}
