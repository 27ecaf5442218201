use tensor_ir::{Expr, Op, OpAttrs};

use super::{call, scalar};
use crate::{
    Attributes, ConversionError, ConversionRule, ConvertContext, Inputs, OperatorRegistry,
};

pub(super) fn register(registry: &mut OperatorRegistry) {
    registry.register("Gemm", 1, ConversionRule::Custom(gemm));
    registry.register("MatMul", 1, ConversionRule::Elementwise { op: Op::MatMul, arity: 2 });
}

/// `alpha * A' @ B' + beta * C`, lowered to a dense layer over `[units, in]` weights.
fn gemm(
    inputs: &Inputs,
    attrs: &Attributes,
    ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    inputs.expect_between(2, 3)?;
    let mut a = inputs.required(0)?.clone();
    let mut b = inputs.required(1)?.clone();

    let alpha = attrs.float_or("alpha", 1.0)?;
    let beta = attrs.float_or("beta", 1.0)?;
    let trans_a = attrs.int_or("transA", 0)? != 0;
    let trans_b = attrs.int_or("transB", 0)? != 0;

    let ty = ctx.tensor_type(&a)?;
    if ty.rank() > 2 {
        a = Expr::call(Op::Reshape, vec![a], OpAttrs::new().with("newshape", vec![0i64, -1]));
    }
    if trans_a {
        a = Expr::call(Op::Transpose, vec![a], OpAttrs::new().with("axes", vec![1i64, 0]));
    }
    if !trans_b {
        b = Expr::call(Op::Transpose, vec![b], OpAttrs::new().with("axes", vec![1i64, 0]));
    }
    if alpha != 1.0 {
        a = call(Op::Multiply, vec![a, scalar(ty.dtype, alpha as f64)]);
    }

    let mut out = call(Op::Dense, vec![a, b]);
    if let Some(c) = inputs.get(2) {
        let c = if beta != 1.0 {
            call(Op::Multiply, vec![c.clone(), scalar(ty.dtype, beta as f64)])
        } else {
            c.clone()
        };
        out = call(Op::Add, vec![out, c]);
    }
    Ok(vec![out])
}

#[cfg(test)]
mod tests {
    use super::super::tests::{floats, import, run};
    use crate::builder::{GraphBuilder, NodeBuilder};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tensor_ir::DType;

    #[rstest]
    #[case::transposed_b(1, floats(&[1.0, 0.0, 0.0, 1.0, 1.0, 1.0], &[3, 2]))]
    #[case::plain_b(0, floats(&[1.0, 0.0, 1.0, 0.0, 1.0, 1.0], &[2, 3]))]
    fn gemm_scales_and_adds_the_bias(
        #[case] trans_b: i64,
        #[case] weight: tensor_ir::TensorData,
    ) {
        let graph = GraphBuilder::new("g")
            .input("a", DType::Float32, &[1, 2])
            .initializer("b", &weight)
            .initializer("c", &floats(&[1.0, 1.0, 1.0], &[3]))
            .node(
                NodeBuilder::new("Gemm")
                    .inputs(&["a", "b", "c"])
                    .output("y")
                    .attr_int("transB", trans_b)
                    .attr_float("beta", 2.0)
                    .build(),
            )
            .output("y")
            .build();
        let imported = import(graph, 13);

        let out = run(&imported.function, vec![floats(&[1.0, 2.0], &[1, 2])]);
        assert_eq!(out, floats(&[3.0, 4.0, 5.0], &[1, 3]));
    }

    #[test]
    fn matmul_broadcasts_batches() {
        let graph = GraphBuilder::new("g")
            .input("a", DType::Float32, &[2, 1, 2])
            .input("b", DType::Float32, &[2, 1])
            .node(NodeBuilder::new("MatMul").inputs(&["a", "b"]).output("y").build())
            .output("y")
            .build();
        let imported = import(graph, 13);

        let out = run(
            &imported.function,
            vec![floats(&[1.0, 2.0, 3.0, 4.0], &[2, 1, 2]), floats(&[1.0, 1.0], &[2, 1])],
        );
        assert_eq!(out, floats(&[3.0, 7.0], &[2, 1, 1]));
    }
}
