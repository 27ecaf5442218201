use std::str::FromStr;

use strum::EnumString;
use tensor_ir::{Expr, Op, OpAttrs, TensorType};

use crate::{
    Attributes, ConversionError, ConversionRule, ConvertContext, Inputs, OperatorRegistry,
};

pub(super) fn register(registry: &mut OperatorRegistry) {
    registry
        .register("MaxPool", 1, ConversionRule::Custom(max_pool))
        .register("AveragePool", 1, ConversionRule::Custom(avg_pool))
        .register("GlobalMaxPool", 1, ConversionRule::Custom(global_max_pool))
        .register("GlobalAveragePool", 1, ConversionRule::Custom(global_avg_pool));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
enum AutoPad {
    #[strum(serialize = "NOTSET")]
    NotSet,
    Valid,
    SameUpper,
    SameLower,
}

fn max_pool(
    inputs: &Inputs,
    attrs: &Attributes,
    ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    if ctx.num_outputs() > 1 {
        return Err(ConversionError::Unsupported(
            "MaxPool indices output".to_string(),
        ));
    }
    pool(true, inputs, attrs, ctx)
}

fn avg_pool(
    inputs: &Inputs,
    attrs: &Attributes,
    ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    pool(false, inputs, attrs, ctx)
}

fn pool_op(max: bool, dims: usize) -> Option<Op> {
    let op = match (max, dims) {
        (true, 1) => Op::MaxPool1d,
        (true, 2) => Op::MaxPool2d,
        (true, 3) => Op::MaxPool3d,
        (false, 1) => Op::AvgPool1d,
        (false, 2) => Op::AvgPool2d,
        (false, 3) => Op::AvgPool3d,
        _ => return None,
    };
    Some(op)
}

fn pool(
    max: bool,
    inputs: &Inputs,
    attrs: &Attributes,
    ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    inputs.expect_len(1)?;
    let data = inputs.required(0)?.clone();
    let ty = ctx.tensor_type(&data)?;
    let dims = ty.rank().saturating_sub(2);
    let op = pool_op(max, dims).ok_or_else(|| {
        ConversionError::Unsupported(format!("pooling over a rank {} input", ty.rank()))
    })?;

    let list = |name: &str| -> Result<Vec<i64>, ConversionError> {
        match attrs.ints(name)? {
            None => Ok(vec![1; dims]),
            Some(values) => sized(name, values, dims),
        }
    };
    let kernel = sized("kernel_shape", attrs.required_ints("kernel_shape")?, dims)?;
    let strides = list("strides")?;
    let dilations = list("dilations")?;

    let auto_pad = match attrs.string("auto_pad")? {
        None => AutoPad::NotSet,
        Some(mode) => AutoPad::from_str(mode).map_err(|_| {
            ConversionError::invalid_attribute("auto_pad", format!("unknown mode {mode}"))
        })?,
    };
    let padding = match auto_pad {
        AutoPad::NotSet => match attrs.ints("pads")? {
            Some(pads) => sized("pads", pads, dims * 2)?,
            None => vec![0; dims * 2],
        },
        AutoPad::Valid => vec![0; dims * 2],
        AutoPad::SameUpper | AutoPad::SameLower => {
            same_padding(&ty, &kernel, &strides, &dilations, auto_pad == AutoPad::SameUpper)?
        }
    };

    let mut pool_attrs = OpAttrs::new()
        .with("pool_size", kernel)
        .with("strides", strides)
        .with("dilation", dilations)
        .with("padding", padding)
        .with("ceil_mode", attrs.int_or("ceil_mode", 0)? != 0);
    if !max {
        pool_attrs.insert(
            "count_include_pad",
            attrs.int_or("count_include_pad", 0)? != 0,
        );
    }
    if attrs.int_or("storage_order", 0)? != 0 {
        log::debug!("Ignoring column-major storage order of {op}");
    }

    Ok(vec![Expr::call(op, vec![data], pool_attrs)])
}

/// `values` when it holds exactly `len` entries.
fn sized(name: &str, values: &[i64], len: usize) -> Result<Vec<i64>, ConversionError> {
    if values.len() != len {
        return Err(ConversionError::invalid_attribute(
            name,
            format!("expected {len} values, got {values:?}"),
        ));
    }
    Ok(values.to_vec())
}

/// Padding keeping `ceil(size / stride)` outputs per spatial dimension. The odd element
/// goes to the end for `SAME_UPPER` and to the beginning for `SAME_LOWER`.
fn same_padding(
    ty: &TensorType,
    kernel: &[i64],
    strides: &[i64],
    dilations: &[i64],
    upper: bool,
) -> Result<Vec<i64>, ConversionError> {
    let shape = ty.static_shape().ok_or_else(|| {
        ConversionError::Unsupported("`SAME` padding of a dynamic shape".to_string())
    })?;

    let mut begins = Vec::with_capacity(kernel.len());
    let mut ends = Vec::with_capacity(kernel.len());
    for (i, &size) in shape[2..].iter().enumerate() {
        let size = size as i64;
        let stride = strides[i].max(1);
        let out = (size + stride - 1) / stride;
        let window = (kernel[i] - 1) * dilations[i] + 1;
        let total = ((out - 1) * stride + window - size).max(0);
        let (begin, end) = if upper {
            (total / 2, total - total / 2)
        } else {
            (total - total / 2, total / 2)
        };
        begins.push(begin);
        ends.push(end);
    }
    begins.extend(ends);
    Ok(begins)
}

fn global_max_pool(
    inputs: &Inputs,
    _attrs: &Attributes,
    ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    global_pool(Op::Max, inputs, ctx)
}

fn global_avg_pool(
    inputs: &Inputs,
    _attrs: &Attributes,
    ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    global_pool(Op::Mean, inputs, ctx)
}

/// Reduces every spatial dimension, keeping them as size 1.
fn global_pool(
    op: Op,
    inputs: &Inputs,
    ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    inputs.expect_len(1)?;
    let data = inputs.required(0)?.clone();
    let rank = ctx.tensor_type(&data)?.rank();
    if rank < 3 {
        return Err(ConversionError::Unsupported(format!(
            "global pooling over a rank {rank} input"
        )));
    }

    let axes: Vec<i64> = (2..rank as i64).collect();
    Ok(vec![Expr::call(
        op,
        vec![data],
        OpAttrs::new().with("axis", axes).with("keepdims", true),
    )])
}

#[cfg(test)]
mod tests {
    use super::super::tests::{floats, import, run, unary_graph};
    use super::*;
    use crate::builder::NodeBuilder;
    use crate::{ImportError, Importer};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tensor_ir::DType;

    #[rstest]
    #[case::upper(true, vec![0, 1])]
    #[case::lower(false, vec![1, 0])]
    fn same_padding_puts_the_odd_element_last_for_upper(
        #[case] upper: bool,
        #[case] expected: Vec<i64>,
    ) {
        let ty = TensorType::fixed(DType::Float32, &[1, 1, 4]);
        assert_eq!(same_padding(&ty, &[2], &[1], &[1], upper).unwrap(), expected);
    }

    #[test]
    fn max_pool_with_strides() {
        let graph = unary_graph(
            NodeBuilder::new("MaxPool")
                .input("x")
                .output("y")
                .attr_ints("kernel_shape", &[2, 2])
                .attr_ints("strides", &[2, 2])
                .build(),
            DType::Float32,
            &[1, 1, 4, 4],
        );
        let imported = import(graph, 12);

        assert_eq!(imported.function.body.as_call().unwrap().op, Op::MaxPool2d);
        let input: Vec<f32> = (0..16).map(|v| v as f32).collect();
        let out = run(&imported.function, vec![floats(&input, &[1, 1, 4, 4])]);
        assert_eq!(out, floats(&[5.0, 7.0, 13.0, 15.0], &[1, 1, 2, 2]));
    }

    #[test]
    fn same_average_pool_excludes_padding() {
        let graph = unary_graph(
            NodeBuilder::new("AveragePool")
                .input("x")
                .output("y")
                .attr_ints("kernel_shape", &[2])
                .attr_string("auto_pad", "SAME_UPPER")
                .build(),
            DType::Float32,
            &[1, 1, 3],
        );
        let imported = import(graph, 11);

        let out = run(&imported.function, vec![floats(&[1.0, 3.0, 5.0], &[1, 1, 3])]);
        assert_eq!(out, floats(&[2.0, 4.0, 5.0], &[1, 1, 3]));
    }

    #[test]
    fn global_average_pool_keeps_spatial_dimensions() {
        let graph = unary_graph(
            NodeBuilder::new("GlobalAveragePool").input("x").output("y").build(),
            DType::Float32,
            &[1, 2, 2, 1],
        );
        let imported = import(graph, 1);

        let out = run(&imported.function, vec![floats(&[1.0, 3.0, 2.0, 6.0], &[1, 2, 2, 1])]);
        assert_eq!(out, floats(&[2.0, 4.0], &[1, 2, 1, 1]));
    }

    #[rstest]
    #[case::short_kernel_with_same_padding(&[2], Some("SAME_UPPER"), None)]
    #[case::short_kernel(&[2], None, None)]
    #[case::short_pads(&[2, 2], None, Some(&[0, 0][..]))]
    fn attribute_lengths_must_match_the_spatial_rank(
        #[case] kernel: &[i64],
        #[case] auto_pad: Option<&str>,
        #[case] pads: Option<&[i64]>,
    ) {
        let mut node = NodeBuilder::new("MaxPool")
            .input("x")
            .output("y")
            .attr_ints("kernel_shape", kernel);
        if let Some(mode) = auto_pad {
            node = node.attr_string("auto_pad", mode);
        }
        if let Some(pads) = pads {
            node = node.attr_ints("pads", pads);
        }
        let graph = unary_graph(node.build(), DType::Float32, &[1, 1, 4, 4]);

        let err = Importer::new().import_graph(&graph, 12).unwrap_err();
        let ImportError::ConversionRule { source, .. } = err else {
            panic!("unexpected error: {err}");
        };
        assert!(matches!(source, ConversionError::InvalidAttribute { .. }));
    }

    #[test]
    fn unknown_auto_pad_is_rejected() {
        assert!(AutoPad::from_str("SAME").is_err());
        assert_eq!(AutoPad::from_str("NOTSET").unwrap(), AutoPad::NotSet);
        assert_eq!(AutoPad::from_str("SAME_LOWER").unwrap(), AutoPad::SameLower);
    }
}
