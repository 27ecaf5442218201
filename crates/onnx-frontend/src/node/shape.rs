use tensor_ir::{DType, Dim, Expr, Op, OpAttrs};

use super::{int_list, int_values, normalize_axis};
use crate::{
    AttrConverter, Attributes, ConversionError, ConversionRule, ConvertContext, Inputs,
    OperatorRegistry,
};

pub(super) fn register(registry: &mut OperatorRegistry) {
    registry
        .register(
            "Reshape",
            1,
            ConversionRule::Transform(
                AttrConverter::new(Op::Reshape)
                    .rename("shape", "newshape")
                    .ignore("consumed_inputs"),
            ),
        )
        .register("Reshape", 5, ConversionRule::Custom(reshape_v5));

    registry
        .register(
            "Concat",
            1,
            ConversionRule::Transform(
                AttrConverter::new(Op::Concatenate).with_default("axis", 1i64),
            ),
        )
        .register(
            "Concat",
            4,
            ConversionRule::Transform(
                AttrConverter::new(Op::Concatenate)
                    .check(|attrs| attrs.contains("axis"), "`axis` is required"),
            ),
        );

    registry.register(
        "Transpose",
        1,
        ConversionRule::Transform(
            AttrConverter::new(Op::Transpose).transform("perm", "axes", int_list),
        ),
    );

    registry
        .register(
            "Squeeze",
            1,
            ConversionRule::Transform(
                AttrConverter::new(Op::Squeeze).transform("axes", "axis", int_list),
            ),
        )
        .register("Squeeze", 13, ConversionRule::Custom(squeeze_v13));

    registry
        .register("Unsqueeze", 1, ConversionRule::Custom(unsqueeze_v1))
        .register("Unsqueeze", 13, ConversionRule::Custom(unsqueeze_v13));

    registry.register(
        "Gather",
        1,
        ConversionRule::Transform(AttrConverter::new(Op::Take).with_default("axis", 0i64)),
    );

    registry.register(
        "Shape",
        1,
        ConversionRule::Transform(
            AttrConverter::new(Op::ShapeOf)
                .exclude("start")
                .exclude("end")
                .extra("dtype", DType::Int64),
        ),
    );

    registry.register("Flatten", 1, ConversionRule::Custom(flatten));

    registry
        .register("Split", 1, ConversionRule::Custom(split_v1))
        .register("Split", 13, ConversionRule::Custom(split_v13));
}

/// A shape known at import time becomes a static reshape, anything else a dynamic one.
fn reshape_v5(
    inputs: &Inputs,
    _attrs: &Attributes,
    ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    inputs.expect_len(2)?;
    let data = inputs.required(0)?.clone();
    let shape = inputs.required(1)?;

    let out = match ctx.constant_value(shape) {
        Some(value) => Expr::call(
            Op::Reshape,
            vec![data],
            OpAttrs::new().with("newshape", int_values("shape", Some(value))?),
        ),
        None => Expr::call(Op::DynReshape, vec![data, shape.clone()], OpAttrs::new()),
    };
    Ok(vec![out])
}

fn squeeze_v13(
    inputs: &Inputs,
    _attrs: &Attributes,
    ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    inputs.expect_between(1, 2)?;
    let data = inputs.required(0)?.clone();

    let mut attrs = OpAttrs::new();
    if let Some(axes) = inputs.get(1) {
        attrs.insert("axis", int_values("axes", ctx.constant_value(axes))?);
    }
    Ok(vec![Expr::call(Op::Squeeze, vec![data], attrs)])
}

fn unsqueeze_v1(
    inputs: &Inputs,
    attrs: &Attributes,
    ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    inputs.expect_len(1)?;
    let axes = attrs.required_ints("axes")?.to_vec();
    unsqueeze(inputs.required(0)?.clone(), &axes, ctx)
}

fn unsqueeze_v13(
    inputs: &Inputs,
    _attrs: &Attributes,
    ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    inputs.expect_len(2)?;
    let axes = int_values("axes", ctx.constant_value(inputs.required(1)?))?;
    unsqueeze(inputs.required(0)?.clone(), &axes, ctx)
}

/// Inserts unit dimensions one at a time. Axes index the output, so they are resolved
/// against the output rank and applied in ascending order.
fn unsqueeze(
    data: Expr,
    axes: &[i64],
    ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    let rank = ctx.tensor_type(&data)?.rank() + axes.len();
    let mut resolved = axes
        .iter()
        .map(|&axis| normalize_axis("axes", axis, rank))
        .collect::<Result<Vec<_>, _>>()?;
    resolved.sort_unstable();
    resolved.dedup();
    if resolved.len() != axes.len() {
        return Err(ConversionError::invalid_attribute(
            "axes",
            format!("{axes:?} contains duplicates"),
        ));
    }

    let out = resolved.into_iter().fold(data, |acc, axis| {
        Expr::call(
            Op::ExpandDims,
            vec![acc],
            OpAttrs::new()
                .with("axis", axis as i64)
                .with("num_newaxis", 1i64),
        )
    });
    Ok(vec![out])
}

/// Reshapes to 2-D, keeping the dimensions before `axis` in the first one.
fn flatten(
    inputs: &Inputs,
    attrs: &Attributes,
    ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    inputs.expect_len(1)?;
    let data = inputs.required(0)?.clone();
    let ty = ctx.tensor_type(&data)?;
    let axis = normalize_axis("axis", attrs.int_or("axis", 1)?, ty.rank() + 1)?;

    let product = |dims: &[Dim]| -> Option<i64> {
        dims.iter().map(|dim| dim.known().map(|size| size as i64)).product()
    };
    let newshape = match (product(&ty.shape[..axis]), product(&ty.shape[axis..])) {
        (Some(before), Some(after)) => vec![before, after],
        (Some(before), None) => vec![before, -1],
        (None, Some(after)) => vec![-1, after],
        (None, None) if axis == 1 => vec![0, -1],
        (None, None) => {
            return Err(ConversionError::Unsupported(format!(
                "flatten at axis {axis} of a dynamic shape"
            )));
        }
    };

    Ok(vec![Expr::call(
        Op::Reshape,
        vec![data],
        OpAttrs::new().with("newshape", newshape),
    )])
}

fn split_v1(
    inputs: &Inputs,
    attrs: &Attributes,
    ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    inputs.expect_between(1, 2)?;
    let sizes = match (attrs.ints("split")?, inputs.get(1)) {
        (Some(sizes), _) => Some(sizes.to_vec()),
        (None, Some(sizes)) => Some(int_values("split", ctx.constant_value(sizes))?),
        (None, None) => None,
    };
    split(inputs.required(0)?.clone(), sizes, attrs, ctx)
}

fn split_v13(
    inputs: &Inputs,
    attrs: &Attributes,
    ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    inputs.expect_between(1, 2)?;
    let sizes = inputs
        .get(1)
        .map(|sizes| int_values("split", ctx.constant_value(sizes)))
        .transpose()?;
    split(inputs.required(0)?.clone(), sizes, attrs, ctx)
}

/// Splits into explicit part sizes, or into as many equal parts as the node has outputs.
fn split(
    data: Expr,
    sizes: Option<Vec<i64>>,
    attrs: &Attributes,
    ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    let axis = attrs.int_or("axis", 0)?;
    let mut split_attrs = OpAttrs::new().with("axis", axis);

    let parts = match sizes {
        Some(sizes) => {
            let indices: Vec<i64> = sizes
                .iter()
                .scan(0, |offset, size| {
                    *offset += size;
                    Some(*offset)
                })
                .take(sizes.len().saturating_sub(1))
                .collect();
            split_attrs.insert("indices", indices);
            sizes.len()
        }
        None => {
            let sections = ctx.num_outputs();
            split_attrs.insert("sections", sections as i64);
            sections
        }
    };

    let tuple = Expr::call(Op::Split, vec![data], split_attrs);
    Ok((0..parts)
        .map(|index| Expr::tuple_get_item(tuple.clone(), index))
        .collect())
}
