use tensor_ir::{DType, Expr, TensorData};

use super::int_values;
use crate::{
    AttributeValue, Attributes, ConversionError, ConversionRule, ConvertContext, Inputs,
    OperatorRegistry, tensor_from_proto,
};

pub(super) fn register(registry: &mut OperatorRegistry) {
    registry
        .register("Constant", 1, ConversionRule::Custom(constant_v1))
        .register("Constant", 12, ConversionRule::Custom(constant_v12))
        .register("ConstantOfShape", 9, ConversionRule::Custom(constant_of_shape));
}

fn value_tensor(attrs: &Attributes, name: &str) -> Result<Option<TensorData>, ConversionError> {
    attrs
        .tensor(name)?
        .map(|tensor| {
            tensor_from_proto(tensor).map_err(|err| ConversionError::invalid_attribute(name, err))
        })
        .transpose()
}

fn constant_v1(
    inputs: &Inputs,
    attrs: &Attributes,
    _ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    inputs.expect_len(0)?;
    let value = value_tensor(attrs, "value")?
        .ok_or_else(|| ConversionError::MissingAttribute("value".to_string()))?;
    Ok(vec![Expr::constant(value)])
}

/// From opset 12 the value may also be given as a plain number or list.
fn constant_v12(
    inputs: &Inputs,
    attrs: &Attributes,
    _ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    inputs.expect_len(0)?;
    if attrs.len() != 1 {
        return Err(ConversionError::invalid_attribute(
            "value",
            format!("expected exactly one value attribute, found {}", attrs.len()),
        ));
    }

    let value = match attrs.iter().next() {
        Some((name, AttributeValue::Tensor(_))) if name == "value" => value_tensor(attrs, name)?
            .ok_or_else(|| ConversionError::MissingAttribute(name.clone()))?,
        Some((name, AttributeValue::Float(value))) if name == "value_float" => {
            TensorData::scalar(*value)
        }
        Some((name, AttributeValue::Int(value))) if name == "value_int" => {
            TensorData::scalar(*value)
        }
        Some((name, AttributeValue::Floats(values))) if name == "value_floats" => {
            TensorData::from_vec(values.clone(), &[values.len()])?
        }
        Some((name, AttributeValue::Ints(values))) if name == "value_ints" => {
            TensorData::from_vec(values.clone(), &[values.len()])?
        }
        Some((name, value)) => {
            return Err(ConversionError::Unsupported(format!(
                "constant from `{name}` ({})",
                value.kind()
            )));
        }
        None => return Err(ConversionError::MissingAttribute("value".to_string())),
    };
    Ok(vec![Expr::constant(value)])
}

fn constant_of_shape(
    inputs: &Inputs,
    attrs: &Attributes,
    ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    inputs.expect_len(1)?;
    let shape = int_values("shape", ctx.constant_value(inputs.required(0)?))?;
    let shape = shape
        .into_iter()
        .map(|dim| {
            usize::try_from(dim).map_err(|_| {
                ConversionError::invalid_attribute("shape", format!("negative dimension {dim}"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let (dtype, fill) = match value_tensor(attrs, "value")? {
        None => (DType::Float32, 0.0),
        Some(value) if value.len() == 1 => (value.dtype(), value.to_f64_vec()[0]),
        Some(value) => {
            return Err(ConversionError::invalid_attribute(
                "value",
                format!("expected one element, found {}", value.len()),
            ));
        }
    };
    Ok(vec![Expr::constant(TensorData::full(dtype, &shape, fill))])
}
