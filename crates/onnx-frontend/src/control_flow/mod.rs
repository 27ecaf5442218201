//! Conversion rules for operators embedding subgraph bodies.
//!
//! Bodies are imported with [`ConvertContext::import_subgraph`](crate::ConvertContext::import_subgraph)
//! in a child of the current scope. Whatever they declare is spliced back into the enclosing
//! scope once the control-flow expression is built.

mod if_node;
mod loop_node;

use crate::{ConversionRule, OperatorRegistry};

pub(crate) fn register(registry: &mut OperatorRegistry) {
    registry
        .register("If", 1, ConversionRule::Custom(if_node::convert))
        .register("Loop", 11, ConversionRule::Custom(loop_node::convert));
}
