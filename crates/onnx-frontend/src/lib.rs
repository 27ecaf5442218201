//! Imports ONNX models into the [`tensor_ir`] functional representation.
//!
//! The entry point is the [`Importer`] builder:
//!
//! ```no_run
//! use onnx_frontend::Importer;
//!
//! let imported = Importer::new()
//!     .freeze_params(true)
//!     .shape("input", &[1, 3, 224, 224])
//!     .import_file("model.onnx")
//!     .expect("model should import");
//!
//! println!("{}", imported.function);
//! ```
//!
//! Every ONNX node is converted by the rule an [`OperatorRegistry`] resolves for the
//! operator name and the opset in force. `If` and `Loop` bodies are imported recursively
//! in child [`Scope`]s and their free variables are promoted into the enclosing function.

#[macro_use]
extern crate derive_new;

mod attr_cvt;
mod attribute;
mod config;
mod context;
mod control_flow;
mod error;
mod graph;
mod importer;
mod node;
mod registry;
mod scope;
mod tensor;

pub mod builder;
pub mod logger;
pub mod protos;

pub use attr_cvt::*;
pub use attribute::*;
pub use config::*;
pub use context::*;
pub use error::*;
pub use graph::{ImportWarning, reconcile_outputs};
pub use importer::*;
pub use registry::*;
pub use scope::*;
pub use tensor::{TensorError, dtype_from_proto, dtype_to_proto, tensor_from_proto};
