use std::collections::BTreeMap;
use std::path::Path;

use protobuf::Message;
use tensor_ir::{DType, Expr, Function, TensorData, free_vars};

use crate::graph::{ImportSession, import_body};
use crate::protos::{GraphProto, ModelProto};
use crate::{
    DTypeOverrides, ImportConfig, ImportError, ImportWarning, OperatorRegistry, Scope,
};

/// The result of an import.
#[derive(Debug)]
pub struct ImportedModel {
    pub function: Function,
    /// Values of the function parameters that come from non-frozen initializers, by name.
    pub params: BTreeMap<String, TensorData>,
    pub warnings: Vec<ImportWarning>,
    /// The opset conversion rules were dispatched with.
    pub opset: usize,
}

/// Imports ONNX models.
#[derive(Debug, Default)]
pub struct Importer {
    config: ImportConfig,
    registry: Option<OperatorRegistry>,
}

impl Importer {
    /// Create a new `Importer` with the built-in conversion rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every option at once.
    pub fn with_config(&mut self, config: ImportConfig) -> &mut Self {
        self.config = config;
        self
    }

    /// Use `registry` instead of [`OperatorRegistry::onnx`].
    pub fn registry(&mut self, registry: OperatorRegistry) -> &mut Self {
        self.registry = Some(registry);
        self
    }

    /// Dispatch conversion rules with `opset` instead of the model's own.
    pub fn opset(&mut self, opset: usize) -> &mut Self {
        self.config.opset = Some(opset);
        self
    }

    /// Bind initializers as constants rather than function parameters.
    pub fn freeze_params(&mut self, freeze: bool) -> &mut Self {
        self.config.freeze_params = freeze;
        self
    }

    /// Set the shape of input `name`.
    pub fn shape(&mut self, name: &str, shape: &[usize]) -> &mut Self {
        self.config.shapes.insert(name.to_string(), shape.to_vec());
        self
    }

    /// Set the element type of every input.
    pub fn dtype(&mut self, dtype: DType) -> &mut Self {
        self.config.dtypes = DTypeOverrides::All(dtype);
        self
    }

    /// Set the element type of input `name`.
    pub fn input_dtype(&mut self, name: &str, dtype: DType) -> &mut Self {
        match &mut self.config.dtypes {
            DTypeOverrides::PerInput(dtypes) => {
                dtypes.insert(name.to_string(), dtype);
            }
            other => *other = DTypeOverrides::PerInput(BTreeMap::from([(name.to_string(), dtype)])),
        }
        self
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// Reads and imports a serialized model.
    pub fn import_file(&self, path: impl AsRef<Path>) -> Result<ImportedModel, ImportError> {
        let path = path.as_ref();
        log::info!("Importing {}", path.display());
        let bytes = std::fs::read(path)?;
        let model = ModelProto::parse_from_bytes(&bytes)?;
        self.import_model(&model)
    }

    pub fn import_model(&self, model: &ModelProto) -> Result<ImportedModel, ImportError> {
        let graph = model.graph.as_ref().ok_or(ImportError::MissingGraph)?;
        self.import_graph(graph, model_opset(model))
    }

    /// Imports `graph`, declared against `opset`.
    pub fn import_graph(&self, graph: &GraphProto, opset: usize) -> Result<ImportedModel, ImportError> {
        let default_registry;
        let registry = match &self.registry {
            Some(registry) => registry,
            None => {
                default_registry = OperatorRegistry::onnx();
                &default_registry
            }
        };

        let requested = self.config.opset.unwrap_or(opset);
        let session = ImportSession::new(registry, &self.config, requested);
        if requested < opset {
            session.warn(ImportWarning::OpsetDowngrade {
                requested,
                model: opset,
            });
        }

        if let Some(name) = self
            .config
            .shapes
            .keys()
            .find(|name| !graph.input.iter().any(|input| &input.name == *name))
        {
            return Err(ImportError::UnknownInputOverride(name.clone()));
        }

        let mut missing = Vec::new();
        session.check_support(graph, &mut missing);
        if !missing.is_empty() {
            return Err(ImportError::UnsupportedOperatorSet(missing));
        }

        let mut root = Scope::root();
        let mut outputs = import_body(&session, &mut root, graph)?;
        let body = match outputs.len() {
            1 => outputs.remove(0),
            _ => Expr::tuple(outputs),
        };

        let mut params = free_vars(&body);
        if let Some(var) = params.iter().find(|var| !root.declares(var)) {
            return Err(ImportError::UnboundValue {
                node: graph.name.clone(),
                name: var.name_hint().to_string(),
            });
        }
        params.sort_by_key(|var| root.params().iter().position(|param| param == var));

        let mut residual = BTreeMap::new();
        for var in &params {
            let Some(value) = root.constant(var) else {
                continue;
            };
            let name = var.name_hint().to_string();
            if residual.insert(name.clone(), value.clone()).is_some() {
                return Err(ImportError::DuplicateParameter(name));
            }
        }
        log::info!(
            "Imported `{}` with {} parameter(s) at opset {requested}",
            graph.name,
            params.len()
        );

        Ok(ImportedModel {
            function: Function::new(params, body),
            params: residual,
            warnings: session.warnings.into_inner(),
            opset: requested,
        })
    }
}

/// The opset of the default ONNX domain, or of the first import when none is for it.
fn model_opset(model: &ModelProto) -> usize {
    let imports = &model.opset_import;
    imports
        .iter()
        .find(|import| matches!(import.domain.as_str(), "" | "ai.onnx"))
        .or_else(|| imports.first())
        .map(|import| import.version.max(1) as usize)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protos::OperatorSetIdProto;
    use rstest::rstest;

    fn opset(domain: &str, version: i64) -> OperatorSetIdProto {
        let mut import = OperatorSetIdProto::new();
        import.domain = domain.to_string();
        import.version = version;
        import
    }

    #[rstest]
    #[case::default_domain(vec![opset("com.microsoft", 1), opset("", 13)], 13)]
    #[case::named_domain(vec![opset("ai.onnx", 11)], 11)]
    #[case::first_entry(vec![opset("custom", 4), opset("other", 2)], 4)]
    #[case::none(vec![], 1)]
    fn model_opset_prefers_the_default_domain(
        #[case] imports: Vec<OperatorSetIdProto>,
        #[case] expected: usize,
    ) {
        let mut model = ModelProto::new();
        model.opset_import = imports;
        assert_eq!(model_opset(&model), expected);
    }

    #[test]
    fn per_input_dtypes_accumulate() {
        let mut importer = Importer::new();
        importer
            .dtype(DType::Int8)
            .input_dtype("a", DType::Int64)
            .input_dtype("b", DType::Bool);

        let dtypes = &importer.config().dtypes;
        assert_eq!(dtypes.resolve("a"), Some(DType::Int64));
        assert_eq!(dtypes.resolve("b"), Some(DType::Bool));
        assert_eq!(dtypes.resolve("c"), None);
    }

    #[test]
    fn model_without_graph_is_rejected() {
        let err = Importer::new().import_model(&ModelProto::new()).unwrap_err();
        assert!(matches!(err, ImportError::MissingGraph));
    }
}
