use std::error::Error;
use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use log::LevelFilter;
use onnx_frontend::{ImportConfig, Importer, logger::init_log};
use tensor_ir::DType;

/// Imports an ONNX model and prints the resulting IR function.
#[derive(Parser, Debug)]
#[command(version)]
pub struct Args {
    /// Path of the ONNX model.
    pub model: PathBuf,

    /// JSON import configuration; flags below override it.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Convert with this opset instead of the model's own.
    #[arg(long)]
    pub opset: Option<usize>,

    /// Bind initializers as constants instead of parameters.
    #[arg(long)]
    pub freeze: bool,

    /// Shape of an input, as `name=d0,d1,...`. Repeatable.
    #[arg(long, value_parser = parse_shape)]
    pub shape: Vec<(String, Vec<usize>)>,

    /// Element type of every input (`float32`), or of one input (`name=int64`). Repeatable.
    #[arg(long, value_parser = parse_dtype)]
    pub dtype: Vec<(Option<String>, DType)>,

    /// Log verbosity.
    #[arg(long, value_parser = parse_level, default_value = "info")]
    pub log_level: LevelFilter,
}

fn parse_shape(arg: &str) -> Result<(String, Vec<usize>), String> {
    let (name, dims) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected `name=d0,d1,...`, got `{arg}`"))?;
    let dims = dims
        .split(',')
        .map(|dim| {
            dim.trim()
                .parse::<usize>()
                .map_err(|err| format!("invalid dimension `{dim}`: {err}"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((name.to_string(), dims))
}

fn parse_dtype(arg: &str) -> Result<(Option<String>, DType), String> {
    let (name, dtype) = match arg.split_once('=') {
        Some((name, dtype)) => (Some(name.to_string()), dtype),
        None => (None, arg),
    };
    let dtype = DType::from_str(dtype).map_err(|_| format!("unknown element type `{dtype}`"))?;
    Ok((name, dtype))
}

fn parse_level(arg: &str) -> Result<LevelFilter, String> {
    LevelFilter::from_str(arg).map_err(|err| err.to_string())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_log(args.log_level)?;

    let mut importer = Importer::new();
    if let Some(path) = &args.config {
        importer.with_config(ImportConfig::load(path)?);
    }
    if let Some(opset) = args.opset {
        importer.opset(opset);
    }
    if args.freeze {
        importer.freeze_params(true);
    }
    for (name, shape) in &args.shape {
        importer.shape(name, shape);
    }
    for (name, dtype) in &args.dtype {
        match name {
            Some(name) => importer.input_dtype(name, *dtype),
            None => importer.dtype(*dtype),
        };
    }

    let imported = importer.import_file(&args.model)?;
    println!("{}", imported.function);
    for (name, value) in &imported.params {
        println!("// param %{name}: {}", value.ty());
    }

    Ok(())
}
