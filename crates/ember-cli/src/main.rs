//! Ember CLI - inspect serialized models and run forward passes.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use ember_gpu::{Dispatcher, GpuContext, Shape, Tensor};
use ember_model::load_model;
use ember_stages::Stage;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "ember")]
#[command(about = "Staged GPU inference runtime for serialized models", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the stages of a model file
    Inspect {
        /// Path to the model file
        #[arg(value_name = "MODEL")]
        model: PathBuf,
    },
    /// Load a model and run one forward pass
    Run {
        /// Path to the model file
        #[arg(value_name = "MODEL")]
        model: PathBuf,

        /// Input tensor shape, e.g. 16x16x3
        #[arg(short, long)]
        shape: String,

        /// Raw little-endian f32 input data; zeros if omitted
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Kernel source directory (defaults to the built-in shaders)
        #[arg(long)]
        shader_root: Option<PathBuf>,

        /// Maximum number of output values to print
        #[arg(long, default_value = "16")]
        limit: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Inspect { model } => inspect(&model),
        Commands::Run {
            model,
            shape,
            input,
            shader_root,
            limit,
        } => run(&model, &shape, input.as_deref(), shader_root, limit),
    }
}

fn inspect(model: &std::path::Path) -> Result<()> {
    let pipeline = load_model(model)
        .with_context(|| format!("failed to load model '{}'", model.display()))?;

    println!("{}: {} stages", model.display(), pipeline.len());
    for (index, name) in pipeline.stage_names().iter().enumerate() {
        println!("  {index:>3}  {name}");
    }
    Ok(())
}

fn run(
    model: &std::path::Path,
    shape_arg: &str,
    input: Option<&std::path::Path>,
    shader_root: Option<PathBuf>,
    limit: usize,
) -> Result<()> {
    let extents = parse_shape(shape_arg)?;
    let shape = Shape::new(&extents).context("invalid input shape")?;

    let mut pipeline = load_model(model)
        .with_context(|| format!("failed to load model '{}'", model.display()))?;

    let data = match input {
        Some(path) => {
            let data = read_f32_file(path)?;
            if data.len() != shape.element_count() {
                bail!(
                    "input file holds {} values, shape {} needs {}",
                    data.len(),
                    shape,
                    shape.element_count()
                );
            }
            data
        }
        None => vec![0.0; shape.element_count()],
    };

    let ctx = GpuContext::new_blocking().context("GPU initialization failed")?;
    println!(
        "device: {} ({:?})",
        ctx.adapter_info().name,
        ctx.adapter_info().backend
    );

    let root = shader_root.unwrap_or_else(ember_stages::shader_root);
    let mut dispatcher = Dispatcher::with_source_root(&ctx, root);

    let input_tensor = Arc::new(Tensor::from_host(&ctx, shape, &data)?);
    let output = pipeline
        .forward(&mut dispatcher, &input_tensor)
        .context("forward pass failed")?;

    let values = output.read(&ctx)?;
    println!("output shape: {}", output.shape());
    let shown = values.len().min(limit);
    for (index, value) in values.iter().take(shown).enumerate() {
        println!("  [{index:>4}] {value:>12.6}");
    }
    if values.len() > shown {
        println!("  ... {} more values", values.len() - shown);
    }
    Ok(())
}

/// Parse "16x16x3" into extents.
fn parse_shape(arg: &str) -> Result<Vec<usize>> {
    arg.split('x')
        .map(|part| {
            part.trim()
                .parse::<usize>()
                .with_context(|| format!("invalid shape component '{part}'"))
        })
        .collect()
}

fn read_f32_file(path: &std::path::Path) -> Result<Vec<f32>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read input file '{}'", path.display()))?;
    if bytes.len() % 4 != 0 {
        bail!(
            "input file '{}' is {} bytes, not a multiple of 4",
            path.display(),
            bytes.len()
        );
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_shape_strings() {
        assert_eq!(parse_shape("8").unwrap(), vec![8]);
        assert_eq!(parse_shape("16x16x3").unwrap(), vec![16, 16, 3]);
        assert!(parse_shape("16xx3").is_err());
        assert!(parse_shape("a x b").is_err());
    }
}
