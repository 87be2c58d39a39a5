use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use objtally::counting::segmenter::ContourSegmenter;
use objtally::fewshot::DEFAULT_RECOGNITION_THRESHOLD;
use objtally::{FewShotRegistry, ItemType, ObjectCounter};

const DEFAULT_MODEL_DIR: &str = "few_shot_models";

#[derive(Parser)]
#[command(name = "objtally")]
#[command(about = "Count and recognize objects in images")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Count objects of a known type in an image
    Count {
        /// Path to input image file
        #[arg(value_name = "IMAGE")]
        image_path: PathBuf,

        /// Object type to count
        #[arg(short, long, value_enum)]
        target: ItemType,

        /// Maximum number of segments to consider
        #[arg(long, default_value_t = 10)]
        max_segments: usize,
    },

    /// Learn a new object type from example images
    Learn {
        /// Name for the new object type
        name: String,

        /// Training images (at least two)
        #[arg(long, value_name = "IMAGE", num_args = 1.., required = true)]
        train: Vec<PathBuf>,

        /// Optional validation images
        #[arg(long, value_name = "IMAGE", num_args = 1..)]
        validate: Vec<PathBuf>,

        /// Directory for persisted learned objects
        #[arg(long, value_name = "DIR", default_value = DEFAULT_MODEL_DIR)]
        model_dir: PathBuf,
    },

    /// Recognize which learned object an image shows
    Recognize {
        /// Path to input image file
        #[arg(value_name = "IMAGE")]
        image_path: PathBuf,

        /// Minimum similarity to report a match
        #[arg(long, default_value_t = DEFAULT_RECOGNITION_THRESHOLD)]
        threshold: f32,

        /// Directory for persisted learned objects
        #[arg(long, value_name = "DIR", default_value = DEFAULT_MODEL_DIR)]
        model_dir: PathBuf,
    },

    /// Count instances of a learned object in an image
    CountLearned {
        /// Path to input image file
        #[arg(value_name = "IMAGE")]
        image_path: PathBuf,

        /// Name of the learned object type
        name: String,

        /// Directory for persisted learned objects
        #[arg(long, value_name = "DIR", default_value = DEFAULT_MODEL_DIR)]
        model_dir: PathBuf,
    },

    /// List all learned object types
    List {
        /// Directory for persisted learned objects
        #[arg(long, value_name = "DIR", default_value = DEFAULT_MODEL_DIR)]
        model_dir: PathBuf,
    },

    /// Delete a learned object type
    Delete {
        /// Name of the learned object type
        name: String,

        /// Directory for persisted learned objects
        #[arg(long, value_name = "DIR", default_value = DEFAULT_MODEL_DIR)]
        model_dir: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::Count {
            image_path,
            target,
            max_segments,
        } => {
            // The heavy classification and entailment backends are
            // deployment-provided; the CLI runs with the contour
            // segmenter and the degraded-mode fallbacks.
            let counter = ObjectCounter::builder()
                .segmentation(Box::new(ContourSegmenter::new()))
                .max_segments(max_segments)
                .build();
            let outcome = counter.count_objects(&image_path, target)?;
            print_json(&outcome)?;
        }
        Command::Learn {
            name,
            train,
            validate,
            model_dir,
        } => {
            let registry = FewShotRegistry::open(model_dir)?;
            let outcome = registry.learn(&name, &train, &validate);
            print_json(&outcome)?;
        }
        Command::Recognize {
            image_path,
            threshold,
            model_dir,
        } => {
            let registry = FewShotRegistry::open(model_dir)?;
            let outcome = registry.recognize(&image_path, threshold);
            print_json(&outcome)?;
        }
        Command::CountLearned {
            image_path,
            name,
            model_dir,
        } => {
            let registry = FewShotRegistry::open(model_dir)?;
            let outcome = registry.count_learned(&image_path, &name);
            print_json(&outcome)?;
        }
        Command::List { model_dir } => {
            let registry = FewShotRegistry::open(model_dir)?;
            let mut objects = registry.list();
            objects.sort_by(|a, b| a.name.cmp(&b.name));
            print_json(&objects)?;
        }
        Command::Delete { name, model_dir } => {
            let registry = FewShotRegistry::open(model_dir)?;
            if registry.delete(&name) {
                println!("deleted \"{name}\"");
            } else {
                anyhow::bail!("no learned object named \"{name}\"");
            }
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
