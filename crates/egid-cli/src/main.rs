use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use egid_core::detector::digit_labels;
use egid_core::{
    decode_or_empty, decode_strict_or_empty, DecodedId, ExtractionReport, IdExtractor,
    TextRecognizer, YoloDetector,
};
use std::path::{Path, PathBuf};

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "egid", about = "Egyptian national ID card extraction CLI")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode birth date, governorate and gender from national ID numbers
    Decode {
        /// 14-digit national ID numbers
        #[arg(required = true)]
        ids: Vec<String>,
        /// Treat birth dates that are not real calendar dates as undecodable
        #[arg(long)]
        strict: bool,
    },
    /// Extract card fields from ID card photos
    Extract {
        /// Photos of national ID cards
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Directory to save the cropped card of each photo as PNG
        #[arg(long)]
        save_crop: Option<PathBuf>,
    },
    /// List governorate codes
    Governorates,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Decode { ids, strict } => {
            for id in &ids {
                let decoded = decode_one(id, strict);
                println!("{}", serde_json::to_string(&decoded)?);
            }
        }
        Commands::Extract { images, save_crop } => {
            let config = Config::load(cli.config.as_deref())?;
            run_extract(&config, &images, save_crop.as_deref())?;
        }
        Commands::Governorates => {
            for g in egid_core::decoder::governorates() {
                println!("{}  {}", g.code, g.name);
            }
        }
    }

    Ok(())
}

fn decode_one(id: &str, strict: bool) -> DecodedId {
    if strict {
        decode_strict_or_empty(Some(id))
    } else {
        decode_or_empty(Some(id))
    }
}

/// Output path for the cropped card of the `index`-th input image.
fn crop_path(dir: &Path, index: usize, image: &Path) -> PathBuf {
    let stem = image.file_stem().and_then(|s| s.to_str()).unwrap_or("card");
    dir.join(format!("{index:03}_{stem}_card.png"))
}

fn run_extract(config: &Config, images: &[PathBuf], save_crop: Option<&Path>) -> Result<()> {
    let options = config.detector_options();

    let card = YoloDetector::load(&config.card_model_path(), config.card_labels.clone(), options)
        .context("loading card detector")?;
    let fields = YoloDetector::load(&config.field_model_path(), config.field_labels.clone(), options)
        .context("loading field detector")?;
    let digits = YoloDetector::load(&config.digit_model_path(), digit_labels(), options)
        .context("loading digit detector")?;
    let reader = TextRecognizer::load(&config.recognizer_model_path(), &config.dictionary_path())
        .context("loading text recognizer")?;

    let mut extractor =
        IdExtractor::new(card, fields, digits, reader).with_nid_expand_scale(config.nid_expand_scale);

    if let Some(dir) = save_crop {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    for (index, path) in images.iter().enumerate() {
        tracing::info!(image = %path.display(), "processing");

        let image = match image::open(path) {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!(image = %path.display(), error = %e, "failed to open image");
                let report = ExtractionReport::failure(format!("An error occurred during processing: {e}"));
                println!("{}", serde_json::to_string_pretty(&report)?);
                continue;
            }
        };

        let result = extractor.extract(&image);

        if let (Some(dir), Ok(extraction)) = (save_crop, &result) {
            let out = crop_path(dir, index, path);
            match extraction.cropped_card.save(&out) {
                Ok(()) => tracing::info!(path = %out.display(), "saved cropped card"),
                Err(e) => {
                    tracing::warn!(path = %out.display(), error = %e, "failed to save cropped card")
                }
            }
        }

        let report = ExtractionReport::from_result(&result);
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(())
}
