use std::path::PathBuf;

use clap::Parser;
use log::{info, warn};
use segeval_rs::{AssignmentStrategy, EvalParams, EvaluationEngine, Manifest};

#[derive(Parser)]
#[command(name = "segeval")]
#[command(
    about = "Polygon instance-segmentation evaluation: class-aware IoU matching between two annotation sets"
)]
struct Cli {
    /// Path to the JSON manifest of image pairs
    #[arg(long)]
    manifest: PathBuf,

    /// Optional JSON file with evaluation parameters
    #[arg(long)]
    config: Option<PathBuf>,

    /// Minimum IoU for a pair to be matched (overrides the config file)
    #[arg(long)]
    min_iou: Option<f64>,

    /// Keep polygon records that are 4-point axis-aligned rectangles
    #[arg(long)]
    keep_degenerate_quads: bool,

    /// Assignment solver: hungarian or exhaustive
    #[arg(long)]
    strategy: Option<String>,

    /// Worker threads (default: available cores)
    #[arg(long)]
    threads: Option<usize>,

    /// Print per-image match records
    #[arg(long)]
    per_image: bool,

    /// Emit the report as JSON instead of a table
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut params = match &cli.config {
        Some(path) => EvalParams::from_json_file(path)?,
        None => EvalParams::default(),
    };
    if let Some(min_iou) = cli.min_iou {
        params.min_iou_threshold = min_iou;
    }
    if cli.keep_degenerate_quads {
        params.reject_degenerate_quads = false;
    }
    if let Some(strategy) = cli.strategy.as_deref() {
        params.strategy = match strategy {
            "hungarian" => AssignmentStrategy::Hungarian,
            "exhaustive" => AssignmentStrategy::Exhaustive,
            other => {
                return Err(format!(
                    "Unknown strategy: '{}'. Use hungarian or exhaustive.",
                    other
                )
                .into());
            }
        };
    }

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }

    let engine = EvaluationEngine::new(params)?;

    info!("Loading manifest from {:?}...", cli.manifest);
    let manifest = Manifest::from_json_file(&cli.manifest)?;

    info!("Evaluating {} image(s)...", manifest.images.len());
    let evaluation = engine.evaluate_dataset(&manifest.images);

    for image in &evaluation.images {
        for diagnostic in &image.diagnostics {
            warn!("{}", diagnostic);
        }
    }
    for failure in &evaluation.failures {
        warn!("{}: skipped: {}", failure.name, failure.error);
    }

    if cli.json {
        let failures: Vec<serde_json::Value> = evaluation
            .failures
            .iter()
            .map(|f| serde_json::json!({ "name": f.name, "error": f.error.to_string() }))
            .collect();
        let mut out = serde_json::json!({
            "images_evaluated": evaluation.report.images(),
            "classes": evaluation.report.summary(),
            "failures": failures,
        });
        if cli.per_image {
            out["images"] = serde_json::to_value(&evaluation.images)?;
        }
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if cli.per_image {
        for image in &evaluation.images {
            println!("{}:", image.name);
            // record positions, so rows trace back to the manifest
            for rec in image.matches.records() {
                let side = |idx: Option<usize>| idx.map_or("-".to_string(), |i| i.to_string());
                println!(
                    "  class={:<8} gt={:>4} pred={:>4} iou={:.4}",
                    engine.params().class_name(rec.class_id),
                    side(rec.ground_truth_record),
                    side(rec.predicted_record),
                    rec.iou
                );
            }
        }
    }

    evaluation.report.print_summary(engine.params());
    if !evaluation.failures.is_empty() {
        println!("Images failed: {}", evaluation.failures.len());
    }

    Ok(())
}
