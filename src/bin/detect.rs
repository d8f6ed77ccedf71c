//! detect - run a detection batch over image files and update the detection log
//!
//! Annotated images are written as PNG to the output directory, one per input,
//! and the per-image detections are printed to stdout.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::collections::HashSet;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use detection_session::{DetectionSession, SessionConfig, UploadedImage};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Images to run detection on (jpg, jpeg, png, bmp, webp).
    #[arg(value_name = "IMAGE", required = true)]
    images: Vec<PathBuf>,
    /// Confidence threshold in [0.25, 1.00]; defaults to the configured value.
    #[arg(short, long)]
    confidence: Option<f32>,
    /// Weight file; overrides DETECT_MODEL_PATH and the config file.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Detection log path; overrides DETECT_LOG_PATH and the config file.
    #[arg(long)]
    log: Option<PathBuf>,
    /// Directory for annotated images.
    #[arg(long, default_value = "detections")]
    out: PathBuf,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(&args.ui, is_tty, !stdout_is_tty);

    let mut cfg = SessionConfig::load()?;
    if let Some(model) = args.model {
        cfg.model_path = model;
    }
    if let Some(log) = args.log {
        cfg.log_path = log;
    }
    if let Some(confidence) = args.confidence {
        cfg.confidence = confidence;
    }
    cfg.validate()?;

    let mut session = {
        let _stage = ui.stage("Open session");
        DetectionSession::open(&cfg)?
    };
    if let Some(err) = session.model_error() {
        return Err(anyhow!(
            "Unable to load model. Check the specified path: {}\n{}",
            err.path().display(),
            err
        ));
    }

    let uploads = args
        .images
        .iter()
        .map(|path| UploadedImage::from_path(path))
        .collect::<Result<Vec<_>>>()?;
    session.upload(uploads)?;

    let run = {
        let _stage = ui.stage("Detect objects");
        session.detect(cfg.confidence)?
    };

    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;
    let mut written = HashSet::new();
    for outcome in &run.outcomes {
        match &outcome.result {
            Ok(result) => {
                let target = annotated_path(&args.out, &outcome.image_name, &mut written);
                result
                    .annotated_image
                    .save(&target)
                    .with_context(|| format!("failed to write {}", target.display()))?;
                println!(
                    "Detection Results for {} ({} boxes, annotated: {})",
                    outcome.image_name,
                    result.boxes.len(),
                    target.display()
                );
                for bbox in &result.boxes {
                    println!(
                        "  Class: {}, Box: [{:.1}, {:.1}, {:.1}, {:.1}], Confidence: {:.4}",
                        bbox.class_name, bbox.x, bbox.y, bbox.width, bbox.height, bbox.confidence
                    );
                }
            }
            Err(err) => println!("Detection failed for {}: {}", outcome.image_name, err.reason),
        }
    }

    let failed = run.failures().count();
    if let Err(err) = &run.saved {
        return Err(anyhow!(
            "{} new records could not be saved: {}",
            run.appended,
            err
        ));
    }
    println!(
        "Detection log updated: {} new records ({} total) in {}",
        run.appended,
        session.log().len(),
        session.store().path().display()
    );
    if failed > 0 {
        return Err(anyhow!("{} of {} images failed", failed, run.outcomes.len()));
    }
    Ok(())
}

/// `<stem>_detected.png` under `out`, with a numeric suffix when an earlier image
/// in the run already claimed that name.
fn annotated_path(out: &Path, image_name: &str, written: &mut HashSet<PathBuf>) -> PathBuf {
    let stem = Path::new(image_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(image_name);
    let mut target = out.join(format!("{stem}_detected.png"));
    let mut n = 2;
    while !written.insert(target.clone()) {
        target = out.join(format!("{stem}_{n}_detected.png"));
        n += 1;
    }
    target
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotated_names_do_not_collide() {
        let out = Path::new("detections");
        let mut written = HashSet::new();
        let names: Vec<_> = ["a.jpg", "a.png", "b.png", "a.webp"]
            .iter()
            .map(|name| annotated_path(out, name, &mut written))
            .collect();
        assert_eq!(
            names,
            vec![
                out.join("a_detected.png"),
                out.join("a_2_detected.png"),
                out.join("b_detected.png"),
                out.join("a_3_detected.png"),
            ]
        );
    }
}
