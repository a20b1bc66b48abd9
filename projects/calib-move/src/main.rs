mod cli;
mod config;
mod error;
mod pipeline;
mod run_artifacts;
mod run_context;
mod video;
mod window;

use anyhow::Result;
use cli::{Args, Command, TemplateArgs, TrackArgs};
use pipeline::tracker::track_video;
use tracing_subscriber::EnvFilter;
use window::WindowSpec;

fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse_args();

    match args.command {
        Command::Track(track) => run_track(&track),
        Command::Template(template) => run_template(&template),
    }
}

fn run_track(args: &TrackArgs) -> Result<()> {
    // Everything that can be rejected up front is checked before any video
    // is decoded.
    let config = args.tracker_config()?;
    let windows = WindowSpec::from_argument(&args.static_window)?;
    let paths = run_context::discover_videos(&args.input_path)?;
    let mut videos = run_context::gather_videos(&paths, &windows, &config)?;

    tracing::info!(
        "Tracking {} video(s): n_init_steps={}, blending={:?}, n_main_steps={}, detector={}, matcher={}",
        videos.len(),
        config.n_init_steps,
        config.blending,
        config.n_main_steps,
        config.detector,
        config.matcher
    );

    let mut failed = Vec::new();
    for video in videos.iter_mut() {
        let run = match run_context::create_run(&args.output_path, video, &config, args.overwrite) {
            Ok(run) => run,
            Err(e) => {
                tracing::error!("{}: {}", video.name, e);
                failed.push(video.name.clone());
                continue;
            }
        };

        let outcome = track_video(video, &config).and_then(|reference| {
            run_artifacts::write_artifacts(&run.output_dir, video, &reference)
        });
        match outcome {
            Ok(summary) => tracing::info!(
                "{}: {}/{} valid steps, max displacement {}",
                video.name,
                summary.valid_steps,
                summary.steps,
                summary
                    .max_displacement
                    .map(|d| format!("{:.2}px", d))
                    .unwrap_or_else(|| "n/a".to_string())
            ),
            Err(e) => {
                tracing::error!("{}: {}", video.name, e);
                if let Err(cleanup) = run_context::discard_run(&run) {
                    tracing::warn!("{}: could not remove partial output: {}", video.name, cleanup);
                }
                failed.push(video.name.clone());
            }
        }
    }

    if !failed.is_empty() {
        anyhow::bail!(
            "{} of {} video(s) failed: {}",
            failed.len(),
            videos.len(),
            failed.join(", ")
        );
    }
    Ok(())
}

fn run_template(args: &TemplateArgs) -> Result<()> {
    let count = run_context::write_template_mapping(&args.video_folder, &args.output)?;
    println!(
        "Wrote {} entries to {}. Replace every hh:mm:ss-hh:mm:ss with a static window.",
        count,
        args.output.display()
    );
    Ok(())
}
