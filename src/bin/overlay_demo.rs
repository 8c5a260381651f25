//! overlay_demo - synthetic end-to-end run of the occlusion overlay
//!
//! Pulls frames from a `stub://` camera, runs the synthetic detector and
//! segmenter through the frame orchestrator, and composites the mask into a
//! software render target. A fixed-distance hit tester stands in for the
//! tracking platform.

use anyhow::{anyhow, Result};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use occlusion_overlay::{
    depth_buffer_value, open_source, AffineTransform, BackendRegistry, DrawStats, FrameContext,
    FrameOrchestrator, FrameSource, HitTester, OverlayConfig, OverlaySnapshot, RenderTarget, Scene,
    SubmitOutcome, SurfaceHit, SyntheticBackend, ViewPoint,
};

/// Mask raster resolution for the synthetic segmenter.
const MASK_SIZE: u32 = 64;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Frames to process; 0 runs until Ctrl+C.
    #[arg(long, default_value_t = 90)]
    frames: u64,
    /// Config file (.toml or JSON). Defaults to $OVERLAY_CONFIG.
    #[arg(long, env = "OVERLAY_CONFIG")]
    config: Option<PathBuf>,
    /// Print the composited overlay as ASCII after each frame.
    #[arg(long)]
    ascii: bool,
    /// Emit one JSON report per frame on stdout.
    #[arg(long)]
    json: bool,
    /// Camera distance reported by the stand-in hit tester, in meters.
    #[arg(long, default_value_t = 1.5)]
    distance: f64,
    /// Paint a nearer vertical strip into the depth buffer to show occlusion.
    #[arg(long)]
    occluder: bool,
    /// Render target size as a fraction of the viewport.
    #[arg(long, default_value_t = 0.25)]
    render_scale: f32,
    /// Write the last composited frame as PNG.
    #[cfg(feature = "snapshot")]
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

/// Reports one surface straight ahead at a fixed distance.
struct FixedDistanceHitTester {
    distance: f64,
}

impl HitTester for FixedDistanceHitTester {
    fn hit_test(&self, _point: ViewPoint) -> Vec<SurfaceHit> {
        vec![SurfaceHit {
            position: [0.0, 0.0, -(self.distance as f32)],
            distance: self.distance,
        }]
    }
}

#[derive(Serialize)]
struct FrameReport<'a> {
    sequence: u64,
    submit: SubmitOutcome,
    snapshot: &'a OverlaySnapshot,
    draws: &'a [DrawStats],
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if !(args.render_scale.is_finite() && args.render_scale > 0.0) {
        return Err(anyhow!("render scale must be positive"));
    }

    let cfg = OverlayConfig::load_with_file(args.config.as_deref())?;
    log::info!(
        "tracking '{}' (class {}), {:?} ordering, {:?} depth mode",
        cfg.reconciler.target_label,
        cfg.class_index,
        cfg.ordering,
        cfg.render.depth_mode
    );

    let mut registry = BackendRegistry::new();
    registry.register(
        SyntheticBackend::new(&[cfg.reconciler.target_label.as_str()], cfg.class_index)
            .with_mask_size(MASK_SIZE, MASK_SIZE),
    );
    registry.warm_up_all()?;

    let scene = Arc::new(Mutex::new(Scene::new()));
    let orchestrator = FrameOrchestrator::new(
        cfg.orchestrator_settings(),
        Arc::new(registry),
        Arc::new(FixedDistanceHitTester {
            distance: args.distance,
        }),
        scene,
    )?;

    let width = ((cfg.viewport.width * args.render_scale).round() as u32).max(1);
    let height = ((cfg.viewport.height * args.render_scale).round() as u32).max(1);
    let projection = cfg.render.projection;
    let mut target = RenderTarget::new(width, height, projection)?;
    let occluder_depth = if args.occluder {
        let value = depth_buffer_value(projection.planes, args.distance * 0.5, projection.reverse_z)
            .ok_or_else(|| anyhow!("occluder distance is outside the clip planes"))?;
        Some(value)
    } else {
        None
    };

    let mut source = open_source(cfg.camera.clone())?;
    source.connect()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_shutdown = shutdown.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        handler_shutdown.store(true, Ordering::SeqCst);
    }) {
        log::warn!("failed to install Ctrl+C handler: {}", err);
    }

    let frame_interval = Duration::from_secs_f64(1.0 / f64::from(cfg.camera.target_fps));
    let mut processed = 0u64;
    while args.frames == 0 || processed < args.frames {
        if shutdown.load(Ordering::SeqCst) {
            log::info!("shutdown requested");
            break;
        }
        let started = Instant::now();

        let frame = Arc::new(source.next_frame()?);
        let sequence = frame.sequence;
        let submit = orchestrator.submit_frame(FrameContext {
            frame,
            display_transform: AffineTransform::IDENTITY,
            viewport: cfg.viewport,
            projection,
        })?;

        target.clear([0, 0, 0, 255]);
        if let Some(depth) = occluder_depth {
            target.fill_depth(width * 2 / 5, 0, width * 3 / 5, height, depth);
        }
        let draws = orchestrator.render(&mut target)?;

        if args.json {
            let snapshot = orchestrator.snapshot()?;
            let report = FrameReport {
                sequence,
                submit,
                snapshot: &snapshot,
                draws: &draws,
            };
            println!("{}", serde_json::to_string(&report)?);
        }
        if args.ascii {
            print_ascii(&target);
        }

        processed += 1;
        if let Some(remaining) = frame_interval.checked_sub(started.elapsed()) {
            std::thread::sleep(remaining);
        }
    }

    if !orchestrator.wait_idle(Duration::from_secs(2))? {
        log::warn!("inference still in flight at exit");
    }
    let stats = orchestrator.stats();
    log::info!(
        "{} frames: {} dispatched, {} dropped busy, {} resolved, {} failed",
        stats.frames_seen,
        stats.dispatched,
        stats.dropped_busy,
        stats.resolved,
        stats.failed
    );

    #[cfg(feature = "snapshot")]
    if let Some(path) = &args.snapshot {
        write_snapshot(&target, path)?;
        log::info!("wrote {}", path.display());
    }

    Ok(())
}

/// Coarse view of the color attachment: `#` where the overlay landed.
fn print_ascii(target: &RenderTarget) {
    const COLUMNS: u32 = 48;
    let step_x = target.width().div_ceil(COLUMNS).max(1);
    let step_y = step_x * 2;
    let mut out = String::new();
    for y in (0..target.height()).step_by(step_y as usize) {
        for x in (0..target.width()).step_by(step_x as usize) {
            let lit = target
                .color_at(x, y)
                .map(|px| px[..3].iter().any(|&c| c > 0))
                .unwrap_or(false);
            out.push(if lit { '#' } else { '.' });
        }
        out.push('\n');
    }
    eprintln!("{}", out);
}

#[cfg(feature = "snapshot")]
fn write_snapshot(target: &RenderTarget, path: &std::path::Path) -> Result<()> {
    use anyhow::Context;

    let image = image::RgbaImage::from_raw(target.width(), target.height(), target.rgba_bytes())
        .ok_or_else(|| anyhow!("color buffer does not match target dimensions"))?;
    image
        .save(path)
        .with_context(|| format!("write snapshot {}", path.display()))
}
