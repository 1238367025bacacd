use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tem_hw::emulated::EmulatedMirror;
use tem_hw::{
    AcquisitionConfig, BatchPause, CameraController, CameraDriver, MirrorController, MirrorDriver,
    TriggerMode,
};
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "tem", about = "Microscope camera capture and DMD pattern loading")]
struct Cli {
    /// Only print warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the camera and save frames as PNG
    Capture {
        /// Exposure time in milliseconds
        #[arg(short, long, default_value_t = 0.0, allow_negative_numbers = true)]
        exposure: f64,
        /// Hardware gain, 0-100
        #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
        gain: i64,
        /// Black level offset, 0-255
        #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
        blacklvl: i64,
        /// How each exposure is started
        #[arg(short, long, value_enum, default_value_t = Trigger::FreeRun)]
        trigger: Trigger,
        /// Save one frame here; without it, prompt for a name per frame
        #[arg(short, long)]
        filename: Option<PathBuf>,
    },
    /// Threshold images and show them on the DMD
    Mirror {
        /// Images to show in order; without any, read paths from stdin
        paths: Vec<PathBuf>,
    },
    /// Open a device, print what it reports as JSON, close it
    Probe {
        #[arg(value_enum)]
        device: Device,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Trigger {
    FreeRun,
    Software,
}

impl From<Trigger> for TriggerMode {
    fn from(t: Trigger) -> Self {
        match t {
            Trigger::FreeRun => TriggerMode::FreeRun,
            Trigger::Software => TriggerMode::Software,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Device {
    Camera,
    Mirror,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_directive = if cli.quiet { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::from_env();
    match cli.command {
        Commands::Capture {
            exposure,
            gain,
            blacklvl,
            trigger,
            filename,
        } => {
            let request = CaptureRequest {
                exposure,
                gain,
                blacklvl,
                trigger: trigger.into(),
                filename,
            };
            capture(request, &config, cli.quiet, camera_driver)
        }
        Commands::Mirror { paths } => {
            let driver = EmulatedMirror::new(config.emulated_dmd_type);
            show_images(driver, &config, &paths, cli.quiet)
        }
        Commands::Probe { device } => match device {
            Device::Camera => probe_camera(camera_driver(), &config),
            Device::Mirror => probe_mirror(EmulatedMirror::new(config.emulated_dmd_type), &config),
        },
    }
}

#[cfg(feature = "ueye")]
fn camera_driver() -> tem_hw::ueye::UeyeCamera {
    tem_hw::ueye::UeyeCamera::new()
}

#[cfg(not(feature = "ueye"))]
fn camera_driver() -> tem_hw::emulated::EmulatedCamera {
    tracing::warn!("built without camera SDK support; using emulated camera");
    tem_hw::emulated::EmulatedCamera::default()
}

/// Capture flags as given on the command line, before validation.
struct CaptureRequest {
    exposure: f64,
    gain: i64,
    blacklvl: i64,
    trigger: TriggerMode,
    filename: Option<PathBuf>,
}

/// Validates the request, then opens the camera through `open_driver`.
///
/// The driver is only constructed once every parameter has passed.
fn capture<D: CameraDriver>(
    request: CaptureRequest,
    config: &Config,
    quiet: bool,
    open_driver: impl FnOnce() -> D,
) -> Result<()> {
    let acquisition = AcquisitionConfig::validate(
        request.exposure,
        request.gain,
        request.blacklvl,
        request.trigger,
    )
    .context("invalid acquisition parameters")?;

    let mut camera = CameraController::initialize(open_driver(), config.camera_settings())
        .context("camera initialization failed")?;

    let report = camera.apply_config(&acquisition);
    for (operation, error) in report.failures() {
        tracing::error!(operation, error = %error, "configuration step failed");
    }
    if !report.is_success() {
        camera.shutdown();
        bail!("camera configuration incomplete");
    }

    camera.warm_up().context("warm-up capture failed")?;

    match request.filename {
        Some(path) => {
            camera
                .capture_and_save(&path)
                .with_context(|| format!("cannot capture to {}", path.display()))?;
            tracing::info!(path = %path.display(), "picture saved");
        }
        None => {
            let stdin = std::io::stdin();
            let saved = camera
                .run_interactive(stdin.lock(), || {
                    if !quiet {
                        print!("Enter file name to save picture: ");
                        let _ = std::io::stdout().flush();
                    }
                })
                .context("interactive capture stopped")?;
            tracing::info!(saved, "pictures saved");
        }
    }

    camera.shutdown();
    Ok(())
}

fn show_images<D: MirrorDriver>(
    driver: D,
    config: &Config,
    paths: &[PathBuf],
    quiet: bool,
) -> Result<()> {
    let mut mirror = MirrorController::initialize(driver, config.mirror_device)
        .context("mirror initialization failed")?;

    let report = if paths.is_empty() {
        let stdin = std::io::stdin();
        mirror.run_stream(stdin.lock())
    } else {
        mirror.run_batch(paths, |next| wait_for_enter(next, quiet))
    }
    .context("mirror upload stopped")?;

    tracing::info!(
        uploaded = report.uploaded(),
        skipped = report.skipped(),
        "mirror run finished"
    );
    mirror.close();
    Ok(())
}

fn wait_for_enter(next: BatchPause, quiet: bool) {
    if !quiet {
        match next {
            BatchPause::NextImage => println!("Press enter to go to next image."),
            BatchPause::Quit => println!("Press enter to quit."),
        }
    }
    let mut line = String::new();
    if let Err(e) = std::io::stdin().lock().read_line(&mut line) {
        tracing::warn!(error = %e, "cannot read from stdin; continuing");
    }
}

fn probe_camera<D: CameraDriver>(driver: D, config: &Config) -> Result<()> {
    let mut camera = CameraController::initialize(driver, config.camera_settings())
        .context("camera initialization failed")?;
    let info = serde_json::json!({
        "device": "camera",
        "unit": config.camera_id,
        "geometry": camera.geometry(),
    });
    camera.shutdown();
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

fn probe_mirror<D: MirrorDriver>(driver: D, config: &Config) -> Result<()> {
    let mut mirror = MirrorController::initialize(driver, config.mirror_device)
        .context("mirror initialization failed")?;
    let info = serde_json::json!({
        "device": "mirror",
        "unit": config.mirror_device,
        "serial": mirror.serial(),
        "dmd_type": mirror.dmd_type(),
        "description": mirror.dmd_type().description(),
        "geometry": mirror.geometry(),
    });
    mirror.close();
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}
