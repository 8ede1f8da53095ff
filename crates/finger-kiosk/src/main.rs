use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use finger_core::capture::CaptureAudit;
use finger_core::errors::{AppError, AppResult};
use finger_core::liveness::{ImageClassifier, LivenessGate};
use finger_core::sensor::{FileTemplateStore, SpoolSensor};
use finger_kiosk::cli::{Cli, OutputMode};
use finger_kiosk::config::{load_config, spool_sensor_config, KioskSettings};
use finger_kiosk::console::{spawn_console_input, ConsoleDisplay, VirtualButtons};
use finger_kiosk::controller::OperationController;
use finger_kiosk::flags::ControlFlags;
use finger_kiosk::operations::Station;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.output_mode());

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err.human_message(), "finger-kiosk stopped");
            eprintln!("finger-kiosk: {}", err.human_message());
            err.exit_code()
        }
    }
}

fn run(cli: &Cli) -> AppResult<()> {
    let loaded = load_config(cli.config.as_deref())?;
    match &loaded.source {
        Some(path) => {
            tracing::info!(target: "kiosk.config", path = %path.display(), "configuration loaded")
        }
        None => tracing::info!(
            target: "kiosk.config",
            "No configuration file found; using built-in defaults"
        ),
    }
    let config = loaded.resolved;

    // Without a model there is no liveness checking at all, so refuse to start.
    let classifier = ImageClassifier::load(&config.model_path)?;
    let gate = LivenessGate::new(Arc::new(classifier));

    let flags = Arc::new(ControlFlags::new(config.spoof_check_enabled));
    let handler_flags = Arc::clone(&flags);
    ctrlc::set_handler(move || handler_flags.request_shutdown())
        .map_err(|err| AppError::Input(format!("failed to install interrupt handler: {err}")))?;

    let settings = KioskSettings::from_resolved(&config);
    let sensor = SpoolSensor::new(
        spool_sensor_config(&config),
        FileTemplateStore::new(&config.template_store),
    );
    let display = ConsoleDisplay::stdout(settings.display_columns);
    let buttons = VirtualButtons::new();
    let positions = spawn_console_input(buttons.clone(), settings.capture_poll)?;

    let mut controller = OperationController::new(
        Station::new(sensor, display),
        buttons.panel(),
        positions,
        gate,
        flags,
        settings,
    );
    if let Some(dir) = &config.audit_dir {
        controller = controller.with_audit(CaptureAudit::new(dir));
    }

    tracing::info!(
        target: "kiosk.controller",
        spool = %config.spool_dir.display(),
        spoof_check = config.spoof_check_enabled,
        "kiosk started"
    );
    let station = controller.run()?;
    drop(station);
    tracing::info!(target: "kiosk.controller", "devices released");
    Ok(())
}

fn init_tracing(verbose: u8, mode: OutputMode) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let installed = match mode {
        OutputMode::Human => {
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(env_filter);
            tracing::subscriber::set_global_default(tracing_subscriber::registry().with(fmt_layer))
        }
        OutputMode::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_filter(env_filter);
            tracing::subscriber::set_global_default(tracing_subscriber::registry().with(fmt_layer))
        }
    };
    if installed.is_err() {
        // Already initialised (tests).
    }
}
