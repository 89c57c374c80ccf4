//! widu - segment microscopy images on a remote host.
//!
//! This binary wires the command line to the library: it resolves settings
//! and credentials, opens the SSH session and runs the requested command.

use std::process::ExitCode;

use bytes::Bytes;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use widu::{
    config::{Cli, Command, ConnectionArgs, SegmentArgs, Settings, SettingsArgs},
    job::CancelHandle,
    remote::{resolve_credentials, FileTransfer, RemoteSession, SshSession},
    segment::{load_stack, segment, write_result},
    stack::Calibration,
};

/// Name and content of the file uploaded by `test-send`.
const TEST_FILE_NAME: &str = "test.txt";
const TEST_FILE_CONTENT: &[u8] = b"Hello world";

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Segment(args) => run_segment(args).await,
        Command::TestConnection(args) => run_test_connection(args).await,
        Command::TestSend(args) => run_test_send(args).await,
        Command::Settings(args) => run_settings(args),
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose { "widu=debug" } else { "widu=info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Resolve settings and open an authenticated session.
async fn connect(args: &ConnectionArgs) -> Result<(Settings, SshSession), String> {
    let settings = args.resolve()?;
    let target = settings.target();
    let credentials = resolve_credentials(&target, &settings.auth_config(), &args.secrets())
        .map_err(|e| e.to_string())?;
    let session = SshSession::connect(target, credentials)
        .await
        .map_err(|e| e.to_string())?;
    Ok((settings, session))
}

// =============================================================================
// Segment Command
// =============================================================================

async fn run_segment(args: SegmentArgs) -> ExitCode {
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }
    let (n_slices, n_frames) = match args.stack_shape() {
        Ok(shape) => shape,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut calibration = Calibration::new(args.pixel_width, args.unit.clone());
    if let Some(height) = args.pixel_height {
        calibration.pixel_height = height;
    }

    let image = match load_stack(args.title(), &args.inputs, n_slices, n_frames, calibration) {
        Ok(image) => image,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    info!(
        title = image.title(),
        width = image.width(),
        height = image.height(),
        slices = n_slices,
        frames = n_frames,
        "Loaded image"
    );

    let (settings, session) = match connect(&args.connection).await {
        Ok(connected) => connected,
        Err(e) => {
            error!("Connection failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancelHandle::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping job");
            on_interrupt.cancel();
        }
    });

    let result = match segment(
        session,
        &image,
        &settings.tiling_params(),
        settings.job_options(),
        Some(cancel.token()),
    )
    .await
    {
        Ok(result) => result,
        Err(e) => {
            error!("Segmentation failed: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(e) = &result.cleanup_error {
        warn!(job_id = %result.job_id, error = %e, "Remote files were left behind");
    }

    match write_result(&result, &args.output) {
        Ok(written) => {
            for path in &written {
                info!("Wrote {}", path.display());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Test Commands
// =============================================================================

async fn run_test_connection(args: ConnectionArgs) -> ExitCode {
    let (_, session) = match connect(&args).await {
        Ok(connected) => connected,
        Err(e) => {
            println!("✗ Connection failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let identifier = session.identifier().to_string();
    if let Err(e) = session.close().await {
        println!("✗ Failed to close session to {}: {}", identifier, e);
        return ExitCode::FAILURE;
    }
    println!("✓ Connection to {} successful", identifier);
    ExitCode::SUCCESS
}

async fn run_test_send(args: ConnectionArgs) -> ExitCode {
    let (settings, session) = match connect(&args).await {
        Ok(connected) => connected,
        Err(e) => {
            println!("✗ Connection failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let path = format!(
        "{}/{}",
        settings.base_folder.trim_end_matches('/'),
        TEST_FILE_NAME
    );
    let outcome = send_test_file(&session, &path).await;
    if let Err(e) = session.close().await {
        warn!(remote = session.identifier(), error = %e, "Failed to close session");
    }

    match outcome {
        Ok(()) => {
            println!("✓ Sent and removed {}", path);
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("✗ Send test failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn send_test_file(session: &SshSession, path: &str) -> Result<(), widu::RemoteError> {
    let transfer = session.open_transfer().await?;
    transfer
        .write(path, Bytes::from_static(TEST_FILE_CONTENT))
        .await?;
    transfer.remove_file(path).await
}

// =============================================================================
// Settings Command
// =============================================================================

fn run_settings(args: SettingsArgs) -> ExitCode {
    let settings = match args.connection.merged() {
        Ok(settings) => settings,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match serde_json::to_string_pretty(&settings) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            error!("Failed to serialize settings: {}", e);
            return ExitCode::FAILURE;
        }
    }

    if let Err(e) = settings.validate() {
        println!();
        println!("⚠ {}", e);
    }

    if args.save {
        if let Err(e) = settings.save(&args.connection.settings) {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
        println!("✓ Saved to {}", args.connection.settings.display());
    }

    ExitCode::SUCCESS
}
