//! Configuration for widu.
//!
//! Two layers:
//!
//! - [`Settings`]: the persisted connection and job setup, stored as JSON
//! - [`Cli`]: command-line arguments, each also settable through a `WIDU_`
//!   environment variable, overriding the settings file
//!
//! Secrets are never written to the settings file.
//!
//! # Environment Variables
//!
//! - `WIDU_SETTINGS` - Settings file (default: widu.json)
//! - `WIDU_HOST` - Remote host
//! - `WIDU_PORT` - SSH port (default: 22)
//! - `WIDU_USER` - Remote user name
//! - `WIDU_BASE_FOLDER` - Remote folder job directories are created in
//! - `WIDU_AUTH` - `password` or `key-file`
//! - `WIDU_KEY_FILE` - Private key file
//! - `WIDU_COMMAND` - Remote segmentation command
//! - `WIDU_POLL_INTERVAL` - Seconds between completion checks (default: 5)
//! - `WIDU_POLL_TIMEOUT` - Give up waiting after this many seconds
//! - `WIDU_PASSWORD` - Password
//! - `WIDU_KEY_PASSPHRASE` - Private key passphrase

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::job::{JobOptions, PollOptions};
use crate::remote::{AuthConfig, AuthMethod, Secrets, SshTarget};
use crate::tile::{TilingParams, DEFAULT_TILE_SIZE, REFERENCE_PIXEL_SIZE};

// =============================================================================
// Default Values
// =============================================================================

/// Default settings file.
pub const DEFAULT_SETTINGS_FILE: &str = "widu.json";

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default seconds between two completion checks.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Default TCP connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// Persisted Settings
// =============================================================================

/// Connection and job setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub username: String,

    /// Remote folder job directories are created in
    pub base_folder: String,

    pub auth: AuthMethod,
    pub key_file: Option<PathBuf>,

    /// Remote command; the job directory is appended as its last argument
    pub command: String,

    /// Edge of the square tiles sent to the remote program
    pub tile_size: u32,

    /// Pixel size images are rescaled to before tiling
    pub reference_pixel_size: f64,

    pub poll_interval_secs: u64,

    /// `None` waits for the remote job forever
    pub poll_timeout_secs: Option<u64>,

    pub connect_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_SSH_PORT,
            username: String::new(),
            base_folder: String::new(),
            auth: AuthMethod::Password,
            key_file: None,
            command: String::new(),
            tile_size: DEFAULT_TILE_SIZE,
            reference_pixel_size: REFERENCE_PIXEL_SIZE,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            poll_timeout_secs: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl Settings {
    /// Read settings from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, String> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read settings {}: {e}", path.display()))?;
        serde_json::from_str(&contents)
            .map_err(|e| format!("Failed to parse settings {}: {e}", path.display()))
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, String> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write settings as pretty-printed JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create {}: {e}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize settings: {e}"))?;
        fs::write(path, json + "\n")
            .map_err(|e| format!("Failed to write settings {}: {e}", path.display()))
    }

    /// Validate the settings and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("Remote host is required. Set --host or WIDU_HOST".to_string());
        }
        if self.port == 0 {
            return Err("port must be greater than 0".to_string());
        }
        if self.username.trim().is_empty() {
            return Err("User name is required. Set --user or WIDU_USER".to_string());
        }
        if self.base_folder.trim().is_empty() {
            return Err(
                "Remote base folder is required. Set --base-folder or WIDU_BASE_FOLDER".to_string(),
            );
        }
        if self.command.trim().is_empty() {
            return Err("Remote command is required. Set --command or WIDU_COMMAND".to_string());
        }
        if self.auth == AuthMethod::KeyFile && self.key_file.is_none() {
            return Err(
                "Key file authentication needs a key file. Set --key-file or WIDU_KEY_FILE"
                    .to_string(),
            );
        }
        if self.tile_size == 0 {
            return Err("tile_size must be greater than 0".to_string());
        }
        if !(self.reference_pixel_size.is_finite() && self.reference_pixel_size > 0.0) {
            return Err("reference_pixel_size must be a positive number".to_string());
        }
        if self.poll_interval_secs == 0 {
            return Err("poll_interval_secs must be greater than 0".to_string());
        }
        if self.poll_timeout_secs == Some(0) {
            return Err("poll_timeout_secs must be greater than 0 when set".to_string());
        }
        Ok(())
    }

    pub fn target(&self) -> SshTarget {
        SshTarget::new(self.host.clone(), self.port, self.username.clone())
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs))
    }

    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            method: self.auth,
            key_file: self.key_file.clone(),
        }
    }

    pub fn tiling_params(&self) -> TilingParams {
        TilingParams {
            tile_size: self.tile_size,
            reference_pixel_size: self.reference_pixel_size,
        }
    }

    pub fn poll_options(&self) -> PollOptions {
        PollOptions {
            interval: Duration::from_secs(self.poll_interval_secs),
            timeout: self.poll_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn job_options(&self) -> JobOptions {
        JobOptions::new(self.base_folder.clone(), self.command.clone())
            .with_poll(self.poll_options())
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// widu - segment microscopy images on a remote host.
///
/// Cuts images into tiles, runs a segmentation program over SSH on them and
/// stitches the results back with the original geometry.
#[derive(Parser, Debug, Clone)]
#[command(name = "widu")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Segment an image on the remote host.
    Segment(SegmentArgs),

    /// Open and close a session to check the connection settings.
    TestConnection(ConnectionArgs),

    /// Upload and remove a small file in the remote base folder.
    TestSend(ConnectionArgs),

    /// Show the effective settings, optionally saving them.
    Settings(SettingsArgs),
}

/// Connection options shared by all subcommands.
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Settings file.
    #[arg(long, env = "WIDU_SETTINGS", default_value = DEFAULT_SETTINGS_FILE)]
    pub settings: PathBuf,

    /// Remote host.
    #[arg(long, env = "WIDU_HOST")]
    pub host: Option<String>,

    /// SSH port.
    #[arg(short, long, env = "WIDU_PORT")]
    pub port: Option<u16>,

    /// Remote user name.
    #[arg(short, long = "user", env = "WIDU_USER")]
    pub username: Option<String>,

    /// Remote folder job directories are created in.
    #[arg(long, env = "WIDU_BASE_FOLDER")]
    pub base_folder: Option<String>,

    /// Authentication method.
    #[arg(long, value_enum, env = "WIDU_AUTH")]
    pub auth: Option<AuthMethod>,

    /// Private key file for key-file authentication.
    #[arg(long, env = "WIDU_KEY_FILE")]
    pub key_file: Option<PathBuf>,

    /// Remote segmentation command.
    #[arg(long, env = "WIDU_COMMAND")]
    pub command: Option<String>,

    /// Seconds between two completion checks.
    #[arg(long, env = "WIDU_POLL_INTERVAL")]
    pub poll_interval: Option<u64>,

    /// Give up waiting for the remote job after this many seconds.
    #[arg(long, env = "WIDU_POLL_TIMEOUT")]
    pub poll_timeout: Option<u64>,

    /// Password for password authentication.
    #[arg(long, env = "WIDU_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Passphrase of the private key.
    #[arg(long, env = "WIDU_KEY_PASSPHRASE", hide_env_values = true)]
    pub key_passphrase: Option<String>,
}

impl ConnectionArgs {
    /// Settings from the file with command-line overrides applied.
    pub fn merged(&self) -> Result<Settings, String> {
        let mut settings = Settings::load_or_default(&self.settings)?;
        self.apply(&mut settings);
        Ok(settings)
    }

    /// Like [`merged`](Self::merged), then validated.
    pub fn resolve(&self) -> Result<Settings, String> {
        let settings = self.merged()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Override settings with every option given on the command line.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(host) = &self.host {
            settings.host = host.clone();
        }
        if let Some(port) = self.port {
            settings.port = port;
        }
        if let Some(username) = &self.username {
            settings.username = username.clone();
        }
        if let Some(base_folder) = &self.base_folder {
            settings.base_folder = base_folder.clone();
        }
        if let Some(auth) = self.auth {
            settings.auth = auth;
        }
        if let Some(key_file) = &self.key_file {
            settings.key_file = Some(key_file.clone());
        }
        if let Some(command) = &self.command {
            settings.command = command.clone();
        }
        if let Some(interval) = self.poll_interval {
            settings.poll_interval_secs = interval;
        }
        if let Some(timeout) = self.poll_timeout {
            settings.poll_timeout_secs = Some(timeout);
        }
    }

    pub fn secrets(&self) -> Secrets {
        Secrets {
            password: self.password.clone(),
            key_passphrase: self.key_passphrase.clone(),
        }
    }
}

/// Options of the `segment` subcommand.
#[derive(Args, Debug, Clone)]
pub struct SegmentArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Input planes in stack order (slices of frame 1, then frame 2, ...).
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Slices per frame. Defaults to all inputs divided by the frame count.
    #[arg(long)]
    pub slices: Option<u32>,

    /// Number of frames.
    #[arg(long, default_value_t = 1)]
    pub frames: u32,

    /// Physical width of one pixel.
    #[arg(long)]
    pub pixel_width: f64,

    /// Physical height of one pixel. Defaults to the pixel width.
    #[arg(long)]
    pub pixel_height: Option<f64>,

    /// Unit of the pixel size.
    #[arg(long, default_value = "micron")]
    pub unit: String,

    /// Image title. Defaults to the first input's file stem.
    #[arg(long)]
    pub title: Option<String>,

    /// Directory the segmented planes are written to.
    #[arg(short, long, default_value = "widu-output")]
    pub output: PathBuf,
}

impl SegmentArgs {
    /// Validate the image options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.inputs.is_empty() {
            return Err("At least one input image is required".to_string());
        }
        if self.frames == 0 {
            return Err("frames must be greater than 0".to_string());
        }
        let (slices, frames) = self.stack_shape()?;
        if slices as usize * frames as usize != self.inputs.len() {
            return Err(format!(
                "{} slices x {} frames does not match {} input images",
                slices,
                frames,
                self.inputs.len()
            ));
        }
        if !(self.pixel_width.is_finite() && self.pixel_width > 0.0) {
            return Err("pixel_width must be a positive number".to_string());
        }
        if let Some(height) = self.pixel_height {
            if !(height.is_finite() && height > 0.0) {
                return Err("pixel_height must be a positive number".to_string());
            }
        }
        Ok(())
    }

    /// `(slices, frames)` of the input stack.
    pub fn stack_shape(&self) -> Result<(u32, u32), String> {
        let count = u32::try_from(self.inputs.len())
            .map_err(|_| "too many input images".to_string())?;
        let frames = self.frames.max(1);
        let slices = self.slices.unwrap_or(count / frames);
        if slices == 0 {
            return Err("slices must be greater than 0".to_string());
        }
        Ok((slices, frames))
    }

    /// Title of the input image.
    pub fn title(&self) -> String {
        self.title.clone().unwrap_or_else(|| {
            self.inputs
                .first()
                .and_then(|p| p.file_stem())
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "image".to_string())
        })
    }
}

/// Options of the `settings` subcommand.
#[derive(Args, Debug, Clone)]
pub struct SettingsArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Write the effective settings back to the settings file.
    #[arg(long, default_value_t = false)]
    pub save: bool,
}

// =============================================================================
// Tests
// =============================================================================
