//! Command-line surface (SPEC_FULL.md §6): a `serve` subcommand standing in for the
//! server half and a `join` subcommand for the client half, mirroring the teacher's
//! `Cli`/`Subcommand`/`#[command(flatten)] logging: LoggingArgs` shape in
//! `main.rs` (there: `host`/`join`/`ssh`; here: `serve`/`join`, since this spec has
//! no SSH-bootstrap concern).

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use asciichat_core::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "asciichat",
    about = "Multi-user ASCII video chat server and client",
    author,
    version
)]
pub struct Cli {
    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "ASCIICHAT_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log",
        value_name = "PATH",
        env = "ASCIICHAT_LOG_FILE",
        help = "Write structured logs to the specified file instead of stderr"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the mixing/rendering server
    Serve(ServeArgs),
    /// Join a running server as a participant
    Join(JoinArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[arg(long, env = "ASCIICHAT_PORT", default_value_t = 27224, help = "TCP port to listen on")]
    pub port: u16,

    #[arg(
        long,
        env = "ASCIICHAT_ADDRESS",
        default_value = "0.0.0.0",
        help = "Address to bind the listener to"
    )]
    pub address: IpAddr,

    #[arg(
        long,
        value_name = "PATH",
        env = "ASCIICHAT_KEY",
        help = "OpenSSH-format Ed25519 private key proving the server's identity"
    )]
    pub key: Option<PathBuf>,

    #[arg(
        long = "client-keys",
        value_name = "PATH",
        env = "ASCIICHAT_CLIENT_KEYS",
        help = "Allowlist of OpenSSH Ed25519 public keys permitted to join"
    )]
    pub client_keys: Option<PathBuf>,

    #[arg(long, help = "Require a shared password instead of (or alongside) client keys; prompted if flag given with no value", num_args = 0..=1, default_missing_value = "")]
    pub password: Option<String>,

    #[arg(long = "no-encrypt", action = clap::ArgAction::SetTrue, help = "Disable the AEAD session layer entirely")]
    pub no_encrypt: bool,

    #[arg(long = "max-clients", default_value_t = 32, help = "Maximum number of simultaneously admitted clients")]
    pub max_clients: u32,

    #[arg(long, value_name = "PATH", help = "Optional TOML config file (lowest precedence)")]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct JoinArgs {
    #[arg(value_name = "HOST:PORT", help = "Server address to connect to")]
    pub target: String,

    #[arg(long = "name", default_value = "anonymous", help = "Display name presented to other participants")]
    pub display_name: String,

    #[arg(long, value_name = "PATH", env = "ASCIICHAT_IDENTITY", help = "OpenSSH Ed25519 private key to authenticate with")]
    pub identity: Option<PathBuf>,

    #[arg(long, help = "Shared password, prompted interactively if flag given with no value", num_args = 0..=1, default_missing_value = "")]
    pub password: Option<String>,

    #[arg(
        long = "insecure-no-verify",
        action = clap::ArgAction::SetTrue,
        help = "Skip known-hosts verification of the server's identity key"
    )]
    pub insecure_no_verify: bool,

    #[arg(long = "no-encrypt", action = clap::ArgAction::SetTrue, help = "Disable the AEAD session layer entirely")]
    pub no_encrypt: bool,

    #[arg(long = "known-hosts", value_name = "PATH", help = "Override the known_hosts file location")]
    pub known_hosts: Option<PathBuf>,

    #[arg(long, default_value_t = 80, help = "Requested grid width in character cells")]
    pub width: u16,

    #[arg(long, default_value_t = 24, help = "Requested grid height in character cells")]
    pub height: u16,

    #[arg(long = "fps", default_value_t = 30, help = "Desired frame rate (clamped to [5, 144])")]
    pub desired_fps: u8,

    #[arg(long = "color", value_enum, default_value_t = CliColorLevel::Truecolor, help = "Color depth to negotiate")]
    pub color_level: CliColorLevel,

    #[arg(long = "render-mode", value_enum, default_value_t = CliRenderMode::Foreground, help = "Glyph/color render mode")]
    pub render_mode: CliRenderMode,

    #[arg(long = "no-video", action = clap::ArgAction::SetTrue, help = "Do not stream a video source")]
    pub no_video: bool,

    #[arg(long = "no-audio", action = clap::ArgAction::SetTrue, help = "Do not stream audio")]
    pub no_audio: bool,

    #[arg(long = "stretch", action = clap::ArgAction::SetTrue, help = "Stretch remote tiles to fill their slot instead of letterboxing")]
    pub stretch: bool,

    #[arg(long = "dither", action = clap::ArgAction::SetTrue, help = "Enable ordered dithering in 16-color mode")]
    pub dither: bool,

    #[arg(
        long = "video-source",
        value_name = "webcam|file:PATH",
        help = "Video source; defaults to a synthetic webcam stand-in"
    )]
    pub video_source: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliColorLevel {
    None,
    Ansi16,
    Ansi256,
    Truecolor,
}

impl CliColorLevel {
    pub fn to_wire(self) -> u32 {
        match self {
            CliColorLevel::None => 0,
            CliColorLevel::Ansi16 => 1,
            CliColorLevel::Ansi256 => 2,
            CliColorLevel::Truecolor => 3,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliRenderMode {
    Foreground,
    Background,
    HalfBlock,
}

impl CliRenderMode {
    pub fn to_wire(self) -> u32 {
        match self {
            CliRenderMode::Foreground => 0,
            CliRenderMode::Background => 1,
            CliRenderMode::HalfBlock => 2,
        }
    }
}
