//! Process entry point (SPEC_FULL.md §6 CLI surface, §7 exit-code contract).
//! Mirrors the teacher's `main.rs` shape: a thin `main` that calls `run`, maps
//! errors to an exit code, and dispatches a parsed `Cli` to one of a small number
//! of per-subcommand handlers that do the real work in library code.

mod cli;

use std::io::IsTerminal;
use std::sync::Arc;

use clap::{ArgMatches, CommandFactory, FromArgMatches, ValueSource};
use ed25519_dalek::{SigningKey, VerifyingKey};

use asciichat_core::client::capture::VideoSourceKind;
use asciichat_core::client::playback::NullSink;
use asciichat_core::client::session::{self, JoinConfig};
use asciichat_core::config::{ConfigError, FileConfig, LogTarget, ServerConfig};
use asciichat_core::crypto::keys::{load_authorized_keys, load_signing_key};
use asciichat_core::crypto::known_hosts::KnownHosts;
use asciichat_core::server::Server;
use asciichat_core::session::capabilities::{ColorLevel, PaletteType, RenderMode};
use asciichat_core::session::{Capabilities, DisplayName};
use asciichat_core::telemetry::logging as logctl;

use cli::{Cli, CliColorLevel, CliRenderMode, Command, JoinArgs, ServeArgs};

#[tokio::main]
async fn main() {
    let exit_code = run().await;
    std::process::exit(exit_code);
}

async fn run() -> i32 {
    let matches = Cli::command().get_matches();
    let serve_matches = matches.subcommand_matches("serve").cloned();
    let cli = match Cli::from_arg_matches(&matches) {
        Ok(cli) => cli,
        Err(err) => err.exit(),
    };
    let log_config = cli.logging.to_config();
    if let Err(err) = logctl::init(&log_config) {
        eprintln!("failed to initialize logging: {err}");
        return 1;
    }

    let result = match cli.command {
        Command::Serve(args) => run_serve(args, serve_matches).await,
        Command::Join(args) => run_join(args).await,
    };
    match result {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("asciichat: {err}");
            err.exit_code()
        }
    }
}

/// `thiserror`-composed top-level error for the CLI boundary only; library code
/// returns the typed errors defined in each subsystem (SPEC_FULL.md §7).
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("bind failed: {0}")]
    Bind(std::io::Error),
    #[error("crypto initialization failed: {0}")]
    CryptoInit(String),
    #[error(transparent)]
    App(#[from] asciichat_core::AppError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// SPEC_FULL.md §6: 0 success, 1 configuration error, 2 bind failure, 3 crypto
    /// initialization failure. `App` errors surfacing at this boundary are always a
    /// configuration problem (bad key file, bad capabilities) by the time they get
    /// this far up; anything session-scoped is handled and logged without ever
    /// reaching `main`.
    fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) => 1,
            CliError::Bind(_) => 2,
            CliError::CryptoInit(_) => 3,
            CliError::App(err) => err.kind().exit_code(),
            CliError::Io(_) => 1,
        }
    }
}

async fn run_serve(args: ServeArgs, serve_matches: Option<ArgMatches>) -> Result<(), CliError> {
    let file_config = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default_path()
            .filter(|path| path.exists())
            .map(|path| FileConfig::load(&path))
            .transpose()?
            .unwrap_or_default(),
    };

    let password = match args.password {
        Some(password) if password.is_empty() => {
            Some(rpassword::prompt_password("server password: ").map_err(CliError::Io)?)
        }
        other => other,
    };

    // `port`/`address`/`max_clients` carry clap defaults, so a CLI flag and an
    // unset-but-defaulted flag look identical once parsed. Only let the config
    // file's value win when clap itself reports the flag was never supplied by the
    // user or the environment (SPEC_FULL.md §6: file < env < CLI).
    let was_given = |name: &str| {
        serve_matches
            .as_ref()
            .map(|matches| !matches!(matches.value_source(name), Some(ValueSource::DefaultValue) | None))
            .unwrap_or(true)
    };
    let address = if was_given("address") {
        args.address
    } else {
        file_config
            .address
            .as_deref()
            .and_then(|addr| addr.parse().ok())
            .unwrap_or(args.address)
    };
    let port = if was_given("port") { args.port } else { file_config.port.unwrap_or(args.port) };
    let max_clients = if was_given("max_clients") {
        args.max_clients
    } else {
        file_config.max_clients.unwrap_or(args.max_clients)
    };

    let config = ServerConfig {
        address,
        port,
        key: args.key.or(file_config.key),
        client_keys: args.client_keys.or(file_config.client_keys),
        password,
        no_encrypt: args.no_encrypt || file_config.no_encrypt.unwrap_or(false),
        max_clients,
        log: LogTarget::Stderr,
    };
    config.validate()?;

    let identity: Option<SigningKey> = config
        .key
        .as_deref()
        .map(load_signing_key)
        .transpose()
        .map_err(|err| CliError::CryptoInit(err.to_string()))?;
    let allowed_keys: Vec<VerifyingKey> = match &config.client_keys {
        Some(path) => load_authorized_keys(path).map_err(|err| CliError::CryptoInit(err.to_string()))?,
        None => Vec::new(),
    };

    let addr = std::net::SocketAddr::new(config.address, config.port);
    // Bind eagerly so a port-in-use failure surfaces before any client work starts,
    // rather than deferred into `Server::run`'s first `accept()`.
    let probe = tokio::net::TcpListener::bind(addr).await.map_err(CliError::Bind)?;
    drop(probe);

    let server = Arc::new(Server::new(config, identity, allowed_keys));
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown requested");
        let _ = shutdown_tx.send(());
    });

    server.run(shutdown_rx).await.map_err(CliError::Io)?;
    Ok(())
}

async fn run_join(args: JoinArgs) -> Result<(), CliError> {
    let display_name = DisplayName::new(args.display_name).map_err(|_| {
        CliError::CryptoInit("display name exceeds 32 bytes".to_string())
    })?;

    let identity: Option<SigningKey> = args
        .identity
        .as_deref()
        .map(load_signing_key)
        .transpose()
        .map_err(|err| CliError::CryptoInit(err.to_string()))?;

    let password = match args.password {
        Some(password) if password.is_empty() => {
            Some(rpassword::prompt_password("password: ").map_err(CliError::Io)?)
        }
        other => other,
    };

    let known_hosts_path = args
        .known_hosts
        .or_else(KnownHosts::default_path)
        .ok_or_else(|| CliError::CryptoInit("could not determine known_hosts location".to_string()))?;

    let video_source = args.video_source.as_deref().map(|value| {
        if let Some(path) = value.strip_prefix("file:") {
            VideoSourceKind::File(std::path::PathBuf::from(path))
        } else {
            VideoSourceKind::Webcam
        }
    });

    let capabilities = Capabilities {
        color_level: match args.color_level {
            CliColorLevel::None => ColorLevel::None,
            CliColorLevel::Ansi16 => ColorLevel::Ansi16,
            CliColorLevel::Ansi256 => ColorLevel::Ansi256,
            CliColorLevel::Truecolor => ColorLevel::TrueColor,
        },
        color_count: match args.color_level {
            CliColorLevel::None => 0,
            CliColorLevel::Ansi16 => 16,
            CliColorLevel::Ansi256 => 256,
            CliColorLevel::Truecolor => 16_777_216,
        },
        render_mode: match args.render_mode {
            CliRenderMode::Foreground => RenderMode::Foreground,
            CliRenderMode::Background => RenderMode::Background,
            CliRenderMode::HalfBlock => RenderMode::HalfBlock,
        },
        utf8_support: std::io::stdout().is_terminal() && terminal_supports_utf8(),
        width: args.width.max(1),
        height: args.height.max(1),
        palette_type: PaletteType::Preset(0),
        palette_custom: String::new(),
        desired_fps: args.desired_fps,
        term_type: std::env::var("TERM").unwrap_or_default(),
        colorterm: std::env::var("COLORTERM").unwrap_or_default(),
        wants_padding: false,
        detection_reliable: true,
        wants_video: !args.no_video,
        wants_audio: !args.no_audio,
        wants_color: !matches!(args.color_level, CliColorLevel::None),
        stretch: args.stretch,
        dither: args.dither,
        supports_rep: std::io::stdout().is_terminal() && terminal_supports_rep(),
    };

    let join_config = JoinConfig {
        target: args.target,
        display_name,
        capabilities,
        identity,
        password,
        insecure_no_verify: args.insecure_no_verify,
        no_encrypt: args.no_encrypt,
        known_hosts_path,
        video_source,
    };

    session::run(join_config, Box::new(NullSink::default())).await?;
    Ok(())
}

/// `NO_COLOR`/`COLORTERM` do not speak to UTF-8 support; `LANG`/`LC_ALL` carrying a
/// `UTF-8` suffix is the conventional signal (SPEC_FULL.md §6 environment
/// variables).
fn terminal_supports_utf8() -> bool {
    for var in ["LC_ALL", "LC_CTYPE", "LANG"] {
        if let Ok(value) = std::env::var(var) {
            if value.to_uppercase().contains("UTF-8") || value.to_uppercase().contains("UTF8") {
                return true;
            }
        }
    }
    cfg!(windows)
}

/// `REP` (`ESC [ n b`) is ECMA-48 and implemented by every common terminal
/// emulator in practice; `dumb` is the one `TERM` value that reliably means the
/// other end does not interpret escapes at all.
fn terminal_supports_rep() -> bool {
    std::env::var("TERM").map(|term| term != "dumb").unwrap_or(true)
}
