use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Parser;
use sso_gate::{
    AppState,
    auth::{
        CompiledMatcher, EntryPoint, NormalizedIdentity, RawIdentity, RequestContext, applicability,
    },
    build_app,
    config::SsoGateConfig,
    observability,
};

/// Config file looked up in the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "sso-gate.toml";

/// How often expired sessions are swept from memory.
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// CLI arguments for the SSO gate
#[derive(Parser, Debug)]
#[command(version, about = "Single sign-on gate for REMOTE_USER identities", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (defaults to ./sso-gate.toml if it exists,
    /// otherwise built-in defaults are used)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Start the gate server (default)
    Serve,
    /// Show whether SSO would be attempted on a path, and why not
    CheckPath {
        /// Request path, e.g. /blog/1
        #[arg(short, long)]
        path: String,
        /// Host header of the request
        #[arg(long, default_value = "localhost")]
        host: String,
        /// Evaluate as a standalone script (e.g. cron.php) instead of a
        /// front-controller path
        #[arg(long)]
        script: Option<String>,
    },
    /// Normalize a remote identity with the configured realm/domain flags
    Normalize {
        /// Raw identity, e.g. user@EXAMPLE.COM or EXAMPLE\user
        identity: String,
    },
    /// Load and validate the configuration, then exit
    Validate,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config_path = args.config.as_deref();

    match args.command {
        Some(Command::CheckPath { path, host, script }) => {
            run_check_path(config_path, &path, &host, script);
        }
        Some(Command::Normalize { identity }) => {
            run_normalize(config_path, &identity);
        }
        Some(Command::Validate) => {
            run_validate(config_path);
        }
        Some(Command::Serve) | None => {
            run_server(config_path).await;
        }
    }
}

/// Resolve the config file to load, if any.
fn resolve_config_path(explicit_path: Option<&str>) -> Option<PathBuf> {
    match explicit_path {
        Some(path) => Some(PathBuf::from(path)),
        None => {
            let default = Path::new(DEFAULT_CONFIG_FILE);
            default.exists().then(|| default.to_path_buf())
        }
    }
}

/// Load the configuration or exit with a message.
fn load_config_or_exit(explicit_path: Option<&str>) -> (SsoGateConfig, Option<PathBuf>) {
    let Some(path) = resolve_config_path(explicit_path) else {
        return (SsoGateConfig::default(), None);
    };

    match SsoGateConfig::from_file(&path) {
        Ok(config) => (config, Some(path)),
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

fn run_validate(explicit_path: Option<&str>) {
    let (config, path) = load_config_or_exit(explicit_path);
    match path {
        Some(path) => println!("Configuration OK: {}", path.display()),
        None => println!("No configuration file found; built-in defaults are valid"),
    }
    println!("  seamless login:   {}", config.sso.seamless_login);
    println!("  SSO variable:     {}", config.sso.sso_variable);
    println!("  excluded paths:   {}", config.sso.excluded_paths.len());
    println!("  excluded hosts:   {}", config.sso.excluded_hosts.len());
    println!("  directory users:  {}", config.directory.users.len());
    if !config.server.trusted_proxies.is_configured() {
        println!("  WARNING: no trusted proxies configured");
    }
}

fn run_check_path(explicit_path: Option<&str>, path: &str, host: &str, script: Option<String>) {
    let (config, _) = load_config_or_exit(explicit_path);
    let sso = config.sso.to_sso_config();

    let matcher = match CompiledMatcher::compile(sso.excluded_paths.as_slice(), &sso.frontpage_path)
    {
        Ok(matcher) => matcher,
        Err(e) => {
            eprintln!("Invalid sso.excluded_paths: {e}");
            std::process::exit(1);
        }
    };

    let entry_point = match script {
        Some(name) => EntryPoint::Script { name },
        None => EntryPoint::FrontController,
    };
    let ctx = RequestContext::builder()
        .path(path)
        .server_name(host)
        .entry_point(entry_point)
        .build();

    match applicability::exclusion(&ctx, &sso, &matcher) {
        Some(reason) => {
            println!("excluded ({}): {}", reason.as_str(), ctx.effective_path());
            if let applicability::ExclusionReason::ExcludedHost(excluded) = &reason {
                println!("  host matches excluded host '{excluded}'");
            }
        }
        None => println!("SSO applies: {}", ctx.effective_path()),
    }
}

fn run_normalize(explicit_path: Option<&str>, identity: &str) {
    let (config, _) = load_config_or_exit(explicit_path);
    let normalized = NormalizedIdentity::from_raw(
        &RawIdentity::new(identity),
        config.sso.split_user_realm,
        config.sso.strip_domain_name,
    );

    match serde_json::to_string_pretty(&normalized) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Failed to serialize identity: {e}");
            std::process::exit(1);
        }
    }
}

async fn run_server(explicit_path: Option<&str>) {
    let (config, config_path) = load_config_or_exit(explicit_path);

    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        tracing::warn!(error = %e, "Failed to initialize metrics: {e}");
    }

    match &config_path {
        Some(path) => tracing::info!(config_file = %path.display(), "Starting SSO gate"),
        None => tracing::info!("Starting SSO gate with built-in defaults"),
    }

    if !config.sso.seamless_login {
        tracing::info!("Seamless login is off; SSO only happens on /user/login/sso");
    }

    let bind_addr = SocketAddr::new(config.server.host, config.server.port);
    let state = match AppState::from_config(config) {
        Ok(state) => state,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let sessions = state.sessions.clone();
    let sweeper = tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let removed = sessions.cleanup().await;
            if removed > 0 {
                tracing::debug!(removed, "Swept expired sessions");
            }
        }
    });

    #[cfg(unix)]
    let reloader = config_path.map(|path| tokio::spawn(reload_on_hangup(state.clone(), path)));
    #[cfg(not(unix))]
    let reloader: Option<tokio::task::JoinHandle<()>> = None;

    let app = build_app(state);

    let listener = match tokio::net::TcpListener::bind(bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(address = %bind_addr, error = %e, "Failed to bind");
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on http://{}", bind_addr);

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    sweeper.abort();
    if let Some(reloader) = reloader {
        reloader.abort();
    }

    if let Err(e) = served {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
    tracing::info!("Shutdown complete");
}

/// Re-read `[sso]` from the config file on every SIGHUP.
#[cfg(unix)]
async fn reload_on_hangup(state: AppState, path: PathBuf) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            tracing::error!(error = %e, "Failed to install SIGHUP handler");
            return;
        }
    };

    while hangup.recv().await.is_some() {
        let reloaded = SsoGateConfig::from_file(&path).and_then(|config| state.reload_sso(&config.sso));
        match reloaded {
            Ok(()) => tracing::info!(config_file = %path.display(), "Reloaded SSO settings"),
            Err(e) => tracing::error!(
                config_file = %path.display(),
                error = %e,
                "Failed to reload SSO settings, keeping the current ones"
            ),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_check_path() {
        let args = Args::parse_from([
            "sso-gate",
            "--config",
            "gate.toml",
            "check-path",
            "--path",
            "/blog/1",
            "--host",
            "intranet",
        ]);
        assert_eq!(args.config.as_deref(), Some("gate.toml"));
        match args.command {
            Some(Command::CheckPath { path, host, script }) => {
                assert_eq!(path, "/blog/1");
                assert_eq!(host, "intranet");
                assert!(script.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_default_command_is_serve() {
        let args = Args::parse_from(["sso-gate"]);
        assert!(args.command.is_none());
    }

    #[test]
    fn test_explicit_config_path_is_used_as_is() {
        let path = resolve_config_path(Some("/nonexistent/gate.toml"));
        assert_eq!(path, Some(PathBuf::from("/nonexistent/gate.toml")));
    }
}
