//! Media Gateway - serves cached media, proxies IIIF and falls back to the
//! FastCGI backend.
//!
//! This binary starts the HTTP server and configures all components.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use media_gateway::{
    config::{CheckConfig, Cli, Command, ServeConfig, SignConfig, SignOutputFormat},
    create_router, AppState, ArtifactResolver, Catalog, FcgiBackend, IiifProxy, MediaStore,
    SqlMediaStore, TokenAuthority,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Sign(config) => run_sign(config),
        Command::Check(config) => run_check(config).await,
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Media gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Media alias: {}", config.media_alias);
    info!("  IIIF alias: {} -> {}", config.iiif_alias, config.iiif_url);
    info!("  Backend: {}", config.fcgi_address());

    // Registries must load before the first request is served
    let store = match SqlMediaStore::connect(
        &config.database_url,
        config.db_max_connections,
        Duration::from_secs(config.connect_timeout),
    )
    .await
    {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to connect to database: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let catalog = match Catalog::load(store).await {
        Ok(catalog) => Arc::new(catalog),
        Err(e) => {
            error!("Failed to load registries: {}", e);
            return ExitCode::FAILURE;
        }
    };

    spawn_reload_on_hangup(Arc::clone(&catalog));

    let iiif = match IiifProxy::new(config.iiif_settings()) {
        Ok(iiif) => iiif,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let backend = FcgiBackend::new(config.fcgi_address(), config.fcgi_script.as_str())
        .with_timeouts(config.fcgi_timeouts());

    let state = AppState::new(ArtifactResolver::new(catalog), backend, iiif)
        .with_sub_prefix(&config.sub_prefix);
    let router = create_router(state, config.router_config());

    let addr = config.bind_address();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };
    info!("Server listening on: http://{}", addr);

    if let Err(e) = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Reload the registries whenever the process receives SIGHUP.
#[cfg(unix)]
fn spawn_reload_on_hangup<S: MediaStore + 'static>(catalog: Arc<Catalog<S>>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            error!("Cannot install SIGHUP handler, reload disabled: {}", e);
            return;
        }
    };

    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            info!("SIGHUP received, reloading registries");
            // Failures are logged by reload and keep the current generation
            let _ = catalog.reload().await;
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_on_hangup<S: MediaStore + 'static>(_catalog: Arc<Catalog<S>>) {}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "media_gateway=debug,tower_http=debug"
    } else {
        "media_gateway=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

// =============================================================================
// Sign Command
// =============================================================================

fn run_sign(config: SignConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let authority = TokenAuthority::new();
    let ttl = Duration::from_secs(config.ttl);
    let token = match authority.issue(&config.secret, &config.subject, ttl) {
        Ok(token) => token,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match config.format {
        SignOutputFormat::Token => println!("{}", token),
        SignOutputFormat::Json => {
            let json = serde_json::json!({
                "token": token,
                "subject": config.subject.to_lowercase(),
                "ttl": config.ttl,
            });
            match serde_json::to_string_pretty(&json) {
                Ok(out) => println!("{}", out),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
    }

    ExitCode::SUCCESS
}

// =============================================================================
// Check Command
// =============================================================================

async fn run_check(config: CheckConfig) -> ExitCode {
    if config.verbose {
        init_logging(true);
    }

    println!("Media Gateway Configuration Check");
    println!("═════════════════════════════════");
    println!();

    print!("Connecting to database... ");
    let store = match SqlMediaStore::connect(&config.database_url, 1, Duration::from_secs(10)).await
    {
        Ok(store) => {
            println!("✓ success");
            store
        }
        Err(e) => {
            println!("✗ failed");
            println!();
            println!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    print!("Loading registries... ");
    let catalog = match Catalog::load(store).await {
        Ok(catalog) => {
            println!("✓ success");
            catalog
        }
        Err(e) => {
            println!("✗ failed");
            println!();
            println!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let snapshot = catalog.snapshot().await;
    println!("  Collections: {}", snapshot.collections().len());
    println!("  Storages: {}", snapshot.storages().len());

    if config.list {
        println!();
        println!("Storages:");
        println!("─────────");
        let mut storages = match catalog.store().load_storages().await {
            Ok(rows) => rows,
            Err(e) => {
                println!("  Error listing storages: {}", e);
                return ExitCode::FAILURE;
            }
        };
        storages.sort_by_key(|s| s.id);
        for storage in &storages {
            let signed = if storage.secret.is_some() { "signed" } else { "open" };
            println!(
                "  #{} {} {} ({})",
                storage.id, storage.name, storage.base_location, signed
            );
        }
    }

    println!();
    println!("═════════════════════════════════");
    println!("✓ All checks passed!");

    ExitCode::SUCCESS
}
