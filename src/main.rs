use std::{
    net::SocketAddr,
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use peregrine::{
    adapters::{
        GatewayState, HealthChecker, HttpClientAdapter, HttpProxyDispatcher, WebSocketBridge,
        build_router,
    },
    config::{GatewayConfigValidator, load_config},
    core::{BreakerRegistry, BreakerSettings, PathRewriter, ServiceRegistry, SessionRegistry},
    ports::http_client::HttpClient,
    tracing_setup,
    utils::GracefulShutdown,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Start the gateway server (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    let (command, config_path) = match args.command {
        Some(Commands::Validate { config }) => ("validate", config),
        Some(Commands::Init { config }) => ("init", config),
        Some(Commands::Serve { config }) => ("serve", config),
        None => ("serve", args.config), // Default to serve with config from args
    };

    match command {
        "validate" => return validate_config_command(&config_path).await,
        "init" => return init_config_command(&config_path).await,
        _ => {}
    }

    serve(&config_path).await
}

/// Load the configuration, wire the adapters together and run the server.
async fn serve(config_path: &str) -> Result<()> {
    let config = load_config(config_path)
        .await
        .with_context(|| format!("Failed to load config from {config_path}"))?;

    tracing_setup::init_tracing(config.log_format)
        .map_err(|e| eyre!("Failed to initialize tracing: {e}"))?;

    GatewayConfigValidator::validate(&config).map_err(|e| eyre!("Invalid configuration: {e}"))?;

    tracing::info!(
        config = %config_path,
        services = config.services.len(),
        "configuration loaded"
    );

    let registry = Arc::new(ServiceRegistry::from_config(&config));
    let rewriter = Arc::new(PathRewriter::new(Arc::clone(&registry)));
    let breakers = Arc::new(BreakerRegistry::new(BreakerSettings {
        failure_threshold: config.gateway.failure_threshold,
        cooldown: Duration::from_millis(config.gateway.cooldown_ms),
    }));
    let http_client: Arc<dyn HttpClient> =
        Arc::new(HttpClientAdapter::new().context("Failed to create HTTP client adapter")?);
    let sessions = Arc::new(SessionRegistry::default());

    let dispatcher = Arc::new(HttpProxyDispatcher::new(
        Arc::clone(&http_client),
        Arc::clone(&rewriter),
        Arc::clone(&breakers),
        config.gateway.retry_after_secs,
    ));
    let bridge = Arc::new(WebSocketBridge::new(
        Arc::clone(&rewriter),
        Arc::clone(&sessions),
        Duration::from_millis(config.gateway.ws_connect_timeout_ms),
    ));
    let health = Arc::new(HealthChecker::new(
        &registry,
        Arc::clone(&http_client),
        config.health_check.clone(),
    ));

    let prober = Arc::clone(&health);
    tokio::spawn(async move {
        if let Err(e) = prober.run().await {
            tracing::error!(error = %e, "health checker stopped");
        }
    });

    let state = GatewayState {
        dispatcher,
        bridge,
        breakers,
        health,
        listen_addr: config.listen_addr.clone(),
        started_at: Instant::now(),
    };
    let app = build_router(&registry, state);

    // Signal handling drives graceful drain of in-flight requests.
    let graceful_shutdown = Arc::new(GracefulShutdown::new());
    let signal_handler = Arc::clone(&graceful_shutdown);
    tokio::spawn(async move {
        if let Err(e) = signal_handler.run_signal_handler().await {
            tracing::error!(error = %e, "signal handler error");
        }
    });

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .context("Failed to parse listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    tracing::info!(%addr, "Peregrine API Gateway listening");
    println!("Peregrine API Gateway listening on {addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let reason = graceful_shutdown.wait_for_shutdown_signal().await;
        tracing::info!(?reason, "shutdown signal received, draining connections");
    })
    .await
    .context("Server error")?;

    tracing_setup::shutdown_tracing();

    Ok(())
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    };

    match GatewayConfigValidator::validate(&config) {
        Ok(()) => {
            let ws_endpoints = config
                .services
                .values()
                .filter(|s| s.websocket.is_some())
                .count();
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.listen_addr);
            println!("   • Services: {}", config.services.len());
            println!("   • WebSocket Endpoints: {ws_endpoints}");
            println!("   • Health Checks: {}", config.health_check.enabled);
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Ensure base URLs start with http:// or https://");
            println!("   • Route prefixes and rewrites must start with '/'");
            println!("   • Verify listen address format (e.g., '127.0.0.1:3000')");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# Peregrine API Gateway Configuration

# The address to listen on
listen_addr = "127.0.0.1:8080"

# Gateway-wide resilience settings
[gateway]
default_timeout_ms = 30000
failure_threshold = 5
cooldown_ms = 60000
ws_connect_timeout_ms = 5000
retry_after_secs = 30

# Active health probing of backend services
[health_check]
enabled = true
interval_secs = 30
timeout_secs = 5
unhealthy_threshold = 3
healthy_threshold = 2

# Backend services. A service without explicit routes is reachable under
# /api/<kebab-case-name> with the inbound path passed through unchanged.

[services.clan]
base_url = "http://localhost:3001"
max_retries = 2

[[services.clan.routes]]
prefix = "/api/clan/public"
rewrite = "/public"

[[services.clan.routes]]
prefix = "/api/clans"
rewrite = "/clans"

[[services.clan.routes]]
prefix = "/api/clan"
rewrite = "/clans"

[services.clan.websocket]
upgrade_path = "/api/clan/chat/ws"
user_param = "userId"
resource_param = "clanId"
downstream_path = "/chat"

[services.credits]
base_url = "http://localhost:3002"

[services.gig]
base_url = "http://localhost:3004"

[[services.gig.routes]]
prefix = "/api/gig"
rewrite = ""

[services.notification]
base_url = "http://localhost:3005"
timeout_ms = 10000

[[services.notification.routes]]
prefix = "/api/notifications"
rewrite = "/notifications"

[[services.notification.routes]]
prefix = "/api/notification"
rewrite = "/notifications"

[services.notification.websocket]
upgrade_path = "/api/notifications/ws"
user_param = "userId"
downstream_path = "/"

[services.socialMedia]
base_url = "http://localhost:3003"
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'peregrine serve --config {config_path}' to start the server");
    Ok(())
}
