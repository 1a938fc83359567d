use std::{path::Path, sync::Arc, time::Duration};

use clap::Parser;
use color_eyre::{Result, eyre::Context};
use gantry::{
    adapters::{BuiltinApp, ThreadedTaskDispatcher},
    config::{
        ServerConfig, ServerConfigValidator,
        loader::{load_config, load_defaults},
    },
    ports::TaskDispatcher,
    server::ServerBuilder,
    tracing_setup::{self, ServerLogger},
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
    /// Start the server (default)
    Serve {
        /// Configuration file to use; defaults apply when it does not exist
        #[clap(short, long, default_value = "config.toml")]
        config: String,

        /// Application to host
        #[clap(long, value_enum, default_value = "hello")]
        app: BuiltinApp,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config).await,
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Serve { config, app }) => serve_command(&config, app).await,
        None => serve_command(&args.config, BuiltinApp::Hello).await,
    }
}

async fn read_config(config_path: &str) -> Result<(ServerConfig, bool)> {
    if Path::new(config_path).exists() {
        Ok((load_config(config_path).await?, true))
    } else {
        Ok((load_defaults()?, false))
    }
}

async fn serve_command(config_path: &str, app: BuiltinApp) -> Result<()> {
    let (config, from_file) = read_config(config_path).await?;

    tracing_setup::init_tracing_with_config(&config.logging.level, config.logging.json, true)?;
    if from_file {
        tracing::info!("Loaded configuration from {}", config_path);
    } else {
        tracing::info!(
            "Configuration file {} not found, using defaults and environment overrides",
            config_path
        );
    }

    ServerConfigValidator::validate(&config).wrap_err("Invalid configuration")?;

    let dispatcher: Option<Arc<dyn TaskDispatcher>> = if config.threads > 0 {
        Some(Arc::new(ThreadedTaskDispatcher::with_threads(config.threads)))
    } else {
        tracing::warn!("threads = 0: requests are serviced inline on the reactor thread");
        None
    };

    let shutdown = Arc::new(GracefulShutdown::with_timeout(Duration::from_secs(
        config.shutdown_timeout_secs,
    )));

    let mut builder = ServerBuilder::new(app.application())
        .config(config.clone())
        .logger(ServerLogger::new().verbose(config.verbose));
    if let Some(dispatcher) = &dispatcher {
        builder = builder.dispatcher(dispatcher.clone());
    }
    let mut server = builder.build().wrap_err("Failed to start server")?;

    tracing::info!(
        "{} serving {:?} on {} (threads: {}, connection limit: {})",
        server.server().ident(),
        app,
        server.local_addr(),
        config.threads,
        config.connection_limit
    );

    shutdown.watch_reactor(server.handle());
    let signals = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signals.run_signal_handler().await {
            tracing::error!("Signal handler failed: {:?}", e);
        }
    });

    tokio::task::spawn_blocking(move || server.run())
        .await
        .wrap_err("Reactor thread panicked")?
        .wrap_err("Reactor failed")?;

    if let Some(dispatcher) = dispatcher {
        shutdown.drain_dispatcher(dispatcher).await;
    }

    tracing::info!("Server stopped");
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

    match ServerConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.bind_address());
            println!("   • Identity: {}", config.full_ident());
            println!("   • Worker Threads: {}", config.threads);
            println!("   • Connection Limit: {}", config.connection_limit);
            println!("   • Socket Options: {}", config.socket_options.len());
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Use an IP address or hostname for 'host'");
            println!("   • Keep 'backlog' and 'connection_limit' above zero");
            println!("   • Check 'logging.level' is a valid filter such as 'info'");
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

    let default_config = r#"# gantry server configuration

host = "127.0.0.1"
port = 8080

# listen(2) backlog and the maximum number of open connections
backlog = 1024
connection_limit = 100

# Worker threads; 0 services every request on the reactor thread
threads = 4

# Log transient accept() failures
log_socket_errors = true
verbose = false

# Optional label shown as "gantry.http (<label>)"
# sub_protocol = "wsgi"

[[socket_options]]
option = "tcp_nodelay"
value = true

[environ]
multithread = true
multiprocess = false
run_once = false

[logging]
level = "info"
json = false
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'gantry serve --config {config_path}' to start the server");
    Ok(())
}
