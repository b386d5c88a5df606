mod backend;

use anyhow::{Context, Result};
use backend::LinkFormatSink;
use clap::Parser;
use coapreg_core::config::{AppConfig, LogFormat};
use coapreg_registration::{
    BackendDescriptor, BackendRegistry, HostnameResolver, NoReverseLookup, RegistrationService,
    ReverseDnsResolver, ServiceOptions,
};
use coapreg_transport::{CoapEndpoint, EndpointConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// coapreg - CoAP node registration proxy
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    config: PathBuf,

    /// Override bind address
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Override log filter (e.g. "debug", "coapreg_registration=trace")
    #[arg(long, env = "COAPREG_LOG")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::from_config_builder(&args.config)
        .with_context(|| format!("Failed to load config file: {:?}", args.config))?;

    if let Some(bind) = args.bind {
        config.server.bind_addr = bind.to_string();
    }
    let filter = match args.log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
    };
    init_tracing(filter, config.logging.format);
    config.validate().context("Invalid configuration")?;

    let registry = Arc::new(BackendRegistry::new());
    for backend in &config.backends {
        let sink = Arc::new(LinkFormatSink::new(backend.path_prefix.clone()));
        registry.register(Arc::new(BackendDescriptor::new(
            backend.prefix.clone(),
            backend.path_prefix.clone(),
            sink,
        )));
        info!(prefix = %backend.prefix, path_prefix = %backend.path_prefix, "Backend registered");
    }

    let resolver: Arc<dyn HostnameResolver> = if config.registration.reverse_dns {
        Arc::new(ReverseDnsResolver)
    } else {
        Arc::new(NoReverseLookup)
    };

    let endpoint_config = EndpointConfig::from_server_config(&config.server)?;
    let endpoint = CoapEndpoint::bind(&endpoint_config).await?;

    let service = RegistrationService::new(
        ServiceOptions::from_config(&config.server, &config.registration),
        registry,
        endpoint.discovery_client(),
        resolver,
    )?;
    service.start()?;

    let shutdown = CancellationToken::new();
    let receiver = endpoint.spawn(service.listener(), shutdown.clone());

    info!(
        addr = %endpoint.local_addr(),
        path = %config.server.registration_path,
        "Waiting for node announcements"
    );

    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }

    shutdown.cancel();
    if let Err(e) = receiver.await {
        error!(error = %e, "Receive loop ended abnormally");
    }
    service.stop().await;

    let stats = service.stats();
    info!(
        announcements = stats.announcements,
        forwarded = stats.forwarded,
        already_registered = stats.already_registered,
        no_backend = stats.no_backend,
        failed = stats.failed,
        rejected = stats.rejected,
        "Shutdown complete"
    );

    Ok(())
}

fn init_tracing(filter: EnvFilter, format: LogFormat) {
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}
