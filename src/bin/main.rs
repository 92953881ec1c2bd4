//! servicekit binary.
//!
//! Runs a service with one `main` replier controller and, when
//! `<NAME>_BROADCAST_PORT` is configured, a broadcaster announcing every
//! request it answers. This is also the top-level supervisor: any error that
//! reaches it ends the process with a non-zero exit code.

use anyhow::Context;
use clap::Parser;
use serde_json::{json, Map};
use servicekit::{
    cli::Cli,
    service::{FileSecretStore, SecretStore},
    transport::global_context,
    AddressingMode, AppConfig, AuthRegistry, BroadcastMessage, DevContext, Orchestrator, Replier,
    Reply, SecureBroadcaster, ServiceConfig, ServiceIdentity, ServiceType,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

const MAIN_CONTROLLER: &str = "main";

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(
                    cli.logging
                        .get_effective_level()
                        .parse()
                        .unwrap_or(Level::INFO)
                        .into(),
                )
                .parse_lossy(cli.logging.log_filter.as_deref().unwrap_or("")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();

    info!(service = %cli.name, "servicekit starting up");

    if let Err(e) = serve(cli).await {
        let fatal = e
            .downcast_ref::<servicekit::Error>()
            .is_some_and(servicekit::Error::is_fatal);
        if fatal {
            error!("unrecoverable failure, terminating: {:#}", e);
        } else {
            error!("service failed: {:#}", e);
        }
        std::process::exit(1);
    }
}

async fn serve(cli: Cli) -> anyhow::Result<()> {
    let service_type = ServiceType::new(cli.name.to_uppercase());
    let app_config = Arc::new(AppConfig::from_env()?);
    let secrets: Arc<dyn SecretStore> =
        Arc::new(FileSecretStore::new(cli.context_dir.join("secrets")));
    let identity = ServiceIdentity::new(app_config.clone(), secrets.clone());
    let context = global_context();
    let auth = Arc::new(AuthRegistry::new());

    if cli.secure {
        auth.start_zap_handler(&context)
            .context("failed to start the ZAP handler")?;
    }

    let broadcaster = if app_config.exists(&format!("{}_BROADCAST_PORT", service_type.env_prefix())) {
        let service = if cli.secure {
            identity.resolve_secure(&service_type, AddressingMode::Broadcast)?
        } else {
            identity.resolve(&service_type, AddressingMode::Broadcast)?
        };
        let broadcaster = SecureBroadcaster::new(service, &context, auth.clone())?;
        if cli.secure {
            broadcaster.set_auth_domain(&cli.allow)?;
        }
        Some(broadcaster)
    } else {
        None
    };

    let existing = ServiceConfig::read_optional(&cli.config)
        .with_context(|| format!("failed to read {}", cli.config.display()))?;
    let mut orchestrator = Orchestrator::new(
        cli.name.clone(),
        Box::new(DevContext::new(&cli.context_dir)),
        existing,
    );

    let mut replier = main_controller(
        Arc::clone(&context),
        broadcaster.as_ref().map(SecureBroadcaster::sender),
    );
    if cli.secure {
        let (bucket, key) = service_type.secret_key_path();
        let credentials = secrets
            .key_pair(bucket, &key)
            .with_context(|| format!("no reply keypair for {}", service_type))?;
        auth.allow(&replier.auth_domain(), &cli.allow)?;
        replier = replier.with_curve(credentials);
    }
    for url in &cli.extensions {
        replier = replier.require_extension(url);
    }
    orchestrator.add_controller(MAIN_CONTROLLER, replier);

    for url in &cli.proxies {
        orchestrator.require_proxy(url);
        orchestrator.pipe(url, MAIN_CONTROLLER)?;
    }

    orchestrator
        .prepare(&service_type)
        .context("failed to prepare the service")?;

    if let Some((path, url)) = cli.build_target() {
        orchestrator.build_configuration(path, url)?;
        return Ok(());
    }

    if let Some(config) = orchestrator.service_config() {
        config
            .write(&cli.config)
            .with_context(|| format!("failed to write {}", cli.config.display()))?;
    }

    let running = async {
        match broadcaster {
            Some(mut broadcaster) => {
                broadcaster.bind()?;
                tokio::try_join!(orchestrator.run(), broadcaster.run()).map(|_| ())
            }
            None => orchestrator.run().await,
        }
    };

    tokio::select! {
        result = running => result?,
        _ = tokio::signal::ctrl_c() => info!("interrupted, shutting down"),
    }
    Ok(())
}

/// The `main` replier: `ping` and `echo`, each announced on the broadcaster.
fn main_controller(
    context: Arc<zmq::Context>,
    announce: Option<mpsc::Sender<BroadcastMessage>>,
) -> Replier {
    let ping_announce = announce.clone();
    Replier::new(MAIN_CONTROLLER, context)
        .route("ping", move |_| {
            let mut parameters = Map::new();
            parameters.insert("pong".into(), json!(true));
            let reply = Reply::ok(parameters);
            publish(ping_announce.as_ref(), "ping", &reply);
            Ok(reply)
        })
        .route("echo", move |request| {
            let reply = Reply::ok(request.parameters.clone());
            publish(announce.as_ref(), "echo", &reply);
            Ok(reply)
        })
}

fn publish(announce: Option<&mpsc::Sender<BroadcastMessage>>, topic: &str, reply: &Reply) {
    let Some(sender) = announce else {
        return;
    };
    match BroadcastMessage::from_reply(topic, reply) {
        Ok(message) => {
            // replier handlers run on their own thread, outside the runtime
            if sender.blocking_send(message).is_err() {
                error!(topic, "broadcaster is gone");
            }
        }
        Err(e) => error!(topic, "failed to encode broadcast: {}", e),
    }
}
