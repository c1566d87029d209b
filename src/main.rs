use std::sync::Arc;

use kube::{Client, config};
use pod_log_spool::kubernetes::spawn_pod_workers;
use pod_log_spool::utils::format_message;
use pod_log_spool::{KubeLogSource, SpoolConfig, StreamHost, StreamMessage, SubscriberRef};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const CONFIG_ENV: &str = "POD_LOG_SPOOL_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "pod-log-spool.yaml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let spool_config = SpoolConfig::load(&config_path)
        .map_err(|e| anyhow::anyhow!("Failed to load {}: {}", config_path, e))?;

    // Logs go to stderr; stdout carries only container log lines.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&spool_config.log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if spool_config.targets.is_empty() {
        anyhow::bail!("No targets configured in {}", config_path);
    }

    let client = initialize_client(spool_config.context.clone()).await?;
    let source = KubeLogSource::new(client.clone()).with_params(spool_config.source.clone());
    let host = StreamHost::new(Arc::new(source), spool_config.worker_config());

    let (log_tx, mut log_rx) = mpsc::unbounded_channel::<StreamMessage>();
    let subscriber: SubscriberRef = Arc::new(log_tx);

    let mut started = 0;
    for target_config in &spool_config.targets {
        let target = target_config.to_target();
        match spawn_pod_workers(&host, &client, target.clone(), subscriber.clone()).await {
            Ok(ids) => started += ids.len(),
            Err(e) => warn!("[{}] Could not start tailing: {}", target, e),
        }
    }
    drop(subscriber);

    if started == 0 {
        anyhow::bail!("No log streams could be started");
    }
    info!("Tailing {} container log(s)", started);

    // Print until every stream has ended or Ctrl-C arrives.
    let printer = tokio::spawn(async move {
        while let Some(msg) = log_rx.recv().await {
            if let StreamMessage::Error(err) = &msg {
                error!("[{}] {}", err.target, err.cause);
            }
            println!("{}", format_message(&msg));
        }
    });

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("Interrupted, cancelling log streams");
        }
        _ = wait_until_idle(&host) => {
            info!("All log streams ended");
        }
    }

    host.shutdown().await;
    drop(host);
    let _ = printer.await;
    Ok(())
}

async fn initialize_client(context: Option<String>) -> anyhow::Result<Client> {
    match context {
        None => {
            let config = config::Config::infer().await?;
            info!("Using current context");
            Ok(Client::try_from(config)?)
        }
        Some(ctx) => {
            let config = config::Config::from_kubeconfig(&config::KubeConfigOptions {
                context: Some(ctx.clone()),
                ..Default::default()
            })
            .await
            .map_err(|e| anyhow::anyhow!("Context '{}' not found in kubeconfig: {}", ctx, e))?;
            info!("Initialized client for context: {}", ctx);
            Ok(Client::try_from(config)?)
        }
    }
}

async fn wait_until_idle(host: &StreamHost) {
    let mut interval = tokio::time::interval(std::time::Duration::from_millis(250));
    loop {
        interval.tick().await;
        if host.active().await == 0 {
            return;
        }
    }
}
