use futures::io::AsyncBufReadExt;
use futures::stream::{self, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client, api::LogParams};
use tracing::{debug, info, warn};

use crate::config::SourceConfig;
use crate::error::{CommandError, SourceError};
use crate::host::{StreamHost, WorkerId};
use crate::source::{LineStream, LogSource};
use crate::subscriber::SubscriberRef;
use crate::types::StreamTarget;
use crate::worker::Initialize;

/// [`LogSource`] that follows container logs through the Kubernetes API.
#[derive(Clone)]
pub struct KubeLogSource {
    client: Client,
    params: SourceConfig,
}

impl KubeLogSource {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            params: SourceConfig::default(),
        }
    }

    pub fn with_params(mut self, params: SourceConfig) -> Self {
        self.params = params;
        self
    }
}

pub fn log_params(target: &StreamTarget, params: &SourceConfig) -> LogParams {
    LogParams {
        follow: true,
        container: target.container_name.clone(),
        tail_lines: params.tail_lines,
        since_seconds: params.since_seconds,
        timestamps: params.timestamps,
        ..Default::default()
    }
}

impl LogSource for KubeLogSource {
    fn subscribe(&self, target: &StreamTarget) -> LineStream {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &target.pod_namespace);
        let lp = log_params(target, &self.params);
        let pod_name = target.pod_name.clone();
        let label = target.to_string();

        stream::once(async move {
            debug!("[{}] Opening follow log stream", label);
            let reader = api.log_stream(&pod_name, &lp).await.map_err(|e| {
                warn!("[{}] Failed to get follow log stream: {}", label, e);
                SourceError::from(e)
            })?;
            info!("[{}] Log stream opened", label);
            Ok::<_, SourceError>(reader.lines().map_err(SourceError::from))
        })
        .try_flatten()
        .boxed()
    }
}

/// Names of every container declared in the pod spec.
pub async fn container_names(
    client: &Client,
    pod_name: &str,
    namespace: &str,
) -> Result<Vec<String>, SourceError> {
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let pod = api.get(pod_name).await?;
    Ok(pod
        .spec
        .map(|spec| spec.containers.into_iter().map(|c| c.name).collect())
        .unwrap_or_default())
}

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to resolve containers: {0}")]
    Resolve(#[from] SourceError),

    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Starts one worker per container of `target`'s pod.
///
/// A target that already names its container gets a single worker.
pub async fn spawn_pod_workers(
    host: &StreamHost,
    client: &Client,
    target: StreamTarget,
    subscriber: SubscriberRef,
) -> Result<Vec<WorkerId>, SpawnError> {
    target.validate()?;

    let targets = if target.container_name.is_some() {
        vec![target]
    } else {
        let names = container_names(client, &target.pod_name, &target.pod_namespace).await?;
        if names.is_empty() {
            warn!("[{}] Pod declares no containers", target);
        }
        names
            .into_iter()
            .map(|name| target.clone().with_container(name))
            .collect()
    };

    let inits = targets
        .into_iter()
        .map(|target| Initialize::for_target(target, subscriber.clone()))
        .collect();
    Ok(start_all(host, inits).await?)
}

/// Starts one worker per `Initialize`. If any start fails, the workers
/// started before it are cancelled and the error is returned.
pub(crate) async fn start_all(
    host: &StreamHost,
    inits: Vec<Initialize>,
) -> Result<Vec<WorkerId>, CommandError> {
    let mut ids = Vec::with_capacity(inits.len());
    for init in inits {
        let target = init.target.clone();
        match host.start(init).await {
            Ok(id) => ids.push(id),
            Err(e) => {
                warn!(
                    "[{}] Failed to start worker, cancelling {} already started: {}",
                    target,
                    ids.len(),
                    e
                );
                for id in ids {
                    if let Err(cancel_err) = host.cancel(id).await {
                        debug!("[{}] Cancel after failed start: {}", id, cancel_err);
                    }
                }
                return Err(e);
            }
        }
    }
    Ok(ids)
}
