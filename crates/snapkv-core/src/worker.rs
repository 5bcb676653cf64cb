//! Async worker loop
//!
//! Each worker holds a stable pid, reserves the next action message
//! from the operations topic, dispatches on the action, and
//! acknowledges on success. A failed handler leaves the message
//! unacked; the lease expires and another worker turn retries it, so
//! every handler must tolerate redelivery.

use snapkv_common::model::{Audit, VersionStatus};
use snapkv_common::types::VersionId;
use snapkv_common::{Error, Result};
use snapkv_meta_store::MetadataStore;
use snapkv_queue::{ActionMessage, QueueMessage, TaskQueue};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Lease on the message a handler is processing
///
/// Handlers that anticipate work longer than the queue's lease time
/// call [`Lease::extend`] periodically.
pub struct Lease<'a> {
    queue: &'a dyn TaskQueue,
    id: &'a str,
    pid: &'a str,
}

impl Lease<'_> {
    /// Push the lease deadline out by one lease period.
    pub async fn extend(&self) -> Result<()> {
        self.queue.extend_lease(self.id, self.pid).await
    }
}

/// Long-running consumer of the operations topic
pub struct Worker {
    pid: String,
    meta: Arc<dyn MetadataStore>,
    queue: Arc<dyn TaskQueue>,
    topic: String,
    poll_interval: Duration,
}

/// Handle to a spawned worker loop
///
/// Requesting a stop lets the in-flight message finish; the loop exits
/// on its next iteration.
pub struct WorkerHandle {
    pid: String,
    shutdown: Arc<AtomicBool>,
    handle: tokio::task::JoinHandle<()>,
}

impl WorkerHandle {
    /// The worker's stable process identifier.
    #[must_use]
    pub fn pid(&self) -> &str {
        &self.pid
    }

    /// Signal the loop to stop and wait for it to exit.
    pub async fn stop(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Err(e) = self.handle.await {
            error!(pid = %self.pid, "worker task panicked: {e}");
        }
    }
}

impl Worker {
    /// Create a worker with a generated pid.
    #[must_use]
    pub fn new(
        meta: Arc<dyn MetadataStore>,
        queue: Arc<dyn TaskQueue>,
        topic: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        let pid = format!("snapkv-worker-{}", &Uuid::new_v4().simple().to_string()[..8]);
        Self::with_pid(pid, meta, queue, topic, poll_interval)
    }

    /// Create a worker with an explicit pid.
    #[must_use]
    pub fn with_pid(
        pid: impl Into<String>,
        meta: Arc<dyn MetadataStore>,
        queue: Arc<dyn TaskQueue>,
        topic: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            pid: pid.into(),
            meta,
            queue,
            topic: topic.into(),
            poll_interval,
        }
    }

    /// Spawn the loop onto the runtime.
    pub fn spawn(self) -> WorkerHandle {
        let shutdown = Arc::new(AtomicBool::new(false));
        let pid = self.pid.clone();
        let flag = Arc::clone(&shutdown);
        let handle = tokio::spawn(async move { self.run(flag).await });
        WorkerHandle {
            pid,
            shutdown,
            handle,
        }
    }

    async fn run(self, shutdown: Arc<AtomicBool>) {
        info!(pid = %self.pid, topic = %self.topic, "worker started");
        while !shutdown.load(Ordering::Relaxed) {
            match self.queue.reserve_next(&self.topic, &self.pid).await {
                Ok(message) => self.process(message).await,
                Err(Error::NoMessage(_)) => tokio::time::sleep(self.poll_interval).await,
                Err(e) => {
                    error!(pid = %self.pid, "failed to reserve message: {e}");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
        info!(pid = %self.pid, "worker stopped");
    }

    async fn process(&self, message: QueueMessage) {
        let action = message.body.action();
        let version = message.body.version_id();
        debug!(pid = %self.pid, id = %message.id, action, %version, "processing message");

        let lease = Lease {
            queue: self.queue.as_ref(),
            id: &message.id,
            pid: &self.pid,
        };
        match self.handle(&message.body, &lease).await {
            Ok(()) => {
                if let Err(e) = self.queue.acknowledge(&message.id, &self.pid).await {
                    error!(pid = %self.pid, id = %message.id, "failed to acknowledge: {e}");
                }
            }
            // no ack: the lease expires and the message is retried
            Err(e) => {
                warn!(pid = %self.pid, id = %message.id, action, %version,
                      "handler failed, leaving message for retry: {e}");
            }
        }
    }

    async fn handle(&self, body: &ActionMessage, lease: &Lease<'_>) -> Result<()> {
        match body {
            ActionMessage::Prepare { version_id } => {
                // place for future resource provisioning
                self.set_status(version_id, VersionStatus::AwaitingEntries, None)
                    .await
            }
            ActionMessage::Save { version_id } => {
                self.set_status(version_id, VersionStatus::Saved, None).await
            }
            ActionMessage::Publish { version_id } => self.handle_publish(version_id).await,
            ActionMessage::Discard { version_id, reason } => {
                self.set_status(
                    version_id,
                    VersionStatus::Discarded,
                    Some(reason_audit(reason.as_deref())),
                )
                .await
            }
            ActionMessage::Fail { version_id, reason } => {
                self.set_status(
                    version_id,
                    VersionStatus::Failed,
                    Some(reason_audit(reason.as_deref())),
                )
                .await
            }
            ActionMessage::VerifyData { version_id } => self.handle_verify(version_id, lease).await,
        }
    }

    /// Transition a version, treating "already there" as success so
    /// redelivered messages are no-ops.
    async fn set_status(
        &self,
        id: &VersionId,
        target: VersionStatus,
        audit: Option<Audit>,
    ) -> Result<()> {
        let version = self
            .meta
            .get_version(id)
            .await?
            .ok_or(Error::VersionNotFound(*id))?;
        if version.status == target {
            debug!(%id, status = %target, "version already in target status");
            return Ok(());
        }
        self.meta.update_status(id, target, audit).await?;
        Ok(())
    }

    /// Publish cutover.
    ///
    /// Three individually CAS-guarded steps, ordered so a crash between
    /// any two of them is healed by redelivery: demote whatever is
    /// currently published (on redelivery that can be the target
    /// itself), promote the target, then flip the dataset pointer.
    async fn handle_publish(&self, id: &VersionId) -> Result<()> {
        let target = self
            .meta
            .get_version(id)
            .await?
            .ok_or(Error::VersionNotFound(*id))?;

        for version in self.meta.list_versions_by_dataset(&target.dataset).await? {
            if version.status == VersionStatus::Published {
                let mut audit = Audit::new();
                audit.insert(
                    "initiated-by".to_string(),
                    serde_json::Value::String("publish-handler".to_string()),
                );
                self.meta
                    .update_status(&version.id, VersionStatus::Saved, Some(audit))
                    .await?;
                info!(demoted = %version.id, promoting = %id, "demoted published version");
            }
        }

        self.set_status(id, VersionStatus::Published, None).await?;
        self.meta.activate_version(id, None).await?;
        info!(version = %id, dataset = %target.dataset, "published version");
        Ok(())
    }

    /// Reserved verification hook. The check is disabled in this core,
    /// so it extends the lease and hands off to `save`; the follow-up
    /// send is idempotent per version so retries cannot fan out.
    async fn handle_verify(&self, id: &VersionId, lease: &Lease<'_>) -> Result<()> {
        lease.extend().await?;
        debug!(version = %id, "verification disabled, passing through");
        self.queue
            .send_with_id(
                &self.topic,
                &format!("verify-save-{id}"),
                ActionMessage::Save { version_id: *id },
            )
            .await
    }
}

fn reason_audit(reason: Option<&str>) -> Audit {
    let mut audit = Audit::new();
    if let Some(reason) = reason {
        audit.insert(
            "reason".to_string(),
            serde_json::Value::String(reason.to_string()),
        );
    }
    audit
}
