use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    db::{
        models::{CommandAuditEvent, CommandPayload},
        Store,
    },
    mqtt::{CommandPublisher, PublishError},
};

/// Identity recorded when a command does not name its issuer.
pub const DEFAULT_USER: &str = "api";

/// An operator command as received from a caller.
#[derive(Debug, Clone, Default)]
pub struct CommandRequest {
    pub device_id: Option<String>,
    pub cmd: Option<String>,
    pub action: Option<String>,
    pub duration: Option<serde_json::Number>,
    pub user: Option<String>,
}

/// What was actually sent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dispatched {
    pub topic: String,
    pub payload: CommandPayload,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("device_id is required")]
    MissingDeviceId,
    #[error("failed to encode command payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to publish command: {0}")]
    Publish(#[from] PublishError),
}

/// Publishes operator commands and records them in the audit trail.
///
/// Publish and audit are two independent effects: once the publish has been
/// handed to the transport, an audit failure is logged and the command still
/// counts as sent.
#[derive(Clone)]
pub struct ControlService {
    store: Arc<dyn Store>,
    publisher: Arc<dyn CommandPublisher>,
    namespace: String,
}

impl ControlService {
    pub fn new(
        store: Arc<dyn Store>,
        publisher: Arc<dyn CommandPublisher>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            store,
            publisher,
            namespace: namespace.into(),
        }
    }

    pub fn topic_for(&self, device_id: &str) -> String {
        format!("{}/{}/commands", self.namespace, device_id)
    }

    pub async fn dispatch(&self, request: CommandRequest) -> Result<Dispatched, DispatchError> {
        let device_id = request
            .device_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(DispatchError::MissingDeviceId)?;

        let topic = self.topic_for(&device_id);
        let payload = CommandPayload {
            cmd: request.cmd,
            action: request.action,
            duration: request.duration,
        };
        let bytes = serde_json::to_vec(&payload)?;

        if let Err(e) = self.publisher.publish(&topic, bytes).await {
            warn!(device_id = %device_id, topic = %topic, error = %e, "Command publish failed");
            return Err(e.into());
        }
        info!(device_id = %device_id, topic = %topic, "Command published");

        let event = CommandAuditEvent {
            id: Uuid::new_v4(),
            device_id: device_id.clone(),
            topic: topic.clone(),
            command: payload.clone(),
            user: request.user.unwrap_or_else(|| DEFAULT_USER.to_owned()),
            issued_at: Utc::now(),
        };
        if let Err(e) = self.store.append_audit(&event).await {
            error!(
                device_id = %device_id,
                topic = %topic,
                error = %e,
                "Command was published but the audit event could not be written"
            );
        }

        Ok(Dispatched { topic, payload })
    }
}
