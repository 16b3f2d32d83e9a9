//! Alert queue consumer: turns water alert tasks into channel messages.

pub mod channel;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::DispatchError;
use crate::models::{AlertTask, TYPE_WATER_ALERT};
use crate::queue::{TaskEnvelope, TaskHandler};

pub use channel::{MessagingChannel, Notifier};

/// Renders the broadcast text for an alert.
pub fn render_message(task: &AlertTask) -> String {
    format!(
        "🌊 Water level alert\n\
         📍 Station: {}\n\
         💧 Water level: {:.2} m\n\
         🏔️ Bank level: {:.2} m\n\
         ⚠️ Status: {}\n\
         🕐 Time: {}",
        task.station_name, task.water_level, task.shore_level, task.status, task.measured_at
    )
}

pub struct AlertDispatcher {
    notifier: Arc<dyn Notifier>,
}

impl AlertDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl TaskHandler for AlertDispatcher {
    async fn handle(&self, task: &TaskEnvelope) -> Result<(), DispatchError> {
        if task.kind != TYPE_WATER_ALERT {
            return Err(DispatchError::Permanent(format!(
                "no handler for task kind '{}'",
                task.kind
            )));
        }

        let payload: AlertTask = serde_json::from_value(task.payload.clone()).map_err(|e| {
            DispatchError::Permanent(format!("payload could not be decoded: {}", e))
        })?;

        info!(
            task_id = %task.id,
            station_id = payload.station_id,
            status = %payload.status,
            attempt = task.attempt(),
            "Broadcasting alert for {}",
            payload.station_name
        );

        let text = render_message(&payload);
        if let Err(e) = self.notifier.send(&text).await {
            warn!(task_id = %task.id, attempt = task.attempt(), "Failed to broadcast: {}", e);
            return Err(e.into());
        }

        info!(task_id = %task.id, "Broadcast successful for {}", payload.station_name);
        Ok(())
    }
}
