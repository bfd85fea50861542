//! Daily reminders for professionals holding accepted requests

use crate::lifecycle::RequestEngine;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct ReminderTask {
    engine: RequestEngine,
}

impl ReminderTask {
    pub fn new(engine: RequestEngine) -> Self {
        Self { engine }
    }

    pub fn start(self, is_running: Arc<RwLock<bool>>) -> JoinHandle<()> {
        let reminder_interval = self.engine.settings().reminder_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(reminder_interval);
            info!(
                "Reminder task started ({}s interval)",
                reminder_interval.as_secs()
            );

            while *is_running.read().await {
                interval.tick().await;

                match self.engine.send_reminders().await {
                    Ok(0) => debug!("No accepted requests to remind about"),
                    Ok(sent) => info!("Sent {} professional reminders", sent),
                    Err(e) => warn!("Reminder pass failed: {}", e),
                }
            }

            info!("Reminder task stopped");
        })
    }
}
