//! In-process notification delivery.
//!
//! The OS notification center is an external collaborator; this module
//! provides the implementation used by the headless binary and by tests.
//! Registered triggers are tracked in memory — which is exactly what the
//! scheduler needs, since every pass starts from `cancel_all` anyway.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::info;

use sitepulse_core::notify::{NotificationContent, NotificationDelivery, TriggerSpec};

pub struct LogDelivery {
    permission: bool,
    registered: Mutex<HashMap<String, (TriggerSpec, NotificationContent)>>,
    delivered: Mutex<Vec<NotificationContent>>,
}

impl LogDelivery {
    pub fn new() -> Self {
        Self::with_permission(true)
    }

    pub fn with_permission(permission: bool) -> Self {
        Self {
            permission,
            registered: Mutex::new(HashMap::new()),
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub async fn registered_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.registered.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn registered_trigger(&self, id: &str) -> Option<(TriggerSpec, NotificationContent)> {
        self.registered.lock().await.get(id).cloned()
    }

    pub async fn delivered(&self) -> Vec<NotificationContent> {
        self.delivered.lock().await.clone()
    }
}

impl Default for LogDelivery {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl NotificationDelivery for LogDelivery {
    async fn permission_granted(&self) -> bool {
        self.permission
    }

    async fn register_recurring(
        &self,
        id: &str,
        trigger: TriggerSpec,
        content: NotificationContent,
    ) -> anyhow::Result<()> {
        info!(id, trigger = ?trigger, title = %content.title, "registered recurring notification");
        self.registered
            .lock()
            .await
            .insert(id.to_string(), (trigger, content));
        Ok(())
    }

    async fn deliver_now(&self, content: NotificationContent) -> anyhow::Result<()> {
        info!(title = %content.title, body = %content.body, "delivering notification");
        self.delivered.lock().await.push(content);
        Ok(())
    }

    async fn cancel_all(&self) {
        self.registered.lock().await.clear();
    }

    async fn pending_count(&self) -> usize {
        self.registered.lock().await.len()
    }
}
