use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hostwatch::error::{DeliveryError, DeliveryResult};
use hostwatch::{Notification, Notifier};

/// One send attempt
#[derive(Debug, Clone)]
pub struct Delivered {
    pub recipients: Vec<String>,
    pub notification: Notification,
}

/// Notifier that records every attempt and can be told to fail
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Delivered>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Delivered> {
        self.sent.lock().unwrap().clone()
    }

    pub fn subjects(&self) -> Vec<String> {
        self.sent().into_iter().map(|d| d.notification.subject).collect()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Attempts recorded since the last call
    pub fn take(&self) -> Vec<Delivered> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, recipients: &[String], notification: &Notification) -> DeliveryResult<()> {
        self.sent.lock().unwrap().push(Delivered {
            recipients: recipients.to_vec(),
            notification: notification.clone(),
        });

        if self.failing.load(Ordering::SeqCst) {
            return Err(DeliveryError::Transport("connection refused".to_string()));
        }
        Ok(())
    }
}
