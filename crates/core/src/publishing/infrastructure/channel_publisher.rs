use std::sync::{Mutex, PoisonError};

use crossbeam_channel::{Receiver, Sender};

use crate::publishing::domain::detection_publisher::DetectionPublisher;
use crate::recognition::domain::detected_face::FacesUpdate;

/// In-process fan-out: every subscriber gets every update.
///
/// Subscribers whose receiver has been dropped are forgotten on the next
/// publish.
#[derive(Default)]
pub struct ChannelPublisher {
    subscribers: Mutex<Vec<Sender<FacesUpdate>>>,
}

impl ChannelPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<FacesUpdate> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl DetectionPublisher for ChannelPublisher {
    fn publish(&self, update: &FacesUpdate) -> Result<(), Box<dyn std::error::Error>> {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(update.clone()).is_ok());
        Ok(())
    }
}
