use std::io::Write;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use crate::publishing::domain::detection_publisher::DetectionPublisher;
use crate::recognition::domain::detected_face::FacesUpdate;
use crate::shared::constants::{FACES_UPDATE_EVENT, LIVE_NAMESPACE};

/// Writes each update as one JSON object per line:
/// `{"event":"faces_update","namespace":"/live","data":{"faces":[...]}}`.
pub struct JsonLinesPublisher {
    out: Mutex<Box<dyn Write + Send>>,
}

#[derive(Serialize)]
struct Envelope<'a> {
    event: &'static str,
    namespace: &'static str,
    data: &'a FacesUpdate,
}

impl JsonLinesPublisher {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }
}

impl DetectionPublisher for JsonLinesPublisher {
    fn publish(&self, update: &FacesUpdate) -> Result<(), Box<dyn std::error::Error>> {
        let envelope = Envelope {
            event: FACES_UPDATE_EVENT,
            namespace: LIVE_NAMESPACE,
            data: update,
        };
        let mut line = serde_json::to_vec(&envelope)?;
        line.push(b'\n');
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        out.write_all(&line)?;
        out.flush()?;
        Ok(())
    }
}
