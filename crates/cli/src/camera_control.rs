use std::time::Duration;

use facewatch_core::shared::config::CameraConfig;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum CameraControlError {
    #[error("camera request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("camera request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
}

/// Thin client for the camera host's capture API.
pub struct CameraControl {
    client: reqwest::blocking::Client,
    base_url: String,
    width: u32,
    height: u32,
}

impl CameraControl {
    pub fn new(base_url: &str, width: u32, height: u32) -> Result<Self, CameraControlError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| CameraControlError::Request {
                url: base_url.clone(),
                source,
            })?;
        Ok(Self {
            client,
            base_url,
            width,
            height,
        })
    }

    pub fn from_config(config: &CameraConfig) -> Result<Self, CameraControlError> {
        Self::new(&config.api_base_url, config.width, config.height)
    }

    /// Asks the camera host to start capturing at the configured size.
    pub fn init(&self) -> Result<(), CameraControlError> {
        self.post(&self.init_url())
    }

    pub fn release(&self) -> Result<(), CameraControlError> {
        self.post(&self.release_url())
    }

    fn init_url(&self) -> String {
        format!(
            "{}/camera/init?width={}&height={}",
            self.base_url, self.width, self.height
        )
    }

    fn release_url(&self) -> String {
        format!("{}/camera/release", self.base_url)
    }

    fn post(&self, url: &str) -> Result<(), CameraControlError> {
        let response =
            self.client
                .post(url)
                .send()
                .map_err(|source| CameraControlError::Request {
                    url: url.to_string(),
                    source,
                })?;
        let status = response.status();
        if !status.is_success() {
            return Err(CameraControlError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        log::debug!("POST {url} -> {status}");
        Ok(())
    }
}
