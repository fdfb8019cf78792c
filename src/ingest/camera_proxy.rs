//! Home Assistant camera proxy source.
//!
//! Pulls one JPEG snapshot per call from
//! `<api_url>/camera_proxy/<camera_entity>` with the supervisor bearer
//! token. Every failure is logged and reported as "no image".

use std::io::Read;
use std::time::Duration;

use super::ImageSource;
use crate::error::{from_ureq, BridgeError};
use crate::transport::{http_agent, join_api_url};

const MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

pub struct CameraProxySource {
    agent: ureq::Agent,
    url: String,
    token: Option<String>,
    frames_fetched: u64,
}

impl CameraProxySource {
    pub fn new(
        api_url: &str,
        camera_entity: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, BridgeError> {
        let url = join_api_url(api_url, &format!("camera_proxy/{}", camera_entity))?;
        if token.is_none() {
            log::warn!("no supervisor token configured; camera requests are unauthenticated");
        }
        Ok(Self {
            agent: http_agent(timeout),
            url,
            token,
            frames_fetched: 0,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn frames_fetched(&self) -> u64 {
        self.frames_fetched
    }

    fn try_fetch(&mut self) -> Result<Vec<u8>, BridgeError> {
        let mut request = self.agent.get(&self.url);
        if let Some(token) = &self.token {
            request = request.set("Authorization", &format!("Bearer {}", token));
        }
        let response = request.call().map_err(|e| from_ureq(&self.url, e))?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_IMAGE_BYTES)
            .read_to_end(&mut bytes)
            .map_err(|e| BridgeError::transport(&self.url, format!("read body: {}", e)))?;
        if bytes.is_empty() {
            return Err(BridgeError::decode("camera image", "empty body"));
        }
        Ok(bytes)
    }
}

impl ImageSource for CameraProxySource {
    fn name(&self) -> &'static str {
        "camera_proxy"
    }

    fn fetch(&mut self) -> Option<Vec<u8>> {
        match self.try_fetch() {
            Ok(bytes) => {
                self.frames_fetched += 1;
                log::debug!("captured {} bytes from {}", bytes.len(), self.url);
                Some(bytes)
            }
            Err(e) => {
                log::error!("failed to get camera image: {}", e);
                None
            }
        }
    }
}
