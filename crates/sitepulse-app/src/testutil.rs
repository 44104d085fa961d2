//! Shared helpers for this crate's tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use sitepulse_core::error::TransportError;
use sitepulse_core::transport::{Method, Transport, TransportResponse};

/// Fresh per-test directory under the system temp dir.
pub fn unique_data_dir(tag: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("unix time")
        .as_nanos();
    std::env::temp_dir().join(format!("sitepulse-app-{tag}-{nanos}"))
}

/// Canned-response transport matched by URL substring.
#[derive(Default)]
pub struct MockTransport {
    responses: Mutex<HashMap<String, (u16, String)>>,
    requests: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url_fragment: &str, status: u16, body: &str) {
        let mut responses = match self.responses.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        responses.insert(url_fragment.to_string(), (status, body.to_string()));
    }

    pub fn requested_urls(&self) -> Vec<String> {
        match self.requests.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn request(
        &self,
        _method: Method,
        url: &str,
        _headers: &[(String, String)],
        _body: Option<Vec<u8>>,
    ) -> Result<TransportResponse, TransportError> {
        match self.requests.lock() {
            Ok(mut guard) => guard.push(url.to_string()),
            Err(poisoned) => poisoned.into_inner().push(url.to_string()),
        }
        let responses = match self.responses.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let matched = responses
            .iter()
            .find(|(fragment, _)| url.contains(fragment.as_str()))
            .map(|(_, response)| response.clone());
        match matched {
            Some((status, body)) => Ok(TransportResponse {
                status,
                body: body.into_bytes(),
            }),
            None => Err(TransportError::Request {
                url: url.to_string(),
                message: "no canned response".to_string(),
            }),
        }
    }
}
