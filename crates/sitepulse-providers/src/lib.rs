//! Provider adapters for the two supported analytics backends.
//!
//! Each adapter normalizes one vendor's REST API into the unified model from
//! `sitepulse-core`. Adapters are pure translation layers: URL building,
//! header assembly and payload decoding, nothing else.

pub mod http;
pub mod plausible;
pub mod timestamp;
pub mod titles;
pub mod umami;

pub use http::ReqwestTransport;
pub use plausible::PlausibleProvider;
pub use umami::UmamiProvider;

#[cfg(test)]
pub(crate) mod testsupport {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use sitepulse_core::error::TransportError;
    use sitepulse_core::transport::{Method, Transport, TransportResponse};

    /// Canned-response transport keyed by URL substring. Records every
    /// request so tests can assert on the URLs an adapter built.
    #[derive(Default)]
    pub struct MockTransport {
        responses: Mutex<HashMap<String, (u16, String)>>,
        pub requests: Mutex<Vec<String>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(&self, url_fragment: &str, status: u16, body: &str) {
            if let Ok(mut map) = self.responses.lock() {
                map.insert(url_fragment.to_string(), (status, body.to_string()));
            }
        }

        pub fn requested_urls(&self) -> Vec<String> {
            self.requests.lock().map(|r| r.clone()).unwrap_or_default()
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
            if let Ok(mut log) = self.requests.lock() {
                log.push(url.to_string());
            }
            let hit = self.responses.lock().ok().and_then(|map| {
                map.iter()
                    .find(|(fragment, _)| url.contains(fragment.as_str()))
                    .map(|(_, v)| v.clone())
            });
            match hit {
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
}
