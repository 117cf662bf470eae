//! HTTP clients deduplicated by endpoint.
//!
//! Several deployments usually sit behind one resource URL; they share a
//! `reqwest::Client` (and its connection pool). Model selection happens in
//! the request path or body, not in the client.

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use crate::error::ProfileError;

#[derive(Debug)]
pub struct ClientPool {
    timeout: Duration,
    clients: HashMap<String, reqwest::Client>,
}

impl ClientPool {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            clients: HashMap::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Client for `api_base`, built on first use.
    pub fn client_for(&mut self, api_base: &str) -> Result<reqwest::Client, ProfileError> {
        let key = api_base.trim_end_matches('/').to_string();
        if let Some(client) = self.clients.get(&key) {
            return Ok(client.clone());
        }
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| ProfileError::Http(format!("failed to build client for {}: {}", key, e)))?;
        debug!(endpoint = %key, "Built HTTP client");
        self.clients.insert(key, client.clone());
        Ok(client)
    }

    /// Distinct endpoints with a client.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
