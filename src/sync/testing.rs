//! Scripted request client for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::client::RequestClient;
use crate::error::FetchError;
use crate::kind::DataKind;

/// Answers each kind with whatever was last scripted for it, after a delay.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    responses: Mutex<HashMap<String, Result<Value, String>>>,
    calls: Mutex<HashMap<String, usize>>,
    delay: Mutex<Duration>,
}

impl ScriptedClient {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay: Mutex::new(delay),
            ..Self::default()
        }
    }

    pub fn respond(&self, kind: &str, response: Result<Value, String>) {
        self.responses.lock().unwrap().insert(kind.to_string(), response);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self, kind: &str) -> usize {
        self.calls.lock().unwrap().get(kind).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl RequestClient for ScriptedClient {
    async fn fetch(&self, kind: &DataKind) -> Result<Value, FetchError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(kind.as_str().to_string())
            .or_insert(0) += 1;
        let response = self
            .responses
            .lock()
            .unwrap()
            .get(kind.as_str())
            .cloned()
            .unwrap_or_else(|| Err("no response scripted".to_string()));
        let delay = *self.delay.lock().unwrap();

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        response.map_err(|cause| FetchError::new(kind.clone(), cause))
    }
}
