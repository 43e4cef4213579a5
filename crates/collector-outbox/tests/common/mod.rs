#![allow(dead_code)]

use async_trait::async_trait;
use collector_outbox::{CollectorConnection, EventPayload, OutboxResult, PixelOutcome};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tracker_kv_storage::{KeyValueStorage, StorageError, StorageResult};

/// One recorded request.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub body: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

/// Recording collector double with programmable statuses.
///
/// Statuses are consumed front-to-back; when the list runs out every
/// further request completes with 200.
pub struct MockConnection {
    statuses: Mutex<VecDeque<u16>>,
    pub posts: Mutex<Vec<RecordedRequest>>,
    pub gets: Mutex<Vec<RecordedRequest>>,
    pub beacons: Mutex<Vec<RecordedRequest>>,
    pub pixels: Mutex<Vec<String>>,
    pub blocking_posts: Mutex<Vec<RecordedRequest>>,
    pub blocking_gets: Mutex<Vec<RecordedRequest>>,
    pub accept_beacon: bool,
    pub pixel_outcome: Mutex<PixelOutcome>,
    pub post_delay: Option<Duration>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self {
            statuses: Mutex::new(VecDeque::new()),
            posts: Mutex::new(Vec::new()),
            gets: Mutex::new(Vec::new()),
            beacons: Mutex::new(Vec::new()),
            pixels: Mutex::new(Vec::new()),
            blocking_posts: Mutex::new(Vec::new()),
            blocking_gets: Mutex::new(Vec::new()),
            accept_beacon: false,
            pixel_outcome: Mutex::new(PixelOutcome::Loaded),
            post_delay: None,
        }
    }

    pub fn with_statuses(statuses: &[u16]) -> Self {
        let connection = Self::new();
        *connection.statuses.lock().unwrap() = statuses.iter().copied().collect();
        connection
    }

    pub fn accepting_beacon() -> Self {
        Self {
            accept_beacon: true,
            ..Self::new()
        }
    }

    pub fn set_pixel_outcome(&self, outcome: PixelOutcome) {
        *self.pixel_outcome.lock().unwrap() = outcome;
    }

    pub fn post_count(&self) -> usize {
        self.posts.lock().unwrap().len()
    }

    pub fn get_count(&self) -> usize {
        self.gets.lock().unwrap().len()
    }

    pub fn beacon_count(&self) -> usize {
        self.beacons.lock().unwrap().len()
    }

    pub fn pixel_count(&self) -> usize {
        self.pixels.lock().unwrap().len()
    }

    /// Event field values of the `data` array of a recorded POST body.
    pub fn post_batch_events(&self, index: usize, field: &str) -> Vec<String> {
        let posts = self.posts.lock().unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&posts[index].body).unwrap();
        parsed["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|record| record[field].as_str().unwrap().to_string())
            .collect()
    }

    fn next_status(&self) -> u16 {
        self.statuses.lock().unwrap().pop_front().unwrap_or(200)
    }
}

#[async_trait]
impl CollectorConnection for MockConnection {
    async fn post(
        &self,
        url: &str,
        body: Vec<u8>,
        headers: &[(String, String)],
    ) -> OutboxResult<u16> {
        self.posts.lock().unwrap().push(RecordedRequest {
            url: url.to_string(),
            body,
            headers: headers.to_vec(),
        });
        if let Some(delay) = self.post_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.next_status())
    }

    async fn get(&self, url: &str, headers: &[(String, String)]) -> OutboxResult<u16> {
        self.gets.lock().unwrap().push(RecordedRequest {
            url: url.to_string(),
            body: Vec::new(),
            headers: headers.to_vec(),
        });
        Ok(self.next_status())
    }

    fn send_beacon(&self, url: &str, body: Vec<u8>) -> bool {
        if !self.accept_beacon {
            return false;
        }
        self.beacons.lock().unwrap().push(RecordedRequest {
            url: url.to_string(),
            body,
            headers: Vec::new(),
        });
        true
    }

    async fn fetch_pixel(&self, url: &str) -> PixelOutcome {
        self.pixels.lock().unwrap().push(url.to_string());
        *self.pixel_outcome.lock().unwrap()
    }

    fn post_blocking(
        &self,
        url: &str,
        body: Vec<u8>,
        headers: &[(String, String)],
    ) -> OutboxResult<u16> {
        self.blocking_posts.lock().unwrap().push(RecordedRequest {
            url: url.to_string(),
            body,
            headers: headers.to_vec(),
        });
        Ok(self.next_status())
    }

    fn get_blocking(&self, url: &str, headers: &[(String, String)]) -> OutboxResult<u16> {
        self.blocking_gets.lock().unwrap().push(RecordedRequest {
            url: url.to_string(),
            body: Vec::new(),
            headers: headers.to_vec(),
        });
        Ok(self.next_status())
    }
}

/// Storage double whose writes always fail, as with exhausted quota.
pub struct FailingStorage;

impl KeyValueStorage for FailingStorage {
    fn set(&self, _key: &str, _value: &str) -> StorageResult<()> {
        Err(StorageError::Encoding("quota exceeded".to_string()))
    }

    fn get(&self, _key: &str) -> StorageResult<Option<String>> {
        Ok(None)
    }

    fn delete(&self, _key: &str) -> StorageResult<bool> {
        Ok(false)
    }
}

/// Build a payload from string fields.
pub fn payload(entries: &[(&str, &str)]) -> EventPayload {
    let mut map = EventPayload::new();
    for (key, value) in entries {
        map.insert(key.to_string(), json!(value));
    }
    map
}

/// Build a payload whose serialized form is at least `bytes` long.
pub fn payload_of_size(event: &str, bytes: usize) -> EventPayload {
    payload(&[("e", event), ("pad", &"x".repeat(bytes))])
}
