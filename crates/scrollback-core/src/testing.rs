//! In-memory transports for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use serde_json::{json, Value};

use crate::client::{RawResponse, Transport};
use crate::config::ClientConfig;
use crate::error::{ArchiveError, Result};

pub fn test_config() -> ClientConfig {
    ClientConfig::new("http://127.0.0.1:9/api/v10/", "test-token").unwrap()
}

/// Timestamp for synthetic message `id`: one second per id from 2024-01-01.
pub fn timestamp_for(id: u64) -> String {
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    (base + ChronoDuration::seconds(id as i64)).to_rfc3339()
}

pub fn message_json(id: u64) -> Value {
    let attachments = if id % 10 == 0 {
        json!([{"url": format!("https://cdn.example/{}.png", id)}])
    } else {
        json!([])
    };
    json!({
        "id": id.to_string(),
        "author": {"username": format!("user{}", id % 3)},
        "content": format!("message {}", id),
        "attachments": attachments,
        "timestamp": timestamp_for(id),
    })
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl RecordedRequest {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

fn record_request(log: &Mutex<Vec<RecordedRequest>>, path: &str, query: &[(&str, String)]) {
    log.lock().unwrap().push(RecordedRequest {
        path: path.to_string(),
        query: query.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
    });
}

/// Replays queued responses in order; an empty queue answers `200 []`.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<RawResponse>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_raw(&self, response: RawResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_status(&self, status: u16, body: Value) {
        self.push_raw(RawResponse {
            status,
            body: body.to_string(),
            retry_after_header: None,
        });
    }

    pub fn push_network_error(&self, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(ArchiveError::TransientNetwork(message.to_string())));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<RawResponse> {
        record_request(&self.requests, path, query);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(RawResponse {
                    status: 200,
                    body: "[]".to_string(),
                    retry_after_header: None,
                })
            })
    }
}

/// A channel holding messages with the given ids, paginated like the real
/// service: at most `limit` messages per page, newest first.
pub struct SyntheticChannel {
    ids: Mutex<Vec<u64>>,
    /// Respond 429 to this many requests before serving pages.
    throttle_first: Mutex<u32>,
    /// Fail `before`-walks with a 500 after this many served pages.
    fail_backward_after: Option<usize>,
    /// Fail `after`-walks with a 500 after this many served pages.
    fail_forward_after: Option<usize>,
    served: Mutex<(usize, usize)>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl SyntheticChannel {
    pub fn new(ids: impl IntoIterator<Item = u64>) -> Self {
        let mut ids: Vec<u64> = ids.into_iter().collect();
        ids.sort_unstable();
        Self {
            ids: Mutex::new(ids),
            throttle_first: Mutex::new(0),
            fail_backward_after: None,
            fail_forward_after: None,
            served: Mutex::new((0, 0)),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn throttle_first(self, n: u32) -> Self {
        *self.throttle_first.lock().unwrap() = n;
        self
    }

    pub fn fail_backward_after(mut self, pages: usize) -> Self {
        self.fail_backward_after = Some(pages);
        self
    }

    pub fn fail_forward_after(mut self, pages: usize) -> Self {
        self.fail_forward_after = Some(pages);
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// New messages arriving in the channel.
    pub fn append(&self, new_ids: impl IntoIterator<Item = u64>) {
        let mut ids = self.ids.lock().unwrap();
        ids.extend(new_ids);
        ids.sort_unstable();
        ids.dedup();
    }

    fn server_error() -> RawResponse {
        RawResponse {
            status: 500,
            body: "internal error".to_string(),
            retry_after_header: None,
        }
    }
}

#[async_trait]
impl Transport for SyntheticChannel {
    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<RawResponse> {
        record_request(&self.requests, path, query);

        {
            let mut throttle = self.throttle_first.lock().unwrap();
            if *throttle > 0 {
                *throttle -= 1;
                return Ok(RawResponse {
                    status: 429,
                    body: json!({"retry_after": 0.5}).to_string(),
                    retry_after_header: None,
                });
            }
        }

        let find = |name: &str| {
            query
                .iter()
                .find(|(k, _)| *k == name)
                .and_then(|(_, v)| v.parse::<u64>().ok())
        };
        let limit = find("limit").unwrap_or(50) as usize;

        let page: Vec<u64> = if let Some(after) = find("after") {
            let mut served = self.served.lock().unwrap();
            if self.fail_forward_after.is_some_and(|n| served.0 >= n) {
                return Ok(Self::server_error());
            }
            served.0 += 1;
            // Oldest `limit` ids after the anchor, returned newest first.
            let mut ids: Vec<u64> = self
                .ids
                .lock()
                .unwrap()
                .iter()
                .copied()
                .filter(|&id| id > after)
                .take(limit)
                .collect();
            ids.reverse();
            ids
        } else {
            let mut served = self.served.lock().unwrap();
            if self.fail_backward_after.is_some_and(|n| served.1 >= n) {
                return Ok(Self::server_error());
            }
            served.1 += 1;
            let before = find("before").unwrap_or(u64::MAX);
            self.ids
                .lock()
                .unwrap()
                .iter()
                .rev()
                .copied()
                .filter(|&id| id < before)
                .take(limit)
                .collect()
        };

        let body = Value::Array(page.into_iter().map(message_json).collect());
        Ok(RawResponse {
            status: 200,
            body: body.to_string(),
            retry_after_header: None,
        })
    }
}
