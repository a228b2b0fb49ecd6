//! Shared fakes for integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use vidrelay::dispatch::ProviderApi;
use vidrelay::error::RelayError;

type Scripted = Mutex<VecDeque<Result<Value, RelayError>>>;

/// Provider that answers from scripted queues and records what it was asked.
#[derive(Default)]
pub struct FakeProvider {
    creates: Scripted,
    queries: Scripted,
    files: Scripted,
    pub create_payloads: Mutex<Vec<Value>>,
    pub query_calls: AtomicUsize,
    pub file_calls: AtomicUsize,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_create(&self, r: Result<Value, RelayError>) {
        self.creates.lock().unwrap().push_back(r);
    }

    pub fn push_query(&self, r: Result<Value, RelayError>) {
        self.queries.lock().unwrap().push_back(r);
    }

    pub fn push_file(&self, r: Result<Value, RelayError>) {
        self.files.lock().unwrap().push_back(r);
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_payloads.lock().unwrap().len()
    }

    fn pop(queue: &Scripted, what: &str) -> Result<Value, RelayError> {
        queue.lock().unwrap().pop_front().unwrap_or_else(|| {
            Err(RelayError::ProviderTransport {
                message: format!("no scripted {what} response"),
                status: None,
            })
        })
    }
}

#[async_trait]
impl ProviderApi for FakeProvider {
    async fn create_task(&self, payload: &Value) -> Result<Value, RelayError> {
        self.create_payloads.lock().unwrap().push(payload.clone());
        Self::pop(&self.creates, "create")
    }

    async fn query_task(&self, _task_id: &str) -> Result<Value, RelayError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        Self::pop(&self.queries, "query")
    }

    async fn retrieve_file(&self, _file_id: &str) -> Result<Value, RelayError> {
        self.file_calls.fetch_add(1, Ordering::SeqCst);
        Self::pop(&self.files, "file")
    }
}

pub fn transport_error() -> RelayError {
    RelayError::ProviderTransport {
        message: "connection refused".to_string(),
        status: None,
    }
}
