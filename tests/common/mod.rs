//! Scripted in-process article source shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

use veritas::api::{ApiError, ArticleSource, RawRecords};
use veritas::cancel::FetchToken;

/// Which source method was called, with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Recent(usize),
    Range(usize, usize),
    Keywords,
    ByIds(Vec<String>),
}

/// What the next call returns. Calls with no scripted reply are served from
/// the backing data.
pub enum Reply {
    Records(Vec<Value>),
    Fail(ApiError),
    /// Block until the test sends the result.
    Wait(oneshot::Receiver<Result<Vec<Value>, ApiError>>),
}

#[derive(Default)]
pub struct MockSource {
    feed: Mutex<Vec<Value>>,
    keywords: Mutex<Vec<Value>>,
    script: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<Call>>,
}

impl MockSource {
    pub fn with_feed(feed: Vec<Value>) -> Arc<Self> {
        let source = Self::default();
        *source.feed.lock().unwrap() = feed;
        Arc::new(source)
    }

    pub fn set_feed(&self, feed: Vec<Value>) {
        *self.feed.lock().unwrap() = feed;
    }

    pub fn set_keywords(&self, keywords: Vec<Value>) {
        *self.keywords.lock().unwrap() = keywords;
    }

    pub fn push_reply(&self, reply: Reply) {
        self.script.lock().unwrap().push_back(reply);
    }

    pub fn push_failure(&self, err: ApiError) {
        self.push_reply(Reply::Fail(err));
    }

    /// Queue a reply that blocks until the returned sender fires.
    pub fn gate(&self) -> oneshot::Sender<Result<Vec<Value>, ApiError>> {
        let (tx, rx) = oneshot::channel();
        self.push_reply(Reply::Wait(rx));
        tx
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Yield until at least `n` calls have been made.
    pub async fn wait_for_calls(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.calls.lock().unwrap().len() < n {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("source was not called in time");
    }

    fn feed_slice(&self, start: usize, stop: usize) -> Vec<Value> {
        let feed = self.feed.lock().unwrap();
        let stop = stop.min(feed.len());
        let start = start.min(stop);
        feed[start..stop].to_vec()
    }

    async fn respond(&self, call: Call, fallback: Vec<Value>) -> Result<RawRecords, ApiError> {
        self.calls.lock().unwrap().push(call);
        let scripted = self.script.lock().unwrap().pop_front();
        match scripted {
            None => Ok(fallback),
            Some(Reply::Records(records)) => Ok(records),
            Some(Reply::Fail(err)) => Err(err),
            Some(Reply::Wait(rx)) => rx.await.unwrap_or(Err(ApiError::Cancelled)),
        }
    }
}

#[async_trait]
impl ArticleSource for MockSource {
    async fn fetch_recent(&self, limit: usize, _token: &FetchToken) -> Result<RawRecords, ApiError> {
        let fallback = self.feed_slice(0, limit);
        self.respond(Call::Recent(limit), fallback).await
    }

    async fn fetch_range(
        &self,
        start: usize,
        stop: usize,
        _token: &FetchToken,
    ) -> Result<RawRecords, ApiError> {
        let fallback = self.feed_slice(start, stop);
        self.respond(Call::Range(start, stop), fallback).await
    }

    async fn fetch_keywords(&self, _token: &FetchToken) -> Result<RawRecords, ApiError> {
        let fallback = self.keywords.lock().unwrap().clone();
        self.respond(Call::Keywords, fallback).await
    }

    async fn fetch_by_ids(&self, ids: &[String], _token: &FetchToken) -> Result<RawRecords, ApiError> {
        let fallback = self
            .feed
            .lock()
            .unwrap()
            .iter()
            .filter(|record| {
                record["id"]
                    .as_str()
                    .is_some_and(|id| ids.iter().any(|wanted| wanted == id))
            })
            .cloned()
            .collect();
        self.respond(Call::ByIds(ids.to_vec()), fallback).await
    }
}

pub fn record(id: &str, title: &str) -> Value {
    json!({
        "id": id,
        "title": title,
        "source": "Tagesschau",
        "publishedAt": "2024-03-01T12:00:00+0000",
        "uri": format!("https://example.com/{id}"),
        "views": 3,
        "description": "",
        "banner": "",
        "category": ["Politik"],
        "linkedTo": []
    })
}

/// Records `a{start}` .. `a{stop - 1}`.
pub fn records(start: usize, stop: usize) -> Vec<Value> {
    (start..stop)
        .map(|i| record(&format!("a{i}"), &format!("Article {i}")))
        .collect()
}
