#![allow(dead_code)]

use async_trait::async_trait;
use briefgate::{
    BriefingPayload, GenerationBackend, GenerationError, GenerationSettings, SharedStore,
    StoreError,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;

/// Backend double that counts calls and in-flight generations.
#[derive(Debug, Default)]
pub struct CountingBackend {
    calls: AtomicUsize,
    current: AtomicUsize,
    peak: AtomicUsize,
    delay: Option<Duration>,
    failing: Mutex<HashSet<String>>,
}

impl CountingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each generation takes `delay` of (Tokio) time.
    pub fn slow(delay: Duration) -> Self {
        Self { delay: Some(delay), ..Self::default() }
    }

    pub fn fail_for(&self, subject: &str) {
        self.failing.lock().unwrap().insert(subject.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationBackend for CountingBackend {
    async fn generate(
        &self,
        subject: &str,
        _settings: Option<&GenerationSettings>,
    ) -> Result<BriefingPayload, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.current.fetch_sub(1, Ordering::SeqCst);

        if self.failing.lock().unwrap().contains(subject) {
            return Err(GenerationError::Upstream(format!("provider returned 503 for {subject}")));
        }
        Ok(BriefingPayload::new(format!("Latest on {subject}."), "counting-backend")
            .with_summary(format!("{subject} summary"))
            .with_sources(["https://news.example.com/latest"]))
    }
}

/// Backend whose generations never complete.
#[derive(Debug, Default)]
pub struct HungBackend {
    calls: AtomicUsize,
}

impl HungBackend {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationBackend for HungBackend {
    async fn generate(
        &self,
        _subject: &str,
        _settings: Option<&GenerationSettings>,
    ) -> Result<BriefingPayload, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

/// Store whose every command fails.
#[derive(Debug, Default)]
pub struct DownStore;

fn down<T>() -> Result<T, StoreError> {
    Err(StoreError::Unavailable("connection refused".into()))
}

#[async_trait]
impl SharedStore for DownStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        down()
    }
    async fn set_ex(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), StoreError> {
        down()
    }
    async fn incr(&self, _key: &str) -> Result<i64, StoreError> {
        down()
    }
    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool, StoreError> {
        down()
    }
    async fn ttl(&self, _key: &str) -> Result<Option<Duration>, StoreError> {
        down()
    }
    async fn delete(&self, _key: &str) -> Result<bool, StoreError> {
        down()
    }
    async fn keys_with_prefix(&self, _prefix: &str) -> Result<Vec<String>, StoreError> {
        down()
    }
}

/// In-memory log sink for asserting on emitted events.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

pub struct LogGuard(Arc<Mutex<Vec<u8>>>);

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogGuard;
    fn make_writer(&'a self) -> Self::Writer {
        LogGuard(self.0.clone())
    }
}

impl std::io::Write for LogGuard {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl LogCapture {
    /// Subscriber writing plain-text events (with targets) into this capture.
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync {
        tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_target(true)
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::DEBUG)
            .finish()
    }

    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}
