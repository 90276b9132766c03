//! Mock endpoint for tests and simulation.
//!
//! [`MockEndpoint`] behaves like a well-mannered device by default: every
//! `set` is remembered and echoed back by later queries of the same command
//! and qualifier. Tests can script answers, silence the device, inject
//! transport failures and add latency.
//!
//! All delays use `tokio::time::sleep`, so paused-clock tests stay instant.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::endpoint::CommandEndpoint;
use crate::value::{Qualifier, Value};

/// A `set` received by the mock.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSet {
    /// Command name
    pub command: String,
    /// Value sent
    pub value: Value,
    /// Qualifier sent
    pub qualifier: Qualifier,
}

#[derive(Default)]
struct Script {
    /// Answers for an exact (command, qualifier)
    exact: HashMap<(String, String), Value>,
    /// Fallback answers per command
    any: HashMap<String, Value>,
    failure: Option<String>,
    latency: Duration,
}

/// Scriptable in-memory [`CommandEndpoint`].
pub struct MockEndpoint {
    script: Mutex<Script>,
    sets: Mutex<Vec<RecordedSet>>,
    queries: AtomicUsize,
    silent: AtomicBool,
    echo: AtomicBool,
}

impl MockEndpoint {
    /// Responsive mock that echoes sets back on queries.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script::default()),
            sets: Mutex::new(Vec::new()),
            queries: AtomicUsize::new(0),
            silent: AtomicBool::new(false),
            echo: AtomicBool::new(true),
        }
    }

    /// Answer every query of `command` with `value`.
    pub fn respond(&self, command: &str, value: impl Into<Value>) {
        self.script.lock().any.insert(command.to_string(), value.into());
    }

    /// Answer queries of `command` under exactly `qualifier` with `value`.
    pub fn respond_to(&self, command: &str, qualifier: &Qualifier, value: impl Into<Value>) {
        self.script
            .lock()
            .exact
            .insert((command.to_string(), qualifier.to_string()), value.into());
    }

    /// Stop answering queries, as if the device were unplugged.
    pub fn go_silent(&self) {
        self.silent.store(true, Ordering::SeqCst);
    }

    /// Answer queries again.
    pub fn resume(&self) {
        self.silent.store(false, Ordering::SeqCst);
    }

    /// Fail every call with `message` until [`clear_failure`](Self::clear_failure).
    pub fn fail_with(&self, message: &str) {
        self.script.lock().failure = Some(message.to_string());
    }

    /// Stop injecting failures.
    pub fn clear_failure(&self) {
        self.script.lock().failure = None;
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.script.lock().latency = latency;
    }

    /// Whether sets are echoed back by later queries.
    pub fn set_echo(&self, echo: bool) {
        self.echo.store(echo, Ordering::SeqCst);
    }

    /// Every `set` received so far.
    pub fn sets(&self) -> Vec<RecordedSet> {
        self.sets.lock().clone()
    }

    /// Number of `update` calls received.
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Apply latency and failure injection shared by both calls.
    async fn prelude(&self) -> Result<()> {
        let (latency, failure) = {
            let script = self.script.lock();
            (script.latency, script.failure.clone())
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match failure {
            Some(message) => Err(anyhow!(message)),
            None => Ok(()),
        }
    }
}

impl Default for MockEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandEndpoint for MockEndpoint {
    async fn set(&self, command: &str, value: &Value, qualifier: &Qualifier) -> Result<()> {
        self.prelude().await?;
        self.sets.lock().push(RecordedSet {
            command: command.to_string(),
            value: value.clone(),
            qualifier: qualifier.clone(),
        });
        if self.echo.load(Ordering::SeqCst) {
            self.respond_to(command, qualifier, value.clone());
        }
        Ok(())
    }

    async fn update(&self, command: &str, qualifier: &Qualifier) -> Result<Option<Value>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.prelude().await?;
        if self.silent.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let script = self.script.lock();
        let answer = script
            .exact
            .get(&(command.to_string(), qualifier.to_string()))
            .or_else(|| script.any.get(command))
            .cloned();
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_sets_per_qualifier() {
        let mock = MockEndpoint::new();
        let zone1 = Qualifier::new().with("Zone", 1);
        let zone2 = Qualifier::new().with("Zone", 2);

        mock.set("Volume", &Value::from(40), &zone1).await.unwrap();
        assert_eq!(mock.update("Volume", &zone1).await.unwrap(), Some(Value::from(40)));
        assert_eq!(mock.update("Volume", &zone2).await.unwrap(), None);
        assert_eq!(mock.queries(), 2);
    }

    #[tokio::test]
    async fn exact_answers_win_over_fallback() {
        let mock = MockEndpoint::new();
        let zone1 = Qualifier::new().with("Zone", 1);
        mock.respond("Volume", 10);
        mock.respond_to("Volume", &zone1, 55);

        assert_eq!(mock.update("Volume", &zone1).await.unwrap(), Some(Value::from(55)));
        assert_eq!(
            mock.update("Volume", &Qualifier::new()).await.unwrap(),
            Some(Value::from(10))
        );
    }

    #[tokio::test]
    async fn silence_and_failures() {
        let mock = MockEndpoint::new();
        mock.respond("Power", "On");

        mock.go_silent();
        assert_eq!(mock.update("Power", &Qualifier::new()).await.unwrap(), None);
        mock.resume();

        mock.fail_with("link down");
        let err = mock.update("Power", &Qualifier::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "link down");
        mock.clear_failure();
        assert!(mock.update("Power", &Qualifier::new()).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn latency_delays_calls() {
        let mock = MockEndpoint::new();
        mock.set_latency(Duration::from_secs(3));
        let started = tokio::time::Instant::now();
        mock.set("Power", &Value::from("On"), &Qualifier::new())
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(mock.sets().len(), 1);
    }
}
