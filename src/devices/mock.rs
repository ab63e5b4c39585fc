//! A mock positioner that simulates asynchronous motion.
//!
//! `MockMotor` stands in for real hardware in tests and demos: a move takes a
//! configurable travel time, targets are validated against limits, and faults
//! can be injected into `start`, `is_completed` and `stop`. Call counters and
//! a method log make cancellation and hook behavior observable.

use crate::device::Device;
use crate::status::{SeqStatus, StatusCode};
use crate::value::Value;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

pub struct MockMotor {
    name: String,
    inner: Mutex<Inner>,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    finish_calls: AtomicUsize,
}

struct Inner {
    position: f64,
    target: f64,
    deadline: Option<Instant>,
    limits: (f64, f64),
    travel_time: Duration,
    params: HashMap<String, Value>,
    fail_next_starts: u32,
    fail_next_polls: u32,
    fail_next_stops: u32,
    reported: Option<SeqStatus>,
    method_log: Vec<String>,
}

impl MockMotor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                position: 0.0,
                target: 0.0,
                deadline: None,
                limits: (-360.0, 360.0),
                travel_time: Duration::from_millis(10),
                params: HashMap::new(),
                fail_next_starts: 0,
                fail_next_polls: 0,
                fail_next_stops: 0,
                reported: None,
                method_log: Vec::new(),
            }),
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            finish_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_limits(self, low: f64, high: f64) -> Self {
        self.lock().limits = (low, high);
        self
    }

    pub fn with_travel_time(self, travel_time: Duration) -> Self {
        self.lock().travel_time = travel_time;
        self
    }

    /// Reject the next `n` start commands.
    pub fn fail_next_starts(&self, n: u32) {
        self.lock().fail_next_starts = n;
    }

    /// Fail the next `n` completion polls.
    pub fn fail_next_polls(&self, n: u32) {
        self.lock().fail_next_polls = n;
    }

    /// Fail the next `n` stop commands.
    pub fn fail_next_stops(&self, n: u32) {
        self.lock().fail_next_stops = n;
    }

    /// Override the status this device reports, simulating a fault seen by
    /// the device itself but not yet by the sequencer.
    pub fn report_status(&self, status: SeqStatus) {
        self.lock().reported = Some(status);
    }

    pub fn position(&self) -> f64 {
        self.lock().position
    }

    pub fn start_count(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn finish_count(&self) -> usize {
        self.finish_calls.load(Ordering::SeqCst)
    }

    /// Names of the methods invoked via [`Device::call`], in order.
    pub fn method_log(&self) -> Vec<String> {
        self.lock().method_log.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Device for MockMotor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_allowed(&self, target: &Value) -> (bool, String) {
        let Some(v) = target.as_f64() else {
            return (false, format!("target {} is not numeric", target));
        };
        let (low, high) = self.lock().limits;
        if v < low || v > high {
            (false, format!("{} outside limits [{}, {}]", v, low, high))
        } else {
            (true, String::new())
        }
    }

    async fn start(&self, target: Value) -> Result<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.lock();
        if inner.fail_next_starts > 0 {
            inner.fail_next_starts -= 1;
            bail!("{}: controller refused start", self.name);
        }
        let v = target
            .as_f64()
            .ok_or_else(|| anyhow!("{}: target {} is not numeric", self.name, target))?;
        inner.target = v;
        inner.deadline = Some(Instant::now() + inner.travel_time);
        Ok(())
    }

    async fn is_completed(&self) -> Result<bool> {
        let mut inner = self.lock();
        if inner.fail_next_polls > 0 {
            inner.fail_next_polls -= 1;
            bail!("{}: axis fault", self.name);
        }
        match inner.deadline {
            None => Ok(true),
            Some(end) if Instant::now() >= end => {
                inner.position = inner.target;
                inner.deadline = None;
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }

    async fn finish(&self) -> Result<()> {
        self.finish_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.lock();
        if inner.fail_next_stops > 0 {
            inner.fail_next_stops -= 1;
            bail!("{}: brake did not engage", self.name);
        }
        if inner.deadline.take().is_some() {
            // halted partway
            inner.position = (inner.position + inner.target) / 2.0;
        }
        Ok(())
    }

    async fn read(&self) -> Result<Value> {
        Ok(Value::Float(self.lock().position))
    }

    async fn status(&self) -> SeqStatus {
        let inner = self.lock();
        if let Some(status) = &inner.reported {
            return status.clone();
        }
        if inner.deadline.is_some() {
            SeqStatus::new(StatusCode::Busy, format!("moving to {}", inner.target))
        } else {
            SeqStatus::idle()
        }
    }

    async fn set_param(&self, name: &str, value: Value) -> Result<()> {
        self.lock().params.insert(name.to_string(), value);
        Ok(())
    }

    async fn read_param(&self, name: &str) -> Result<Value> {
        self.lock()
            .params
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("{}: parameter {} is not set", self.name, name))
    }

    async fn call(&self, method: &str, _args: &[Value]) -> Result<Value> {
        self.lock().method_log.push(method.to_string());
        match method {
            "release" | "fix" | "home" => Ok(Value::Null),
            _ => bail!("{}: method {} is not supported", self.name, method),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_motion_takes_travel_time() {
        let motor = MockMotor::new("m").with_travel_time(Duration::from_millis(20));
        motor.start(Value::Float(5.0)).await.unwrap();
        assert!(!motor.is_completed().await.unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(motor.is_completed().await.unwrap());
        assert_eq!(motor.position(), 5.0);
    }

    #[tokio::test]
    async fn test_limits_reject_targets() {
        let motor = MockMotor::new("m").with_limits(0.0, 10.0);
        let (ok, _) = motor.is_allowed(&Value::Float(5.0)).await;
        assert!(ok);
        let (ok, reason) = motor.is_allowed(&Value::Float(50.0)).await;
        assert!(!ok);
        assert!(reason.contains("outside limits"));
    }

    #[tokio::test]
    async fn test_stop_halts_partway() {
        let motor = MockMotor::new("m").with_travel_time(Duration::from_secs(60));
        motor.start(Value::Float(10.0)).await.unwrap();
        motor.stop().await.unwrap();
        assert!(motor.is_completed().await.unwrap());
        assert_eq!(motor.position(), 5.0);
        assert_eq!(motor.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_injected_start_failure() {
        let motor = MockMotor::new("m");
        motor.fail_next_starts(1);
        assert!(motor.start(Value::Float(1.0)).await.is_err());
        assert!(motor.start(Value::Float(1.0)).await.is_ok());
        assert_eq!(motor.start_count(), 2);
    }

    #[tokio::test]
    async fn test_params_round_trip() {
        let motor = MockMotor::new("m");
        motor.set_param("speed", Value::Float(2.5)).await.unwrap();
        assert_eq!(motor.read_param("speed").await.unwrap(), Value::Float(2.5));
        assert!(motor.read_param("unset").await.is_err());
    }
}
