//! End-to-end tests of the built-in locked-device sequencer.

use labseq::{Device, LockedDeviceBuilder, MockMotor, SeqError, StatusCode, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

const WAIT_LIMIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_unlock_move_relock() {
    init_logging();
    let omega = Arc::new(MockMotor::new("omega"));
    let lift = Arc::new(MockMotor::new("lift"));

    let dev = LockedDeviceBuilder::new("omega_locked", omega.clone(), lift.clone(), 90.0).build();
    dev.start(Value::Float(45.0)).await.unwrap();
    timeout(WAIT_LIMIT, dev.wait()).await.unwrap().unwrap();

    assert_eq!(omega.position(), 45.0);
    // moved to the unlock value and back to its original position
    assert_eq!(lift.position(), 0.0);
    assert_eq!(lift.start_count(), 2);
    assert_eq!(dev.read().await.unwrap(), Value::Float(45.0));
    assert_eq!(dev.status().await.code, StatusCode::Ok);
}

/// Start can be driven from a spawned task, as when a locked device appears
/// as a target inside another sequence.
#[tokio::test]
async fn test_start_from_spawned_task() {
    init_logging();
    let omega = Arc::new(MockMotor::new("omega"));
    let lift = Arc::new(MockMotor::new("lift"));

    let dev = Arc::new(
        LockedDeviceBuilder::new("omega_locked", omega.clone(), lift.clone(), 90.0).build(),
    );
    let starter = {
        let dev = dev.clone();
        tokio::spawn(async move { dev.start(Value::Float(30.0)).await })
    };
    timeout(WAIT_LIMIT, starter).await.unwrap().unwrap().unwrap();
    timeout(WAIT_LIMIT, dev.wait()).await.unwrap().unwrap();
    assert_eq!(omega.position(), 30.0);
    assert_eq!(lift.position(), 0.0);
}

#[tokio::test]
async fn test_explicit_lock_value() {
    init_logging();
    let omega = Arc::new(MockMotor::new("omega"));
    let lift = Arc::new(MockMotor::new("lift"));

    let dev = LockedDeviceBuilder::new("omega_locked", omega.clone(), lift.clone(), 90.0)
        .lock_value(10.0)
        .build();
    dev.start(Value::Float(-30.0)).await.unwrap();
    timeout(WAIT_LIMIT, dev.wait()).await.unwrap().unwrap();

    assert_eq!(omega.position(), -30.0);
    assert_eq!(lift.position(), 10.0);
}

#[tokio::test]
async fn test_keep_fixed_releases_and_refixes() {
    init_logging();
    let omega = Arc::new(MockMotor::new("omega"));
    let lift = Arc::new(MockMotor::new("lift"));

    let dev = LockedDeviceBuilder::new("omega_locked", omega.clone(), lift.clone(), 90.0)
        .keep_fixed()
        .build();
    dev.start(Value::Float(5.0)).await.unwrap();
    timeout(WAIT_LIMIT, dev.wait()).await.unwrap().unwrap();

    assert_eq!(
        lift.method_log(),
        vec!["release", "fix", "release", "fix"]
    );
}

#[tokio::test]
async fn test_target_validation_delegates_to_main_device() {
    init_logging();
    let omega = Arc::new(MockMotor::new("omega").with_limits(-90.0, 90.0));
    let lift = Arc::new(MockMotor::new("lift"));

    let dev = LockedDeviceBuilder::new("omega_locked", omega.clone(), lift.clone(), 45.0).build();
    let (ok, reason) = dev.is_allowed(&Value::Float(120.0)).await;
    assert!(!ok);
    assert!(reason.contains("outside limits"));

    // the generated sequence is checked up front as well
    assert!(dev.start(Value::Float(120.0)).await.is_err());
    assert_eq!(omega.start_count(), 0);
    assert_eq!(lift.start_count(), 0);
}

#[tokio::test]
async fn test_stop_leaves_lock_where_it_is() {
    init_logging();
    let omega = Arc::new(MockMotor::new("omega"));
    let lift = Arc::new(MockMotor::new("lift").with_travel_time(Duration::from_secs(60)));

    let dev = LockedDeviceBuilder::new("omega_locked", omega.clone(), lift.clone(), 90.0).build();
    dev.start(Value::Float(45.0)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    dev.stop().await.unwrap();

    let err = timeout(WAIT_LIMIT, dev.wait()).await.unwrap().unwrap_err();
    assert!(matches!(err, SeqError::Stopped(_)));
    assert_eq!(dev.status().await.code, StatusCode::NotReached);
    // the main device never moved
    assert_eq!(omega.start_count(), 0);

    dev.reset().unwrap();
    assert!(dev.finish().await.is_ok());
}
