//! Tests that run against a throwaway SQLite database per test.

pub mod cluster_tests;
pub mod store_tests;

use crate::{config::Config, state::AppState};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use tempfile::TempDir;

/// Keeps the database directory alive for as long as the state is in use.
pub(crate) struct TestContext {
    pub state: Arc<AppState>,
    _dir: TempDir,
}

pub(crate) async fn setup() -> TestContext {
    setup_with(|_| {}).await
}

pub(crate) async fn setup_with(adjust: impl FnOnce(&mut Config)) -> TestContext {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let mut config = Config::with_database_url(format!(
        "sqlite://{}",
        dir.path().join("test.db").display()
    ));
    config.ingest_workers = 4;
    adjust(&mut config);

    let state = AppState::init(config).await.expect("Failed to initialise store");
    TestContext { state, _dir: dir }
}

/// A distinct, well-formed 88 character signature for each `n`.
pub(crate) fn signature(n: u64) -> String {
    let mut digits = String::with_capacity(20);
    let mut rest = n;
    for _ in 0..20 {
        digits.insert(0, char::from(b'1' + (rest % 9) as u8));
        rest /= 9;
    }
    format!("{}{}", "A".repeat(68), digits)
}

/// `offset` seconds after a fixed reference instant.
pub(crate) fn at(offset: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(offset)
}

#[test]
fn test_signature_helper_is_valid_and_distinct() {
    let a = signature(1);
    let b = signature(2);
    assert_eq!(a.len(), 88);
    assert_ne!(a, b);
    assert!(crate::validation::validate_signature(&a).is_ok());
}
