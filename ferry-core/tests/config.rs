use std::time::Duration;

use ferry_core::config::{TransferConfig, DEFAULT_CHUNK_SIZE};
use ferry_core::manifest::TransferMode;
use ferry_core::retry::{Backoff, RetryStrategy};
use ferry_core::TransferError;

#[test]
fn json_config_fills_defaults() {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join("ferry.json");
    std::fs::write(
        &path,
        r#"{
            "endpoint": "https://sink.example/upload",
            "max_retries": 5,
            "backoff": { "kind": "exponential", "base_ms": 200, "max_ms": 5000 },
            "state_ttl_secs": 3600,
            "exclude": ["**/*.tmp"]
        }"#,
    )
    .unwrap();
    let cfg = TransferConfig::from_json_file(&path).unwrap();
    cfg.validate().unwrap();
    assert_eq!(cfg.chunk_size, DEFAULT_CHUNK_SIZE);
    assert_eq!(cfg.mode, TransferMode::Direct);
    assert_eq!(cfg.state_ttl(), Some(Duration::from_secs(3600)));
    assert_eq!(
        cfg.backoff,
        Backoff::Exponential { base_ms: 200, max_ms: 5000, jitter_ms: 0 }
    );
    let retry = cfg.retry_policy();
    assert_eq!(retry.max_attempts(), 5);
    assert_eq!(retry.delay_before(3), Duration::from_millis(400));
}

#[test]
fn unknown_fields_are_rejected() {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join("ferry.json");
    std::fs::write(&path, r#"{"endpoint": "http://x", "chunksize": 10}"#).unwrap();
    let err = TransferConfig::from_json_file(&path).unwrap_err();
    assert!(matches!(err, TransferError::InvalidConfig(_)), "{err}");
}

#[test]
fn validation_catches_unusable_settings() {
    let ok = TransferConfig::new("http://sink");
    ok.validate().unwrap();

    let cases: [(&str, fn(&mut TransferConfig)); 4] = [
        ("endpoint", |c| c.endpoint = "  ".into()),
        ("chunk_size", |c| c.chunk_size = 0),
        ("max_retries", |c| c.max_retries = 0),
        ("staging_dir", |c| c.mode = TransferMode::Staged),
    ];
    for (what, mutate) in cases {
        let mut cfg = ok.clone();
        mutate(&mut cfg);
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains(what), "{what}: {err}");
    }

    let mut staged = ok.clone();
    staged.mode = TransferMode::Staged;
    staged.staging_dir = Some("/tmp/ferry-staging".into());
    staged.validate().unwrap();
}
