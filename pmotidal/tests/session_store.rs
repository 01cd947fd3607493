use chrono::{TimeZone, Utc};
use pmotidal::{Credentials, PendingLogin, SessionStore};
use std::fs;
use tempfile::TempDir;

fn create_test_store() -> (TempDir, SessionStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::in_dir(dir.path());
    (dir, store)
}

#[test]
fn test_corrupt_record_is_treated_as_absent() {
    let (_dir, store) = create_test_store();

    fs::write(store.session_path(), "{ not json").unwrap();
    assert!(store.load().is_none());

    fs::write(store.session_path(), "[1, 2, 3]").unwrap();
    assert!(store.load().is_none());
}

#[test]
fn test_missing_required_field() {
    let (_dir, store) = create_test_store();

    fs::write(
        store.session_path(),
        r#"{"access_token": "a", "token_type": "Bearer"}"#,
    )
    .unwrap();
    assert!(store.load().is_none());
}

#[test]
fn test_wrong_field_type() {
    let (_dir, store) = create_test_store();

    fs::write(
        store.session_path(),
        r#"{"access_token": 42, "refresh_token": "r", "token_type": "Bearer"}"#,
    )
    .unwrap();
    assert!(store.load().is_none());
}

#[test]
fn test_record_without_timestamp_loads() {
    let (_dir, store) = create_test_store();

    fs::write(
        store.session_path(),
        r#"{"access_token": "a", "refresh_token": "r", "token_type": "Bearer"}"#,
    )
    .unwrap();

    let creds = store.load().unwrap();
    assert_eq!(creds.access_token, "a");
    assert!(creds.last_updated.is_none());
}

#[test]
fn test_record_format_on_disk() {
    let (_dir, store) = create_test_store();
    let mut creds = Credentials::new("access", "refresh", "Bearer");
    creds.last_updated = Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());
    assert!(store.save(&creds));

    let raw: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(store.session_path()).unwrap()).unwrap();
    assert_eq!(raw["access_token"], "access");
    assert_eq!(raw["refresh_token"], "refresh");
    assert_eq!(raw["token_type"], "Bearer");
    assert!(raw["last_updated"].as_str().unwrap().starts_with("2024-05-01T10:00:00"));
}

#[test]
fn test_save_replaces_previous_record() {
    let (_dir, store) = create_test_store();

    assert!(store.save(&Credentials::new("old", "r", "Bearer")));
    assert!(store.save(&Credentials::new("new", "r", "Bearer")));

    assert_eq!(store.load().unwrap().access_token, "new");
}

#[test]
fn test_pending_login_record() {
    let (_dir, store) = create_test_store();
    let created_at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
    let pending = PendingLogin {
        verification_uri: "link.tidal.com/ABC-123".into(),
        verification_code: Some("ABC-123".into()),
        device_code: Some("device".into()),
        created_at,
        expires_at: created_at + chrono::Duration::seconds(300),
    };

    assert!(store.save_pending(&pending));
    assert_eq!(store.load_pending(), Some(pending));

    let raw: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(store.login_cache_path()).unwrap()).unwrap();
    assert_eq!(raw["verification_uri"], "link.tidal.com/ABC-123");
    assert!(raw["created_at"].as_str().unwrap().starts_with("2024-05-01T10:00:00"));
    assert!(raw["expires_at"].as_str().unwrap().starts_with("2024-05-01T10:05:00"));

    store.clear_pending();
    assert!(store.load_pending().is_none());
}

#[test]
fn test_minimal_pending_record_loads() {
    let (_dir, store) = create_test_store();

    fs::write(
        store.login_cache_path(),
        r#"{"verification_uri": "link.tidal.com/X", "created_at": "2024-05-01T10:00:00Z", "expires_at": "2024-05-01T10:05:00Z"}"#,
    )
    .unwrap();

    let pending = store.load_pending().unwrap();
    assert!(pending.verification_code.is_none());
    assert_eq!(pending.remaining_secs(pending.created_at), 300);
}

#[test]
fn test_clear_without_record_is_harmless() {
    let (_dir, store) = create_test_store();
    store.clear();
    assert!(store.load().is_none());
}
