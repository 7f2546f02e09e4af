use std::sync::Arc;
use tempfile::TempDir;
use utility_sync::auth::{create_authenticator, AuthConfig};
use utility_sync::clock::FixedClock;
use utility_sync::credentials::{Credential, CredentialStore};
use utility_sync::fetcher::{
    create_fetcher, ChannelIntervals, FetcherConfig, DEFAULT_ECOBEE_BASE_URL, DEFAULT_HSV_BASE_URL,
};
use utility_sync::Provider;

fn fetcher_config() -> FetcherConfig {
    FetcherConfig {
        hsv_base_url: DEFAULT_HSV_BASE_URL.to_string(),
        ecobee_base_url: DEFAULT_ECOBEE_BASE_URL.to_string(),
        hsv_username: "meter@example.com".to_string(),
        intervals: ChannelIntervals::default(),
        store_interval_minutes: 15,
        timezone: chrono_tz::America::Chicago,
        max_retries: 5,
        shutdown: None,
    }
}

#[test]
fn test_fetcher_factory_per_provider() {
    let config = fetcher_config();
    for provider in Provider::ALL {
        let fetcher = create_fetcher(provider, &config).unwrap();
        assert_eq!(fetcher.provider(), provider);
    }
}

#[test]
fn test_authenticator_factory_follows_credential() {
    let dir = TempDir::new().unwrap();
    for provider in Provider::ALL {
        let auth = create_authenticator(AuthConfig {
            token_dir: dir.path().to_path_buf(),
            credential: Credential::new(provider, "user", "pass", None),
            clock: Arc::new(FixedClock::at_millis(1_735_257_600_000)),
            hsv_base_url: DEFAULT_HSV_BASE_URL.to_string(),
            login_driver: None,
            max_retries: 5,
        })
        .unwrap();
        assert_eq!(auth.provider(), provider);
    }
}

#[test]
fn test_credentials_from_lookup() {
    let store = CredentialStore::with_lookup(|key| match key {
        "ECOBEE_USERNAME" => Some("me@example.com".to_string()),
        "ECOBEE_PASSWORD" => Some("hunter2".to_string()),
        _ => None,
    });

    let credential = store.load(Provider::Ecobee).unwrap();
    assert_eq!(credential.username(), "me@example.com");
    assert!(credential.totp_secret().is_none());
    assert!(store.load(Provider::Hsv).is_err());
}
