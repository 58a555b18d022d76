//! Registration lock lifetime around slow writes and failed releases

mod common;

use common::{config, instance, presence, LaggyStore, SERVICE};
use std::sync::Arc;
use std::time::Duration;
use traefik_register::store::MemoryStore;
use traefik_register::{Config, Error, Registrar, SlotStrategy};

fn short_lived_lock(strategy: SlotStrategy) -> Config {
    Config {
        lock_ttl_secs: 1,
        lock_timeout_secs: 30,
        ..config(strategy)
    }
}

#[tokio::test(start_paused = true)]
async fn test_scan_lock_outlives_slow_writes() {
    let memory = Arc::new(MemoryStore::new());
    presence(&memory, SERVICE, "i-1").await;
    presence(&memory, SERVICE, "i-2").await;

    let store = Arc::new(LaggyStore::new(memory.clone(), Duration::from_secs(2), false));
    let registrar = Registrar::new(store, &short_lived_lock(SlotStrategy::Scan)).unwrap();

    // Each registration spends 4s writing under a 1s lock TTL
    let first = instance("i-1", &["grpc://h:1", "http://h:2"]);
    let second = instance("i-2", &["grpc://h:3", "http://h:4"]);
    let (a, b) = tokio::join!(registrar.register(&first), registrar.register(&second));
    let (a, b) = (a.unwrap(), b.unwrap());

    let mut slots = vec![a.slot, b.slot];
    slots.sort_unstable();
    assert_eq!(slots, vec![1, 2]);
    assert_eq!(registrar.routes(SERVICE).await.unwrap().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_scan_release_failure_reports_written_keys() {
    let memory = Arc::new(MemoryStore::new());
    presence(&memory, SERVICE, "i-1").await;

    let store = Arc::new(LaggyStore::new(memory.clone(), Duration::from_millis(10), true));
    let registrar = Registrar::new(store, &short_lived_lock(SlotStrategy::Scan)).unwrap();

    let err = registrar
        .register(&instance("i-1", &["grpc://h:1", "http://h:2"]))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::LockRelease { .. }));
    assert!(!err.is_retryable());
    assert_eq!(
        err.committed_keys(),
        &[
            "traefik/http/services/user-grpc/loadbalancer/servers/1/url".to_string(),
            "traefik/http/services/user/loadbalancer/servers/1/url".to_string(),
        ]
    );
    assert_eq!(registrar.routes(SERVICE).await.unwrap().len(), 2);

    // The reported keys are exactly what cleanup needs
    assert_eq!(registrar.remove_keys(err.committed_keys()).await.unwrap(), 2);
    assert!(registrar.routes(SERVICE).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_counter_release_failure_happens_before_writes() {
    let memory = Arc::new(MemoryStore::new());
    presence(&memory, SERVICE, "i-1").await;

    let store = Arc::new(LaggyStore::new(memory.clone(), Duration::from_millis(10), true));
    let registrar =
        Registrar::new(store, &short_lived_lock(SlotStrategy::Counter { max: 1023 })).unwrap();

    let err = registrar
        .register(&instance("i-1", &["grpc://h:1", "http://h:2"]))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::LockRelease { .. }));
    assert!(err.is_retryable());
    assert!(err.committed_keys().is_empty());
    assert!(registrar.routes(SERVICE).await.unwrap().is_empty());
}
