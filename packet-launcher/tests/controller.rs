//! Controller end-to-end tests: registry events drive devices to ready and
//! through deletion.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use common::{test_config, wait_for, TestEnv};
use packet_launcher::clients::simulated::Operation;
use packet_launcher::events::reasons;
use packet_launcher::{Controller, DeviceReconciler};

#[tokio::test]
async fn test_device_lifecycle() {
    let mut env = TestEnv::new().await;
    env.config = test_config();
    let reconciler = Arc::new(env.reconciler());
    let controller = Controller::new(
        reconciler,
        env.registry.clone(),
        Arc::new(env.recorder.clone()),
        env.config.clone(),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(controller.run(shutdown_rx));

    let device = env.add_device("dev-1").await;
    let key = device.key();

    let (env_ref, key_ref) = (&env, &key);
    let ready = wait_for(Duration::from_secs(5), move || async move {
        env_ref.get(key_ref).await.map_or(false, |d| d.status.ready)
    })
    .await;
    assert!(ready, "device never became ready");

    let stored = env.get(&key).await.unwrap();
    assert_eq!(stored.status.ip_addresses.len(), 2);
    assert_eq!(env.provider.calls_of(Operation::Create).len(), 1);

    env.registry.delete_device(&key).await.unwrap();
    let removed = wait_for(Duration::from_secs(5), move || async move {
        env_ref.get(key_ref).await.is_none()
    })
    .await;
    assert!(removed, "device was never finalized");
    assert!(env.provider.device_ids().is_empty());
    assert_eq!(env.provider.calls_of(Operation::Delete).len(), 1);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_devices_loaded_before_start_are_reconciled() {
    let mut env = TestEnv::new().await;
    env.config = test_config();
    let first = env.add_device("dev-1").await.key();
    let second = env.add_device("dev-2").await.key();

    let controller = Controller::new(
        Arc::new(env.reconciler()),
        env.registry.clone(),
        Arc::new(env.recorder.clone()),
        env.config.clone(),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(controller.run(shutdown_rx));

    let (env_ref, first_ref, second_ref) = (&env, &first, &second);
    let ready = wait_for(Duration::from_secs(5), move || async move {
        let a = env_ref.get(first_ref).await.map_or(false, |d| d.status.ready);
        let b = env_ref.get(second_ref).await.map_or(false, |d| d.status.ready);
        a && b
    })
    .await;
    assert!(ready);
    assert_eq!(env.provider.calls_of(Operation::Create).len(), 2);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_configuration_error_is_retried_after_fix() {
    let mut env = TestEnv::without_secret();
    env.config = test_config();
    let device = env.add_device("dev-1").await;
    let key = device.key();

    let controller = Controller::new(
        Arc::new(DeviceReconciler::new(
            env.registry.clone(),
            Arc::new(env.provider.clone()),
            env.config.clone(),
        )),
        env.registry.clone(),
        Arc::new(env.recorder.clone()),
        env.config.clone(),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(controller.run(shutdown_rx));

    let (env_ref, key_ref) = (&env, &key);
    let reported = wait_for(Duration::from_secs(5), move || async move {
        env_ref
            .recorder
            .reasons()
            .contains(&reasons::CONFIGURATION_ERROR.to_string())
    })
    .await;
    assert!(reported);
    assert!(env.provider.calls().is_empty());

    env.registry
        .put_secret(
            packet_launcher::Secret::new(common::NAMESPACE, "packet-secret")
                .with_entry("apiKey", common::API_KEY),
        )
        .await;

    let created = wait_for(Duration::from_secs(5), move || async move {
        env_ref
            .get(key_ref)
            .await
            .map_or(false, |d| !d.status.id.is_empty())
    })
    .await;
    assert!(created, "device was not created after the secret appeared");

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}
