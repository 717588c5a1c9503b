//! Integration tests for failure isolation between processes.
//!
//! A panicking or hanging syncer call must only affect its own process,
//! and no process may ever have two syncer calls in flight.

mod common;

use common::*;
use pv_core::syncer::mock::{MockBehavior, MockConfig, MockSyncer};
use pv_core::{ManagerError, ProcessUpdate, TerminateOptions};
use pv_protocol::{ProcessState, SyncPhase};
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_panicking_syncer_is_isolated() {
    init_tracing();
    let syncer = MockSyncer::new();
    let (manager, _sink) = create_test_manager(syncer.clone(), create_test_config());
    let boom = pid("boom");

    create_process(
        &manager,
        "boom",
        MockConfig::healthy("boom").with_sync(MockBehavior::Panic),
    );
    for i in 0..5 {
        create_healthy_process(&manager, &format!("ok-{}", i));
    }

    assert!(
        eventually(WAIT, || manager
            .get_process_status(&boom)
            .is_some_and(|s| s.error_count >= 3))
        .await,
        "panics should be retried and counted"
    );

    let status = manager.get_process_status(&boom).unwrap();
    assert_eq!(status.state, ProcessState::Starting);
    assert!(status
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("syncer panicked")));

    for i in 0..5 {
        let id = pid(&format!("ok-{}", i));
        assert!(wait_for_state(&manager, &id, ProcessState::Syncing).await);
        let before = syncer.call_count(&id, SyncPhase::Sync);
        assert!(
            eventually(WAIT, || syncer.call_count(&id, SyncPhase::Sync) > before).await,
            "healthy processes keep resyncing"
        );
    }

    // The panicking process can still be terminated.
    manager
        .update_process(ProcessUpdate::terminate(boom.clone(), TerminateOptions::new()))
        .unwrap();
    assert!(wait_for_state(&manager, &boom, ProcessState::Finished).await);
    assert_eq!(syncer.max_concurrency(&boom), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hanging_syncer_is_isolated() {
    let syncer = MockSyncer::new();
    let (manager, _sink) = create_test_manager(syncer.clone(), create_test_config());
    let hung = pid("hung");

    create_process(
        &manager,
        "hung",
        MockConfig::healthy("hung").with_sync(MockBehavior::Hang),
    );
    create_healthy_process(&manager, "ok");

    let ok = pid("ok");
    assert!(wait_for_state(&manager, &ok, ProcessState::Syncing).await);
    assert!(eventually(WAIT, || syncer.call_count(&ok, SyncPhase::Sync) >= 3).await);

    let status = manager.get_process_status(&hung).unwrap();
    assert_eq!(status.state, ProcessState::Starting);
    assert!(status.working);
    assert_eq!(syncer.call_count(&hung, SyncPhase::Sync), 1);

    // Termination is recorded even though the hung call never returns.
    manager
        .update_process(ProcessUpdate::terminate(hung.clone(), TerminateOptions::new()))
        .unwrap();
    assert_eq!(
        manager.get_process_status(&hung).unwrap().state,
        ProcessState::Terminating
    );

    manager
        .update_process(ProcessUpdate::terminate(ok.clone(), TerminateOptions::new()))
        .unwrap();
    assert!(wait_for_state(&manager, &ok, ProcessState::Finished).await);

    match manager.shutdown(Duration::from_millis(200)).await {
        Err(ManagerError::ShutdownIncomplete { unfinished }) => {
            let ids: Vec<_> = unfinished.iter().map(|u| u.id.clone()).collect();
            assert_eq!(ids, vec![hung.clone()]);
        }
        other => panic!("Expected ShutdownIncomplete, got {:?}", other),
    }
    assert_eq!(syncer.call_count(&hung, SyncPhase::Terminating), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_at_most_one_call_in_flight_per_process() {
    let syncer = MockSyncer::new();
    let (manager, _sink) = create_test_manager(syncer.clone(), create_test_config());
    let slow = || {
        MockConfig::healthy("slow")
            .with_sync(MockBehavior::Slow(Duration::from_millis(2)))
            .with_terminating(MockBehavior::Slow(Duration::from_millis(2)))
    };

    let ids: Vec<_> = (0..20).map(|i| pid(&format!("p{}", i))).collect();
    for id in &ids {
        manager
            .update_process(ProcessUpdate::create(id.clone(), slow()))
            .unwrap();
    }

    let mut hammers = Vec::new();
    for t in 0..4 {
        let manager = manager.clone();
        let ids = ids.clone();
        hammers.push(tokio::spawn(async move {
            for round in 0..50 {
                for id in &ids {
                    let update = if (round + t) % 3 == 0 {
                        ProcessUpdate::sync(id.clone())
                    } else {
                        ProcessUpdate::update(
                            id.clone(),
                            MockConfig::healthy(format!("r{}", round))
                                .with_sync(MockBehavior::Slow(Duration::from_millis(1))),
                        )
                    };
                    manager.update_process(update).unwrap();
                }
                tokio::task::yield_now().await;
            }
        }));
    }
    for hammer in hammers {
        hammer.await.unwrap();
    }

    // Terminate half of them mid-flight, with shrinking grace periods.
    for id in ids.iter().step_by(2) {
        for grace in [30, 10, 2] {
            manager
                .update_process(ProcessUpdate::terminate(
                    id.clone(),
                    TerminateOptions::new().with_grace_period_secs(grace),
                ))
                .unwrap();
        }
    }
    for id in ids.iter().step_by(2) {
        assert!(wait_for_state(&manager, id, ProcessState::Finished).await);
    }

    manager.shutdown(WAIT).await.unwrap();

    assert!(!syncer.calls().is_empty());
    assert_eq!(syncer.max_concurrency_any(), 1);
}
