//! Multi-instance lifecycle integration tests
//!
//! Drives several simulated application processes against one shared
//! registry session using the in-process IPC backend. Each `connect()` is a
//! distinct "process" with its own id; `terminate()` simulates a crash so
//! liveness reclamation can be observed.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use applifecycle::activation::PAYLOAD_CAPACITY;
use applifecycle::platform::local_ipc::LocalIpc;
use applifecycle::{ActivationArguments, AppLifecycleError, InstanceRegistry};

/// Start a fresh shared session and one registered "process" on it
fn first_session() -> (Arc<LocalIpc>, Arc<InstanceRegistry>) {
    let backend = Arc::new(LocalIpc::new());
    // The unsizing cast is load-bearing: without it `Arc::clone` infers the
    // trait-object type and fails to accept `&Arc<LocalIpc>`
    let registry = InstanceRegistry::new(Arc::clone(&backend) as _).unwrap();
    (backend, registry)
}

/// Register another simulated process on an existing session
fn join_session(backend: &Arc<LocalIpc>) -> (Arc<LocalIpc>, Arc<InstanceRegistry>) {
    let joined = Arc::new(backend.connect());
    let registry = InstanceRegistry::new(Arc::clone(&joined) as _).unwrap();
    (joined, registry)
}

#[test]
fn second_process_observes_existing_owner() {
    let (backend, owner) = first_session();
    let owner_handle = owner.find_or_register_for_key("app1").unwrap();
    assert!(owner_handle.is_current());

    let (_b2, secondary) = join_session(&backend);
    let found = secondary.find_or_register_for_key("app1").unwrap();

    assert!(!found.is_current());
    assert_eq!(found.process_id(), owner.process_id());
    assert_eq!(found.key(), "app1");
}

#[test]
fn redirection_delivers_args_exactly_once() {
    let (backend, owner) = first_session();
    let owner_handle = owner.find_or_register_for_key("app1").unwrap();

    let (tx, rx) = crossbeam_channel::unbounded();
    owner_handle.on_activated(Arc::new(move |args: &ActivationArguments| {
        tx.send(args.clone()).unwrap();
    }));

    let (_b2, secondary) = join_session(&backend);
    let target = secondary.find_or_register_for_key("app1").unwrap();
    assert!(!target.is_current());

    let sent = ActivationArguments::Launch {
        command_line: "app.exe /open doc.txt".to_string(),
    };
    target.redirect_to(&sent).unwrap();

    let received = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(received, sent);

    // Exactly once: no second event arrives for a single redirect
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn sequential_redirections_arrive_in_order() {
    let (backend, owner) = first_session();
    let owner_handle = owner.find_or_register_for_key("app1").unwrap();

    let (tx, rx) = crossbeam_channel::unbounded();
    owner_handle.on_activated(Arc::new(move |args: &ActivationArguments| {
        tx.send(args.clone()).unwrap();
    }));

    let (_b2, secondary) = join_session(&backend);
    let target = secondary.find_or_register_for_key("app1").unwrap();

    let first = ActivationArguments::Protocol {
        uri: "myapp://one".to_string(),
    };
    target.redirect_to(&first).unwrap();
    assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), first);

    // The mailbox was drained, so a later message is delivered intact
    let second = ActivationArguments::Protocol {
        uri: "myapp://two".to_string(),
    };
    target.redirect_to(&second).unwrap();
    assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), second);
}

#[test]
fn unregister_transfers_ownership() {
    let (backend, first) = first_session();
    let first_handle = first.find_or_register_for_key("app1").unwrap();
    assert!(first_handle.is_current());

    first_handle.unregister_key("app1").unwrap();

    let (_b2, second) = join_session(&backend);
    let second_handle = second.find_or_register_for_key("app1").unwrap();
    assert!(second_handle.is_current());
    assert_eq!(second_handle.process_id(), second.process_id());
}

#[test]
fn terminated_owner_is_reclaimed() {
    let (backend, doomed) = first_session();
    doomed.find_or_register_for_key("app1").unwrap();
    let doomed_pid = doomed.process_id();

    // Simulated crash: the process disappears but its record stays behind
    backend.terminate(doomed_pid);

    let (_b2, survivor) = join_session(&backend);

    // The stale record is never counted in the enumeration...
    let instances = survivor.instances().unwrap();
    assert!(instances.iter().all(|i| i.process_id() != doomed_pid));

    // ...and never returned as a key match: the new caller takes over
    let handle = survivor.find_or_register_for_key("app1").unwrap();
    assert!(handle.is_current());
    assert_eq!(handle.process_id(), survivor.process_id());
}

#[test]
fn redirect_to_terminated_owner_is_benign() {
    let (backend, doomed) = first_session();
    doomed.find_or_register_for_key("app1").unwrap();

    let (_b2, sender) = join_session(&backend);
    let target = sender.find_or_register_for_key("app1").unwrap();

    // The owner dies between lookup and signal
    backend.terminate(doomed.process_id());

    // Fire-and-forget: no error reaches the sender
    let args = ActivationArguments::Launch {
        command_line: "late".to_string(),
    };
    target.redirect_to(&args).unwrap();
}

#[test]
fn oversized_payload_fails_before_touching_the_mailbox() {
    let (backend, owner) = first_session();
    let owner_handle = owner.find_or_register_for_key("app1").unwrap();

    let (tx, rx) = crossbeam_channel::unbounded();
    owner_handle.on_activated(Arc::new(move |args: &ActivationArguments| {
        tx.send(args.clone()).unwrap();
    }));

    let (_b2, secondary) = join_session(&backend);
    let target = secondary.find_or_register_for_key("app1").unwrap();

    let oversized = ActivationArguments::Protocol {
        uri: format!("myapp://{}", "x".repeat(2 * PAYLOAD_CAPACITY)),
    };
    let err = target.redirect_to(&oversized).unwrap_err();
    assert!(matches!(err, AppLifecycleError::PayloadTooLarge { .. }));

    // Nothing was written and nothing signaled: the owner sees no event
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

    // The mailbox is fully usable afterwards
    let fitting = ActivationArguments::Launch {
        command_line: "small".to_string(),
    };
    target.redirect_to(&fitting).unwrap();
    assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), fitting);
}

#[test]
fn invalid_keys_are_rejected_without_registration() {
    let (_backend, registry) = first_session();

    assert!(matches!(
        registry.find_or_register_for_key(""),
        Err(AppLifecycleError::InvalidKey(_))
    ));
    assert!(matches!(
        registry.find_or_register_for_key(&"k".repeat(255)),
        Err(AppLifecycleError::KeyTooLong { length: 255 })
    ));

    // Neither attempt registered anything
    let instances = registry.instances().unwrap();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].key(), "");
}

#[test]
fn concurrent_registration_elects_exactly_one_owner() {
    let (backend, first) = first_session();

    // Keep every simulated process alive for the duration of the race;
    // a dropped registry would look like a crashed owner
    let mut registries = vec![first];
    let mut backends = vec![backend];
    for _ in 0..7 {
        let (joined, registry) = join_session(&backends[0]);
        backends.push(joined);
        registries.push(registry);
    }

    let handles: Vec<_> = registries
        .iter()
        .map(|registry| {
            let registry = Arc::clone(registry);
            thread::spawn(move || registry.find_or_register_for_key("race").unwrap())
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let winners: Vec<_> = results.iter().filter(|r| r.is_current()).collect();
    assert_eq!(winners.len(), 1, "exactly one process may win the key");

    let winner_pid = winners[0].process_id();
    for result in &results {
        assert_eq!(
            result.process_id(),
            winner_pid,
            "losers must reference the winner"
        );
    }
}

#[test]
fn enumeration_lists_each_live_process_once() {
    let (backend, first) = first_session();
    let (_b2, second) = join_session(&backend);
    let (_b3, third) = join_session(&backend);

    second.find_or_register_for_key("keyed").unwrap();

    let instances = first.instances().unwrap();
    assert_eq!(instances.len(), 3);

    let mut pids: Vec<u32> = instances.iter().map(applifecycle::AppInstance::process_id).collect();
    pids.sort_unstable();
    pids.dedup();
    assert_eq!(pids.len(), 3, "no two handles may share a process id");

    let keyed: Vec<_> = instances.iter().filter(|i| i.key() == "keyed").collect();
    assert_eq!(keyed.len(), 1);
    assert_eq!(keyed[0].process_id(), second.process_id());

    // Exactly one handle is current from each process's point of view
    assert_eq!(instances.iter().filter(|i| i.is_current()).count(), 1);
    assert!(
        third
            .instances()
            .unwrap()
            .iter()
            .any(|i| i.is_current() && i.process_id() == third.process_id())
    );
}

#[test]
fn startup_args_are_independent_of_redirection() {
    let (backend, owner) = first_session();
    let owner_handle = owner.find_or_register_for_key("app1").unwrap();
    let before = owner_handle.activated_event_args();

    let (tx, rx) = crossbeam_channel::unbounded();
    owner_handle.on_activated(Arc::new(move |args: &ActivationArguments| {
        tx.send(args.clone()).unwrap();
    }));

    let (_b2, secondary) = join_session(&backend);
    let target = secondary.find_or_register_for_key("app1").unwrap();
    target
        .redirect_to(&ActivationArguments::Protocol {
            uri: "myapp://ping".to_string(),
        })
        .unwrap();
    rx.recv_timeout(Duration::from_secs(2)).unwrap();

    // The process's own startup activation is unchanged by the redirect
    assert_eq!(owner_handle.activated_event_args(), before);
}

#[test]
fn removed_observer_receives_nothing() {
    let (backend, owner) = first_session();
    let owner_handle = owner.find_or_register_for_key("app1").unwrap();

    let (tx, rx) = crossbeam_channel::unbounded();
    let token = owner_handle.on_activated(Arc::new(move |args: &ActivationArguments| {
        tx.send(args.clone()).unwrap();
    }));
    owner_handle.remove_activated(token);

    let (_b2, secondary) = join_session(&backend);
    let target = secondary.find_or_register_for_key("app1").unwrap();
    target
        .redirect_to(&ActivationArguments::Launch {
            command_line: "unheard".to_string(),
        })
        .unwrap();

    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
}
