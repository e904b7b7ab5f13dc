//! Create / open / remove lifecycle through the public service

mod support;

use parking_lot::Mutex;
use shmseg::{HEADER_SIZE, ShmError};
use std::sync::Arc;
use std::thread;
use support::{Cleanup, service, unique_key};
use tracing_subscriber::layer::SubscriberExt;

#[test]
fn test_create_then_open_sizes_and_zeroing() {
    let shm = service();
    for length in [0usize, 1, 64, 4095, 4096, 70_000] {
        let key = unique_key("sizes");
        let _cleanup = Cleanup {
            shm: &shm,
            key: key.clone(),
        };

        let created = shm.create(&key, length).unwrap();
        assert_eq!(created.len(), length);
        assert!(created.to_vec().iter().all(|&b| b == 0));

        let opened = shm.open(&key).unwrap();
        assert_eq!(opened.len(), length, "open length for {length}");
        assert!(opened.to_vec().iter().all(|&b| b == 0));
        assert!(opened.manager().mapped_len() >= HEADER_SIZE + length);
    }
}

#[test]
fn test_remove_is_idempotent() {
    let shm = service();
    let key = unique_key("remove");

    let view = shm.create(&key, 32).unwrap();
    assert!(shm.remove(&key).unwrap());
    // A Windows mapping object stays bound to its name while any view is open.
    #[cfg(unix)]
    assert!(!shm.remove(&key).unwrap());

    // The live mapping survives removal of the name.
    view.write_at(0, &[1, 2, 3]).unwrap();
    assert_eq!(&view.to_vec()[..3], &[1, 2, 3]);

    drop(view);
    assert!(!shm.remove(&key).unwrap());
}

#[test]
fn test_remove_never_created() {
    let shm = service();
    assert!(!shm.remove(&unique_key("never")).unwrap());
}

#[test]
fn test_open_missing_asks_to_create() {
    let shm = service();
    let err = shm.open(&unique_key("missing")).unwrap_err();
    assert!(matches!(err, ShmError::SegmentNotFound { .. }));
    assert!(err.to_string().contains("create it first"));
}

#[test]
fn test_cross_mapping_coherence() {
    let shm = service();
    let key = unique_key("coherence");
    let _cleanup = Cleanup {
        shm: &shm,
        key: key.clone(),
    };

    let writer = shm.create(&key, 256).unwrap();
    let reader = shm.open(&key).unwrap();
    assert_ne!(writer.as_ptr(), reader.as_ptr());

    writer.write_at(10, b"shared").unwrap();
    let mut buf = [0u8; 6];
    reader.read_at(10, &mut buf).unwrap();
    assert_eq!(&buf, b"shared");

    reader.write_at(255, &[0x7F]).unwrap();
    assert_eq!(writer.to_vec()[255], 0x7F);
}

#[test]
fn test_recreate_supersedes_previous_object() {
    let shm = service();
    let key = unique_key("recreate");
    let _cleanup = Cleanup {
        shm: &shm,
        key: key.clone(),
    };

    let first = shm.create(&key, 128).unwrap();
    first.fill(0xAA);
    drop(first);

    let second = shm.create(&key, 16).unwrap();
    assert_eq!(second.len(), 16);
    assert!(second.to_vec().iter().all(|&b| b == 0));

    let opened = shm.open(&key).unwrap();
    assert_eq!(opened.len(), 16);
}

#[cfg(unix)]
#[test]
fn test_recreate_while_old_view_alive() {
    let shm = service();
    let key = unique_key("recreate_live");
    let _cleanup = Cleanup {
        shm: &shm,
        key: key.clone(),
    };

    let old = shm.create(&key, 64).unwrap();
    old.fill(0xEE);

    let new = shm.create(&key, 8).unwrap();
    assert_eq!(new.len(), 8);
    assert!(new.to_vec().iter().all(|&b| b == 0));
    assert_eq!(shm.resolve(&key), std::ptr::NonNull::new(new.as_ptr()));

    // The old view keeps its own, now unlinked, object.
    assert_eq!(old.to_vec(), vec![0xEE; 64]);
    drop(old);
    assert_eq!(shm.resolve(&key), std::ptr::NonNull::new(new.as_ptr()));
    assert_eq!(shm.open(&key).unwrap().len(), 8);
}

#[test]
fn test_example_scenario() {
    let shm = service();
    let key = unique_key("buf-a");

    let view = shm.create(&key, 64).unwrap();
    assert_eq!(view.to_vec(), vec![0u8; 64]);
    view.write_at(0, &[0xFF]).unwrap();

    let opened = shm.open(&key).unwrap();
    assert_eq!(opened.len(), 64);
    assert_eq!(opened.to_vec()[0], 0xFF);

    assert!(shm.remove(&key).unwrap());
    drop((view, opened));
    assert!(shm.open(&key).unwrap_err().is_not_found());
}

#[test]
fn test_concurrent_create_remove_never_exposes_headerless_region() {
    const LEN: usize = 48;
    let shm = Arc::new(service());
    let key = unique_key("race");

    let creator = {
        let shm = Arc::clone(&shm);
        let key = key.clone();
        thread::spawn(move || {
            for _ in 0..40 {
                if let Ok(view) = shm.create(&key, LEN) {
                    assert_eq!(view.len(), LEN);
                }
            }
        })
    };
    let remover = {
        let shm = Arc::clone(&shm);
        let key = key.clone();
        thread::spawn(move || {
            for _ in 0..40 {
                let _ = shm.remove(&key);
            }
        })
    };

    let mut opened = 0;
    for _ in 0..40 {
        if let Ok(view) = shm.open(&key) {
            assert_eq!(view.len(), LEN);
            assert_eq!(view.format_version(), common::consts::FORMAT_VERSION);
            opened += 1;
        }
    }

    creator.join().unwrap();
    remover.join().unwrap();
    let _ = shm.remove(&key);
    assert!(opened <= 40);
    assert!(shm.registry().is_empty());
}

#[test]
fn test_diagnostics_sink_receives_lifecycle_events() {
    let shm = service();
    let key = unique_key("diag");
    let lines = Arc::new(Mutex::new(Vec::<String>::new()));
    let out = Arc::clone(&lines);
    shm.set_diagnostics_sink(move |line| out.lock().push(line.to_string()));

    let subscriber = tracing_subscriber::registry().with(shm.diagnostics().clone());
    tracing::subscriber::with_default(subscriber, || {
        let view = shm.create(&key, 8).unwrap();
        drop(view);
        assert!(shm.remove(&key).unwrap());
    });

    let lines = lines.lock();
    assert!(
        lines
            .iter()
            .any(|l| l.starts_with("INFO ") && l.contains("segment mapped") && l.contains(&key)),
        "{lines:?}"
    );
    assert!(lines.iter().any(|l| l.contains("segment remove")));

    shm.clear_diagnostics_sink();
    assert!(!shm.diagnostics().is_attached());
}
