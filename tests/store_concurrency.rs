use std::collections::HashSet;
use std::sync::{Arc, Barrier};

use pothole_witness::{
    DetectionStore, GeoPoint, InMemoryDetectionStore, NewDetection, Severity,
    SqliteDetectionStore,
};

const WRITERS: usize = 16;
const PER_WRITER: usize = 5;

fn detection(i: usize) -> NewDetection {
    NewDetection {
        location: Some(GeoPoint::new(10.0 + i as f64 * 0.001, 20.0).expect("valid point")),
        severity: Severity::Medium,
        area_m2: 0.15,
        depth_meters: 0.125,
        image_path: format!("uploads/pothole_{}.jpg", i),
        confidence: 0.75,
    }
}

fn hammer(store: Arc<dyn DetectionStore>) {
    let barrier = Arc::new(Barrier::new(WRITERS));
    let handles: Vec<_> = (0..WRITERS)
        .map(|w| {
            let store = store.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                let mut ids = Vec::new();
                for i in 0..PER_WRITER {
                    let record = store
                        .create(detection(w * PER_WRITER + i))
                        .expect("create detection");
                    ids.push(record.id);
                }
                ids
            })
        })
        .collect();

    let mut all = Vec::new();
    for handle in handles {
        let ids = handle.join().expect("writer thread");
        // Each writer observes its own creations in increasing order.
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
        all.extend(ids);
    }

    let unique: HashSet<i64> = all.iter().copied().collect();
    assert_eq!(unique.len(), WRITERS * PER_WRITER, "duplicate identities");

    let listed = store.list_all().expect("list");
    assert_eq!(listed.len(), WRITERS * PER_WRITER);
    // Newest first, and identity order agrees with timestamp order.
    for pair in listed.windows(2) {
        assert!(pair[0].timestamp_ms >= pair[1].timestamp_ms);
        assert!(pair[0].id > pair[1].id);
    }
}

#[test]
fn sqlite_parallel_creates_get_unique_increasing_ids() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("potholes.db");
    let store = SqliteDetectionStore::open(&path.to_string_lossy()).expect("open store");
    hammer(Arc::new(store));
}

#[test]
fn in_memory_parallel_creates_get_unique_increasing_ids() {
    hammer(Arc::new(InMemoryDetectionStore::new()));
}
