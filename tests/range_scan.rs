//! Range-cursor scenarios: positioning, bounds, batching, and cleanup.

use tempfile::tempdir;

use emberdb::store::{OpenOptions, RangeOptions, Store, TableSchema};

fn open_store(dir: &std::path::Path) -> Store {
    Store::open(dir, &OpenOptions::new().create(true)).expect("failed to open store")
}

fn collect_str(cursor: &mut emberdb::store::StrRangeCursor) -> Vec<String> {
    let mut keys = Vec::new();
    while cursor.next() {
        let (key, _) = cursor.current().unwrap();
        keys.push(key);
    }
    assert!(cursor.err().is_none(), "cursor latched: {:?}", cursor.err());
    keys
}

#[test]
fn test_lexicographic_order() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path());
    store.create_table("words", TableSchema::string()).unwrap();
    for key in ["zebra", "alpha", "beta", "charlie", "delta"] {
        store.put_str("words", key, "v").unwrap();
    }

    let mut cursor = store.scan_range_str("words", "", "").unwrap();
    let keys = collect_str(&mut cursor);
    cursor.close().unwrap();
    assert_eq!(keys, vec!["alpha", "beta", "charlie", "delta", "zebra"]);
}

#[test]
fn test_bounded_string_range() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path());
    store.create_table("fruit", TableSchema::string()).unwrap();
    for key in [
        "apple",
        "banana",
        "cherry",
        "date",
        "elderberry",
        "fig",
        "grape",
    ] {
        store.put_str("fruit", key, "v").unwrap();
    }

    let mut cursor = store.scan_range_str("fruit", "c", "g").unwrap();
    let keys = collect_str(&mut cursor);
    cursor.close().unwrap();
    assert_eq!(keys, vec!["cherry", "date", "elderberry", "fig"]);
}

#[test]
fn test_empty_table_yields_nothing() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path());
    store.create_table("t", TableSchema::binary()).unwrap();

    let mut cursor = store.scan_range("t", b"", b"").unwrap();
    assert!(!cursor.next());
    assert!(!cursor.next());
    assert!(cursor.err().is_none());
    cursor.close().unwrap();
}

#[test]
fn test_start_included_end_excluded() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path());
    store.create_table("t", TableSchema::binary()).unwrap();
    for key in [b"a", b"b", b"c"] {
        store.put_bin("t", key, b"v").unwrap();
    }

    // Keys equal to start are included, keys equal to end are excluded.
    let mut cursor = store.scan_range("t", b"a", b"c").unwrap();
    let mut keys = Vec::new();
    while cursor.next() {
        keys.push(cursor.current().unwrap().0);
    }
    cursor.close().unwrap();
    assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
}

#[test]
fn test_equal_bounds_yield_empty_cursor() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path());
    store.create_table("t", TableSchema::binary()).unwrap();
    store.put_bin("t", b"k", b"v").unwrap();

    let mut cursor = store.scan_range("t", b"k", b"k").unwrap();
    assert!(!cursor.next());
    assert!(cursor.err().is_none());
    cursor.close().unwrap();
}

#[test]
fn test_single_record_half_open_interval() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path());
    store.create_table("t", TableSchema::binary()).unwrap();
    store.put_bin("t", b"k", b"v").unwrap();

    // [k, k+1) yields exactly the one record.
    let mut cursor = store.scan_range("t", b"k", b"l").unwrap();
    assert!(cursor.next());
    assert_eq!(cursor.current().unwrap().0, b"k".to_vec());
    assert!(!cursor.next());
    cursor.close().unwrap();
}

#[test]
fn test_start_key_absent_positions_at_next() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path());
    store.create_table("t", TableSchema::binary()).unwrap();
    for key in [b"b", b"d", b"f"] {
        store.put_bin("t", key, b"v").unwrap();
    }

    let mut cursor = store.scan_range("t", b"c", b"").unwrap();
    let mut keys = Vec::new();
    while cursor.next() {
        keys.push(cursor.current().unwrap().0);
    }
    cursor.close().unwrap();
    assert_eq!(keys, vec![b"d".to_vec(), b"f".to_vec()]);
}

#[test]
fn test_batch_boundary_no_skip_no_duplicate() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path());
    store.create_table("t", TableSchema::binary()).unwrap();
    // Exactly B + 1 records for B = 5 forces two batches.
    for i in 0..6u32 {
        store.put_bin("t", &i.to_be_bytes(), b"v").unwrap();
    }

    let opts = RangeOptions {
        batch_records: 5,
        ..Default::default()
    };
    let mut cursor = store.scan_range_with("t", b"", b"", opts).unwrap();
    let mut keys = Vec::new();
    while cursor.next() {
        keys.push(cursor.current().unwrap().0);
    }
    cursor.close().unwrap();

    let expected: Vec<Vec<u8>> = (0..6u32).map(|i| i.to_be_bytes().to_vec()).collect();
    assert_eq!(keys, expected);
}

#[test]
fn test_default_batch_boundary() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path());
    store.create_table("t", TableSchema::binary()).unwrap();
    // One record past the default batch size of 1000.
    for i in 0..1001u32 {
        store.put_bin("t", &i.to_be_bytes(), b"v").unwrap();
    }

    let mut cursor = store.scan_range("t", b"", b"").unwrap();
    let mut count = 0usize;
    let mut prev: Option<Vec<u8>> = None;
    while cursor.next() {
        let (key, _) = cursor.current().unwrap();
        if let Some(p) = &prev {
            assert!(*p < key, "keys out of order");
        }
        prev = Some(key);
        count += 1;
    }
    cursor.close().unwrap();
    assert_eq!(count, 1001);
}

#[test]
fn test_byte_cap_splits_batches() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path());
    store.create_table("t", TableSchema::binary()).unwrap();
    let big = vec![0xABu8; 1024];
    for i in 0..10u32 {
        store.put_bin("t", &i.to_be_bytes(), &big).unwrap();
    }

    // Each record is ~1 KiB; a 2 KiB cap forces several fetches.
    let opts = RangeOptions {
        batch_records: 1000,
        batch_bytes: 2048,
    };
    let mut cursor = store.scan_range_with("t", b"", b"", opts).unwrap();
    let mut count = 0usize;
    while cursor.next() {
        let (_, value) = cursor.current().unwrap();
        assert_eq!(value.len(), 1024);
        count += 1;
    }
    cursor.close().unwrap();
    assert_eq!(count, 10);
}

#[test]
fn test_owned_records_survive_advance_and_close() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path());
    store.create_table("t", TableSchema::binary()).unwrap();
    store.put_bin("t", b"a", b"1").unwrap();
    store.put_bin("t", b"b", b"2").unwrap();

    let mut cursor = store.scan_range("t", b"", b"").unwrap();
    assert!(cursor.next());
    let (first_key, first_val) = cursor.current().unwrap();
    assert!(cursor.next());
    cursor.close().unwrap();

    // Copies taken before the advance are untouched by it.
    assert_eq!(first_key, b"a".to_vec());
    assert_eq!(first_val, b"1".to_vec());
}

#[test]
fn test_cursor_cleanup_under_injected_error() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path());
    store.create_table("t", TableSchema::binary()).unwrap();
    for i in 0..1000u32 {
        store.put_bin("t", &i.to_be_bytes(), b"v").unwrap();
    }

    let mut cursor = store.scan_range("t", b"", b"").unwrap();
    for _ in 0..499 {
        assert!(cursor.next());
    }
    // The 500th step hits an engine failure.
    cursor.inject_fault("synthetic engine failure");
    assert!(!cursor.next());
    assert!(!cursor.valid());
    assert!(cursor.err().is_some());
    // Close still runs to completion, and stays idempotent.
    cursor.close().unwrap();
    cursor.close().unwrap();
}

#[test]
fn test_closed_cursor_rejects_use() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path());
    store.create_table("t", TableSchema::binary()).unwrap();
    store.put_bin("t", b"a", b"1").unwrap();

    let mut cursor = store.scan_range("t", b"", b"").unwrap();
    cursor.close().unwrap();
    assert!(!cursor.next());
    assert!(cursor.current().is_err());
    cursor.close().unwrap();
}

#[test]
fn test_string_cursor_requires_string_table() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path());
    store.create_table("bin", TableSchema::binary()).unwrap();
    assert!(store.scan_range_str("bin", "", "").is_err());
}
