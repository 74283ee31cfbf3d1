use chrono::Utc;
use flowdb_core::retention::IfaceState;
use flowdb_core::storage::{FlowDb, StorageConfig};
use flowdb_core::{Counters, FlowError, FlowRecord, Timestamp};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

const DAY: Timestamp = 86_400;
const T0: Timestamp = 19_000 * DAY;
const T1: Timestamp = T0 + DAY;

fn open(path: &Path) -> FlowDb {
    FlowDb::create(StorageConfig {
        db_path: path.to_path_buf(),
        lock_timeout: Duration::from_secs(2),
    })
    .unwrap()
}

/// `n` flows of 100 bytes each
fn flows(n: usize) -> Vec<FlowRecord> {
    (0..n)
        .map(|i| {
            FlowRecord::new(
                format!("10.0.0.{}", i + 1).parse().unwrap(),
                "192.168.0.1".parse().unwrap(),
                443,
                6,
                Counters::new(1, 1, 60, 40),
            )
        })
        .collect()
}

#[test]
fn test_clean_scenario() {
    let temp_dir = TempDir::new().unwrap();
    let db = open(temp_dir.path());
    let writer = db.writer();
    writer.write_block("eth0", T0, &flows(10)).unwrap();
    writer.write_block("eth0", T1, &flows(5)).unwrap();

    let summary = db.ledger().read().unwrap();
    let eth0 = summary.get("eth0").unwrap();
    assert_eq!((eth0.flow_count, eth0.traffic, eth0.begin), (15, 1500, T0));

    let report = db.clean(T1).unwrap();
    assert_eq!(report.partitions_removed(), 1);
    assert!(!temp_dir.path().join("eth0").join(T0.to_string()).exists());
    assert!(temp_dir.path().join("eth0").join(T1.to_string()).exists());

    let summary = db.ledger().read().unwrap();
    let eth0 = summary.get("eth0").unwrap();
    assert_eq!((eth0.flow_count, eth0.traffic, eth0.begin), (5, 500, T1));

    let report = db.clean(T1 + DAY + 1).unwrap();
    assert_eq!(report.gone().collect::<Vec<_>>(), vec!["eth0"]);
    assert_eq!(report.interfaces["eth0"].state, IfaceState::AllStale);
    assert!(!temp_dir.path().join("eth0").exists());
    assert!(db.ledger().read().unwrap().get("eth0").is_none());
}

#[test]
fn test_clean_leaves_foreign_directories() {
    let temp_dir = TempDir::new().unwrap();
    let db = open(temp_dir.path());
    db.writer().write_block("eth0", T0, &flows(3)).unwrap();
    db.writer().write_block("eth1", T0, &flows(2)).unwrap();
    let iface = temp_dir.path().join("eth0");
    fs::create_dir(iface.join("notANumber")).unwrap();
    fs::create_dir(iface.join("007")).unwrap();

    let report = db.clean(T1 + DAY).unwrap();
    let eth0 = report.interfaces["eth0"];
    assert_eq!(eth0.partitions_removed, 1);
    assert_eq!(eth0.state, IfaceState::HasForeignOrRetained);
    assert!(iface.join("notANumber").is_dir());
    assert!(iface.join("007").is_dir());
    assert!(!iface.join(T0.to_string()).exists());

    // Without foreign entries the whole directory goes
    assert_eq!(report.interfaces["eth1"].state, IfaceState::AllStale);
    assert!(!temp_dir.path().join("eth1").exists());

    // No retained partition is left, so both drop out of the summary
    assert!(db.ledger().read().unwrap().interfaces.is_empty());
}

#[test]
fn test_future_cutoff_touches_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let db = open(temp_dir.path());
    db.writer().write_block("eth0", T0, &flows(1)).unwrap();
    let before = fs::read(db.ledger().path()).unwrap();

    let now = Utc::now().timestamp();
    for cutoff in [now + 10, now + 365 * DAY] {
        assert!(db.clean(cutoff).unwrap_err().is_validation());
    }
    assert!(temp_dir.path().join("eth0").join(T0.to_string()).is_dir());
    assert_eq!(fs::read(db.ledger().path()).unwrap(), before);
}

#[test]
fn test_clean_with_earliest_cutoff_removes_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let db = open(temp_dir.path());
    db.writer().write_block("eth0", T0, &flows(2)).unwrap();

    let report = db.clean(Timestamp::MIN).unwrap();
    assert_eq!(report.partitions_removed(), 0);
    assert!(temp_dir.path().join("eth0").join(T0.to_string()).is_dir());
    assert_eq!(db.ledger().read().unwrap().get("eth0").unwrap().flow_count, 2);
}

#[test]
fn test_clean_missing_database() {
    let temp_dir = TempDir::new().unwrap();
    let db = open(temp_dir.path());
    fs::remove_dir_all(temp_dir.path()).unwrap();
    assert!(matches!(db.clean(T0), Err(FlowError::NotFound(_))));
}

#[test]
fn test_wipe_removes_all_directories() {
    let temp_dir = TempDir::new().unwrap();
    let db = open(temp_dir.path());
    for iface in ["eth0", "eth1", "t4_33760"] {
        db.writer().write_block(iface, T0, &flows(2)).unwrap();
    }
    fs::create_dir(temp_dir.path().join("scratch")).unwrap();
    fs::write(temp_dir.path().join("notes.txt"), b"keep me").unwrap();

    // Retention alone does not touch the summary
    assert_eq!(db.retention().wipe().unwrap(), 4);
    assert_eq!(db.ledger().read().unwrap().interfaces.len(), 3);

    let dirs = fs::read_dir(temp_dir.path())
        .unwrap()
        .filter(|e| e.as_ref().unwrap().file_type().unwrap().is_dir())
        .count();
    assert_eq!(dirs, 0);
    assert_eq!(fs::read(temp_dir.path().join("notes.txt")).unwrap(), b"keep me");

    // The database-level wipe also resets the summary
    db.writer().write_block("eth0", T1, &flows(1)).unwrap();
    assert_eq!(db.wipe().unwrap(), 1);
    assert!(db.ledger().read().unwrap().interfaces.is_empty());
    assert!(temp_dir.path().join("notes.txt").exists());
}
