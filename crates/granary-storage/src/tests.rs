//! Unit tests for trunk storage backends.

use granary_types::TrunkId;
use tempfile::tempdir;

use crate::meta::{StreamMeta, META_SIZE};
use crate::{LocalStorage, MemStorage, StorageError, TrunkStorage};

// ============================================================================
// Meta Record
// ============================================================================

#[test]
fn meta_roundtrip() {
    let meta = StreamMeta {
        trunk_count: 7,
        last_trunk_len: 4096,
        trunk_size: 1 << 25,
        trunks_per_file: 4,
    };
    let decoded = StreamMeta::decode(&meta.encode()).unwrap();
    assert_eq!(decoded.trunk_count, 7);
    assert_eq!(decoded.last_trunk_len, 4096);
    assert_eq!(decoded.trunk_size, 1 << 25);
    assert_eq!(decoded.trunks_per_file, 4);
}

#[test]
fn meta_new_starts_with_one_empty_trunk() {
    let meta = StreamMeta::new(64, 2);
    assert_eq!(meta.trunk_count, 1);
    assert_eq!(meta.last_trunk_len, 0);
}

#[test]
fn meta_rejects_bad_magic() {
    let mut encoded = StreamMeta::new(64, 1).encode();
    encoded[0] = b'X';
    // Magic is checksummed, so the corruption shows up as a bad CRC first.
    assert!(matches!(
        StreamMeta::decode(&encoded),
        Err(StorageError::ChecksumMismatch { .. })
    ));
}

#[test]
fn meta_rejects_unsupported_version() {
    let meta = StreamMeta::new(64, 1);
    let mut encoded = meta.encode();
    encoded[4] = 0xFF;
    // Recompute the CRC so version is the first check to fail.
    let crc = crc32fast::hash(&encoded[..META_SIZE - 4]);
    encoded[META_SIZE - 4..].copy_from_slice(&crc.to_le_bytes());
    assert!(matches!(
        StreamMeta::decode(&encoded),
        Err(StorageError::UnsupportedVersion(_))
    ));
}

#[test]
fn meta_rejects_corrupted_payload() {
    let mut encoded = StreamMeta::new(64, 1).encode();
    encoded[10] ^= 0x01;
    assert!(matches!(
        StreamMeta::decode(&encoded),
        Err(StorageError::ChecksumMismatch { .. })
    ));
}

#[test]
fn meta_rejects_truncation() {
    let encoded = StreamMeta::new(64, 1).encode();
    assert!(matches!(
        StreamMeta::decode(&encoded[..META_SIZE - 1]),
        Err(StorageError::TruncatedMeta { .. })
    ));
}

#[test]
fn meta_store_and_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("meta");
    let meta = StreamMeta {
        trunk_count: 3,
        last_trunk_len: 17,
        trunk_size: 64,
        trunks_per_file: 4,
    };
    meta.store(&path).unwrap();
    let loaded = StreamMeta::load(&path).unwrap();
    assert_eq!(loaded.trunk_count, 3);
    assert_eq!(loaded.last_trunk_len, 17);
}

// ============================================================================
// MemStorage
// ============================================================================

#[test]
fn mem_rejects_non_power_of_two() {
    assert!(matches!(
        MemStorage::new(100),
        Err(StorageError::NotPowerOfTwo(100))
    ));
}

#[test]
fn mem_starts_with_one_zeroed_trunk() {
    let storage = MemStorage::new(64).unwrap();
    assert_eq!(storage.trunk_count(), 1);
    assert_eq!(storage.last_trunk_len(), 0);
    let mut buf = vec![0xAAu8; 64];
    storage.read_trunk(TrunkId::new(0), &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 0));
}

#[test]
fn mem_rewrites_newest_and_extends() {
    let storage = MemStorage::new(64).unwrap();
    storage.write_trunk(TrunkId::new(0), &[1u8; 10]).unwrap();
    assert_eq!(storage.trunk_count(), 1);
    assert_eq!(storage.last_trunk_len(), 10);

    storage.write_trunk(TrunkId::new(0), &[2u8; 64]).unwrap();
    assert_eq!(storage.trunk_count(), 1);
    assert_eq!(storage.last_trunk_len(), 64);

    storage.write_trunk(TrunkId::new(1), &[3u8; 5]).unwrap();
    assert_eq!(storage.trunk_count(), 2);
    assert_eq!(storage.last_trunk_len(), 5);
}

#[test]
fn mem_rejects_non_sequential_write() {
    let storage = MemStorage::new(64).unwrap();
    assert!(matches!(
        storage.write_trunk(TrunkId::new(2), &[0u8; 4]),
        Err(StorageError::NonSequentialWrite { id: 2, count: 1 })
    ));
}

#[test]
fn mem_rejects_oversized_write() {
    let storage = MemStorage::new(64).unwrap();
    assert!(matches!(
        storage.write_trunk(TrunkId::new(0), &[0u8; 65]),
        Err(StorageError::TooLong { len: 65, .. })
    ));
}

#[test]
fn mem_keeps_stale_tail_on_shorter_rewrite() {
    let storage = MemStorage::new(64).unwrap();
    storage.write_trunk(TrunkId::new(0), &[7u8; 64]).unwrap();
    storage.write_trunk(TrunkId::new(0), &[9u8; 8]).unwrap();

    let mut buf = vec![0u8; 64];
    storage.read_trunk(TrunkId::new(0), &mut buf).unwrap();
    assert_eq!(&buf[..8], &[9u8; 8]);
    assert_eq!(&buf[8..], &[7u8; 56]);
}

#[test]
fn mem_read_out_of_range() {
    let storage = MemStorage::new(64).unwrap();
    let mut buf = vec![0u8; 64];
    assert!(matches!(
        storage.read_trunk(TrunkId::new(1), &mut buf),
        Err(StorageError::TrunkOutOfRange { id: 1, count: 1 })
    ));
}

#[test]
fn mem_read_at_checks_bounds() {
    let storage = MemStorage::new(64).unwrap();
    storage.write_trunk(TrunkId::new(0), &[5u8; 64]).unwrap();

    let mut buf = vec![0u8; 8];
    storage.read_at(TrunkId::new(0), 56, &mut buf).unwrap();
    assert_eq!(buf, [5u8; 8]);

    assert!(matches!(
        storage.read_at(TrunkId::new(0), 60, &mut buf),
        Err(StorageError::ReadBeyondTrunk { offset: 60, .. })
    ));
}

// ============================================================================
// LocalStorage
// ============================================================================

#[test]
fn local_rejects_non_power_of_two() {
    let dir = tempdir().unwrap();
    assert!(matches!(
        LocalStorage::writable(dir.path(), 100, 4),
        Err(StorageError::NotPowerOfTwo(100))
    ));
}

#[test]
fn local_rejects_zero_trunks_per_file() {
    let dir = tempdir().unwrap();
    assert!(matches!(
        LocalStorage::writable(dir.path(), 64, 0),
        Err(StorageError::ZeroTrunksPerFile)
    ));
}

#[test]
fn local_write_flush_reopen_read() {
    let dir = tempdir().unwrap();

    let storage = LocalStorage::writable(dir.path(), 64, 2).unwrap();
    storage.write_trunk(TrunkId::new(0), &[1u8; 64]).unwrap();
    storage.write_trunk(TrunkId::new(1), &[2u8; 64]).unwrap();
    storage.write_trunk(TrunkId::new(2), &[3u8; 20]).unwrap();
    assert_eq!(storage.trunk_count(), 3);
    assert_eq!(storage.last_trunk_len(), 20);
    storage.flush().unwrap();
    drop(storage);

    let storage = LocalStorage::read_only(dir.path()).unwrap();
    assert_eq!(storage.trunk_size(), 64);
    assert_eq!(storage.trunk_count(), 3);
    assert_eq!(storage.last_trunk_len(), 20);

    let mut buf = vec![0u8; 64];
    storage.read_trunk(TrunkId::new(1), &mut buf).unwrap();
    assert_eq!(buf, [2u8; 64]);

    let mut small = vec![0u8; 20];
    storage.read_at(TrunkId::new(2), 0, &mut small).unwrap();
    assert_eq!(small, [3u8; 20]);
}

#[test]
fn local_groups_trunks_into_block_files() {
    let dir = tempdir().unwrap();
    let storage = LocalStorage::writable(dir.path(), 64, 2).unwrap();
    for id in 0..3u32 {
        storage
            .write_trunk(TrunkId::new(id), &[id as u8; 64])
            .unwrap();
    }

    // Trunks 0 and 1 share 0.block; trunk 2 opens 1.block. Both files are
    // preallocated to trunk_size * trunks_per_file.
    let first = dir.path().join("0.block");
    let second = dir.path().join("1.block");
    assert_eq!(std::fs::metadata(&first).unwrap().len(), 128);
    assert_eq!(std::fs::metadata(&second).unwrap().len(), 128);

    let mut buf = vec![0u8; 64];
    storage.read_trunk(TrunkId::new(2), &mut buf).unwrap();
    assert_eq!(buf, [2u8; 64]);
}

#[test]
fn local_unflushed_writes_are_lost_on_reopen() {
    let dir = tempdir().unwrap();

    let storage = LocalStorage::writable(dir.path(), 64, 4).unwrap();
    storage.write_trunk(TrunkId::new(0), &[1u8; 64]).unwrap();
    storage.write_trunk(TrunkId::new(1), &[2u8; 10]).unwrap();
    drop(storage);

    // No flush: the meta record still describes the empty stream.
    let storage = LocalStorage::read_only(dir.path()).unwrap();
    assert_eq!(storage.trunk_count(), 1);
    assert_eq!(storage.last_trunk_len(), 0);
}

#[test]
fn local_resumes_after_flush() {
    let dir = tempdir().unwrap();

    let storage = LocalStorage::writable(dir.path(), 64, 4).unwrap();
    storage.write_trunk(TrunkId::new(0), &[1u8; 30]).unwrap();
    storage.flush().unwrap();
    drop(storage);

    let storage = LocalStorage::writable(dir.path(), 64, 4).unwrap();
    assert_eq!(storage.trunk_count(), 1);
    assert_eq!(storage.last_trunk_len(), 30);

    // The newest trunk keeps growing where it left off.
    storage.write_trunk(TrunkId::new(0), &[1u8; 50]).unwrap();
    assert_eq!(storage.last_trunk_len(), 50);
}

#[test]
fn local_rejects_geometry_mismatch() {
    let dir = tempdir().unwrap();
    let storage = LocalStorage::writable(dir.path(), 64, 4).unwrap();
    drop(storage);

    assert!(matches!(
        LocalStorage::writable(dir.path(), 128, 4),
        Err(StorageError::GeometryMismatch { .. })
    ));
    assert!(matches!(
        LocalStorage::writable(dir.path(), 64, 2),
        Err(StorageError::GeometryMismatch { .. })
    ));
}

#[test]
fn local_read_only_missing_stream() {
    let dir = tempdir().unwrap();
    assert!(matches!(
        LocalStorage::read_only(dir.path().join("nope")),
        Err(StorageError::NotFound { .. })
    ));
}

#[test]
fn local_second_writer_is_locked_out() {
    let dir = tempdir().unwrap();
    let _storage = LocalStorage::writable(dir.path(), 64, 4).unwrap();
    assert!(matches!(
        LocalStorage::writable(dir.path(), 64, 4),
        Err(StorageError::Locked { .. })
    ));
}

#[test]
fn local_readers_share_the_lock() {
    let dir = tempdir().unwrap();
    let storage = LocalStorage::writable(dir.path(), 64, 4).unwrap();
    storage.flush().unwrap();
    drop(storage);

    let a = LocalStorage::read_only(dir.path()).unwrap();
    let b = LocalStorage::read_only(dir.path()).unwrap();
    assert_eq!(a.trunk_count(), 1);
    assert_eq!(b.trunk_count(), 1);

    // A writer cannot open while readers hold the shared lock.
    assert!(matches!(
        LocalStorage::writable(dir.path(), 64, 4),
        Err(StorageError::Locked { .. })
    ));
}

#[test]
fn local_rejects_writes_when_read_only() {
    let dir = tempdir().unwrap();
    let storage = LocalStorage::writable(dir.path(), 64, 4).unwrap();
    storage.flush().unwrap();
    drop(storage);

    let storage = LocalStorage::read_only(dir.path()).unwrap();
    assert!(matches!(
        storage.write_trunk(TrunkId::new(0), &[0u8; 4]),
        Err(StorageError::ReadOnly)
    ));
    // Flushing a read-only stream is a no-op, not an error.
    storage.flush().unwrap();
}

#[test]
fn local_rejects_non_sequential_write() {
    let dir = tempdir().unwrap();
    let storage = LocalStorage::writable(dir.path(), 64, 4).unwrap();
    storage.write_trunk(TrunkId::new(0), &[1u8; 64]).unwrap();
    storage.write_trunk(TrunkId::new(1), &[2u8; 64]).unwrap();

    assert!(matches!(
        storage.write_trunk(TrunkId::new(0), &[3u8; 64]),
        Err(StorageError::NonSequentialWrite { id: 0, count: 2 })
    ));
    assert!(matches!(
        storage.write_trunk(TrunkId::new(5), &[3u8; 64]),
        Err(StorageError::NonSequentialWrite { id: 5, count: 2 })
    ));
}
