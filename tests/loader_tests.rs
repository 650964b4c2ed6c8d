//! Set-loader behavior: resynchronization, set-id locking,
//! first-wins acceptance and the consistency sweep.

mod common;

use std::fs;

use common::{build_test_set, packet, patterned_data};
use par2mend::disk::DiskFileArena;
use par2mend::packets;
use par2mend::set_loader::{discover_recovery_files, SetLoader};
use par2mend::SilentReporter;
use tempfile::TempDir;

fn load_single(path: &std::path::Path) -> par2mend::set_loader::LoadedSet {
    let mut arena = DiskFileArena::new();
    let reporter = SilentReporter::new();
    let mut loader = SetLoader::new(&mut arena, &reporter);
    loader.load_file(path);
    loader.finish()
}

#[test]
fn loads_all_packets_from_a_clean_volume() {
    let dir = TempDir::new().unwrap();
    let set = build_test_set(
        dir.path(),
        "clean",
        512,
        &[("a.bin", patterned_data(1, 1500))],
        3,
    );

    let loaded = load_single(&set.volume_path);
    assert!(loaded.main.is_some());
    assert!(loaded.creator.is_some());
    assert_eq!(loaded.recovery_blocks.len(), 3);
    assert_eq!(loaded.source_packets.len(), 1);
    assert_eq!(loaded.set_id.unwrap().as_bytes(), &set.set_id);
    assert_eq!(loaded.duplicate_exponents, 0);
}

#[test]
fn resynchronizes_across_interleaved_garbage() {
    let dir = TempDir::new().unwrap();
    let set = build_test_set(
        dir.path(),
        "dirty",
        512,
        &[("a.bin", patterned_data(2, 2000))],
        2,
    );

    // Garbage before, between and after the packets.
    let volume = fs::read(&set.volume_path).unwrap();
    let mut mangled = patterned_data(99, 1337);
    mangled.extend_from_slice(&volume[..200]); // a truncated packet fragment
    mangled.extend_from_slice(&volume);
    mangled.extend_from_slice(&patterned_data(77, 555));
    let dirty = dir.path().join("dirty.mangled.par2");
    fs::write(&dirty, mangled).unwrap();

    let loaded = load_single(&dirty);
    assert!(loaded.main.is_some());
    assert_eq!(loaded.recovery_blocks.len(), 2);
    assert_eq!(loaded.source_packets.len(), 1);
}

#[test]
fn concatenated_streams_load_every_packet_once() {
    let dir = TempDir::new().unwrap();
    let set = build_test_set(
        dir.path(),
        "catset",
        512,
        &[("a.bin", patterned_data(3, 900))],
        2,
    );

    let index = fs::read(&set.par2_path).unwrap();
    let volume = fs::read(&set.volume_path).unwrap();
    let mut joined = index.clone();
    joined.extend_from_slice(&volume);
    let cat = dir.path().join("joined.par2");
    fs::write(&cat, joined).unwrap();

    let loaded = load_single(&cat);
    assert!(loaded.main.is_some());
    assert!(loaded.creator.is_some());
    assert_eq!(loaded.recovery_blocks.len(), 2);
    // Critical packets appeared twice; first wins, none duplicated.
    assert_eq!(loaded.source_packets.len(), 1);
}

#[test]
fn duplicate_exponents_are_counted_and_deduped() {
    let dir = TempDir::new().unwrap();
    let set = build_test_set(
        dir.path(),
        "dupes",
        512,
        &[("a.bin", patterned_data(4, 600))],
        2,
    );

    // Append a copy of the whole volume: every recovery exponent
    // appears twice.
    let volume = fs::read(&set.volume_path).unwrap();
    let mut doubled = volume.clone();
    doubled.extend_from_slice(&volume);
    let path = dir.path().join("doubled.par2");
    fs::write(&path, doubled).unwrap();

    let loaded = load_single(&path);
    assert_eq!(loaded.recovery_blocks.len(), 2);
    assert_eq!(loaded.duplicate_exponents, 2);
}

#[test]
fn foreign_set_packets_are_discarded() {
    let dir = TempDir::new().unwrap();
    let first = build_test_set(
        dir.path(),
        "first",
        512,
        &[("a.bin", patterned_data(5, 700))],
        1,
    );
    let second_dir = TempDir::new().unwrap();
    let second = build_test_set(
        second_dir.path(),
        "second",
        512,
        &[("b.bin", patterned_data(6, 700))],
        4,
    );

    let mut joined = fs::read(&first.volume_path).unwrap();
    joined.extend_from_slice(&fs::read(&second.volume_path).unwrap());
    let path = dir.path().join("mixed.par2");
    fs::write(&path, joined).unwrap();

    let loaded = load_single(&path);
    // The first packet locked the set id; the second set's four
    // recovery blocks were ignored.
    assert_eq!(loaded.set_id.unwrap().as_bytes(), &first.set_id);
    assert_eq!(loaded.recovery_blocks.len(), 1);
    assert_eq!(loaded.source_packets.len(), 1);
}

#[test]
fn truncated_trailing_packet_is_skipped() {
    let dir = TempDir::new().unwrap();
    let set = build_test_set(
        dir.path(),
        "trunc",
        512,
        &[("a.bin", patterned_data(7, 800))],
        2,
    );

    // Cut the volume in the middle of the last recovery packet.
    let volume = fs::read(&set.volume_path).unwrap();
    let cut = volume.len() - 300;
    let path = dir.path().join("cut.par2");
    fs::write(&path, &volume[..cut]).unwrap();

    let loaded = load_single(&path);
    assert!(loaded.main.is_some());
    assert_eq!(loaded.recovery_blocks.len(), 1);
}

#[test]
fn sweep_drops_wrong_sized_verification_packets() {
    let dir = TempDir::new().unwrap();
    let set = build_test_set(
        dir.path(),
        "sweep",
        512,
        &[("a.bin", patterned_data(8, 1200))],
        1,
    );

    let mut loaded = load_single(&set.volume_path);
    // Mangle the verification packet to claim one block too few.
    let entry = loaded.source_packets.values_mut().next().unwrap();
    entry
        .verification
        .as_mut()
        .unwrap()
        .block_checksums
        .pop();

    let reporter = SilentReporter::new();
    loaded.consistency_sweep(&reporter).unwrap();
    assert!(loaded.source_packets.is_empty());
    // Recovery blocks with the right size survive the sweep.
    assert_eq!(loaded.recovery_blocks.len(), 1);
}

#[test]
fn sweep_requires_a_main_packet() {
    let dir = TempDir::new().unwrap();
    // A file holding only a creator packet.
    let set_id = [9u8; 16];
    let bytes = packet(
        &set_id,
        packets::creator_packet::PACKET_TYPE,
        b"someclient20\0\0\0\0",
    );
    let path = dir.path().join("lonely.par2");
    fs::write(&path, bytes).unwrap();

    let mut loaded = load_single(&path);
    assert!(loaded.main.is_none());
    let reporter = SilentReporter::new();
    assert!(loaded.consistency_sweep(&reporter).is_err());
}

#[test]
fn discovery_finds_volume_siblings() {
    let dir = TempDir::new().unwrap();
    let set = build_test_set(
        dir.path(),
        "family",
        512,
        &[("a.bin", patterned_data(10, 400))],
        2,
    );
    fs::write(dir.path().join("unrelated.txt"), b"not par2").unwrap();

    let siblings = discover_recovery_files(&set.par2_path);
    assert!(siblings.iter().any(|p| p == &set.par2_path));
    assert!(siblings.iter().any(|p| p == &set.volume_path));
    assert!(siblings.iter().all(|p| p.extension().unwrap() == "par2"));

    // The volume name also resolves back to the same family.
    let from_volume = discover_recovery_files(&set.volume_path);
    assert!(from_volume.iter().any(|p| p == &set.par2_path));
}
