//! Shared test support: build real PAR2 sets on disk.
//!
//! The builder frames genuine wire packets (header, streamed MD5,
//! zero padding) and encodes recovery blocks with the crate's own
//! GF(2^16) primitives, so integration tests exercise the loader,
//! scanner and repair pipeline against authentic data.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use par2mend::checksum::{
    compute_crc32_padded, compute_file_id, compute_md5, compute_md5_padded,
};
use par2mend::domain::Md5Hash;
use par2mend::galois::process_slice;
use par2mend::packets;
use par2mend::repair::matrix::vandermonde_bases;

pub const MAGIC: &[u8; 8] = b"PAR2\0PKT";

/// Frame one packet: header with computed length and MD5, then body.
pub fn packet(set_id: &[u8; 16], packet_type: &[u8; 16], body: &[u8]) -> Vec<u8> {
    assert_eq!(body.len() % 4, 0, "packet bodies are 4-byte aligned");
    let length = 64 + body.len() as u64;

    let mut hashed = Vec::with_capacity(32 + body.len());
    hashed.extend_from_slice(set_id);
    hashed.extend_from_slice(packet_type);
    hashed.extend_from_slice(body);
    let md5 = compute_md5(&hashed);

    let mut out = Vec::with_capacity(64 + body.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&length.to_le_bytes());
    out.extend_from_slice(md5.as_bytes());
    out.extend_from_slice(set_id);
    out.extend_from_slice(packet_type);
    out.extend_from_slice(body);
    out
}

fn pad4(mut bytes: Vec<u8>) -> Vec<u8> {
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
    bytes
}

pub struct TestSet {
    pub par2_path: PathBuf,
    pub volume_path: PathBuf,
    pub set_id: [u8; 16],
    /// (name, whole-file MD5) per protected file, in set order.
    pub file_md5s: Vec<(String, Md5Hash)>,
    pub total_blocks: usize,
}

/// Write the data files, a `<base>.par2` index (critical packets
/// only) and a `<base>.vol00+NN.par2` volume (critical packets plus
/// `recovery_count` recovery slices) into `dir`.
pub fn build_test_set(
    dir: &Path,
    base: &str,
    block_size: u64,
    files: &[(&str, Vec<u8>)],
    recovery_count: usize,
) -> TestSet {
    assert!(block_size > 0 && block_size % 4 == 0);

    let mut file_ids = Vec::new();
    let mut descriptions = Vec::new();
    let mut verifications = Vec::new();
    let mut all_blocks: Vec<Vec<u8>> = Vec::new();
    let mut file_md5s = Vec::new();

    for (name, contents) in files {
        fs::write(dir.join(name), contents).unwrap();

        let head = &contents[..contents.len().min(16384)];
        let hash_16k = compute_md5(head);
        let hash_full = compute_md5(contents);
        let file_id = compute_file_id(&hash_16k, contents.len() as u64, name.as_bytes());
        file_md5s.push((name.to_string(), hash_full));

        let mut description = Vec::new();
        description.extend_from_slice(file_id.as_bytes());
        description.extend_from_slice(hash_full.as_bytes());
        description.extend_from_slice(hash_16k.as_bytes());
        description.extend_from_slice(&(contents.len() as u64).to_le_bytes());
        description.extend_from_slice(name.as_bytes());
        descriptions.push(pad4(description));

        let mut verification = Vec::new();
        verification.extend_from_slice(file_id.as_bytes());
        for chunk in contents.chunks(block_size as usize) {
            let mut block = chunk.to_vec();
            block.resize(block_size as usize, 0);
            verification.extend_from_slice(compute_md5_padded(chunk, block_size as usize).as_bytes());
            verification
                .extend_from_slice(&compute_crc32_padded(chunk, block_size as usize).to_le_bytes());
            all_blocks.push(block);
        }
        verifications.push(verification);
        file_ids.push(file_id);
    }

    // Main packet body; the set id is its MD5.
    let mut main_body = Vec::new();
    main_body.extend_from_slice(&block_size.to_le_bytes());
    main_body.extend_from_slice(&(file_ids.len() as u32).to_le_bytes());
    for id in &file_ids {
        main_body.extend_from_slice(id.as_bytes());
    }
    let set_id = *compute_md5(&main_body).as_bytes();

    let main = packet(&set_id, packets::main_packet::PACKET_TYPE, &main_body);
    let creator = packet(
        &set_id,
        packets::creator_packet::PACKET_TYPE,
        &pad4(b"par2mend test builder".to_vec()),
    );
    let descriptions: Vec<Vec<u8>> = descriptions
        .iter()
        .map(|body| packet(&set_id, packets::file_description_packet::PACKET_TYPE, body))
        .collect();
    let verifications: Vec<Vec<u8>> = verifications
        .iter()
        .map(|body| {
            packet(
                &set_id,
                packets::file_verification_packet::PACKET_TYPE,
                body,
            )
        })
        .collect();

    // Recovery slices: for exponent e, sum base_i^e * block_i.
    let bases = vandermonde_bases(all_blocks.len());
    let recovery_packets: Vec<Vec<u8>> = (0..recovery_count as u32)
        .map(|exponent| {
            let mut data = vec![0u8; block_size as usize];
            for (base, block) in bases.iter().zip(&all_blocks) {
                process_slice(base.pow(exponent as u16), block, &mut data);
            }
            let mut body = Vec::with_capacity(4 + data.len());
            body.extend_from_slice(&exponent.to_le_bytes());
            body.extend_from_slice(&data);
            packet(&set_id, packets::recovery_slice_packet::PACKET_TYPE, &body)
        })
        .collect();

    let mut index = Vec::new();
    index.extend_from_slice(&main);
    for description in &descriptions {
        index.extend_from_slice(description);
    }
    for verification in &verifications {
        index.extend_from_slice(verification);
    }
    index.extend_from_slice(&creator);

    let mut volume = Vec::new();
    volume.extend_from_slice(&main);
    for description in &descriptions {
        volume.extend_from_slice(description);
    }
    for verification in &verifications {
        volume.extend_from_slice(verification);
    }
    for recovery in &recovery_packets {
        volume.extend_from_slice(recovery);
    }
    volume.extend_from_slice(&creator);

    let par2_path = dir.join(format!("{}.par2", base));
    let volume_path = dir.join(format!("{}.vol00+{:02}.par2", base, recovery_count));
    fs::write(&par2_path, &index).unwrap();
    fs::write(&volume_path, &volume).unwrap();

    TestSet {
        par2_path,
        volume_path,
        set_id,
        file_md5s,
        total_blocks: all_blocks.len(),
    }
}

/// Deterministic pseudo-random file contents.
pub fn patterned_data(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9E3779B97F4A7C15).max(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 24) as u8
        })
        .collect()
}

/// XOR-damage `len` bytes at `offset`.
pub fn corrupt(path: &Path, offset: usize, len: usize) {
    let mut contents = fs::read(path).unwrap();
    for byte in &mut contents[offset..offset + len] {
        *byte ^= 0xA5;
    }
    fs::write(path, contents).unwrap();
}
