//! CRC32 and the sliding-window machinery used by the block scanner.
//!
//! Block checksums elsewhere use `crc32fast`; this module exists for
//! the scanner, which needs to move a blocksize window one byte at a
//! time in O(1). The values produced by the slide are bit-identical
//! to `crc32fast::hash` over the same window (see tests).

/// Standard reflected CRC32 polynomial.
const POLYNOMIAL: u32 = 0xEDB8_8320;

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ POLYNOMIAL } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC_TABLE: [u32; 256] = build_table();

/// Feed one byte into a CRC register.
#[inline]
pub fn crc_update_char(crc: u32, byte: u8) -> u32 {
    (crc >> 8) ^ CRC_TABLE[((crc ^ byte as u32) & 0xFF) as usize]
}

/// Feed a buffer into a CRC register.
pub fn crc_update_block(mut crc: u32, data: &[u8]) -> u32 {
    for &byte in data {
        crc = crc_update_char(crc, byte);
    }
    crc
}

/// One-shot CRC32 of a buffer.
pub fn crc32(data: &[u8]) -> u32 {
    !crc_update_block(!0, data)
}

/// Table removing the contribution of the outgoing byte when a window
/// of `window` bytes advances one position. Entry `i` is the CRC
/// register evolution of byte `i` followed by `window` zero bytes.
pub fn generate_window_table(window: u64) -> Box<[u32; 256]> {
    let mut table = Box::new([0u32; 256]);
    for (i, entry) in table.iter_mut().enumerate() {
        let mut crc = CRC_TABLE[i];
        for _ in 0..window {
            crc = crc_update_char(crc, 0);
        }
        *entry = crc;
    }
    table
}

/// Correction constant for a window of the given size: the CRC
/// register of `window` zero bytes, without pre/post conditioning.
pub fn compute_window_mask(mut window: u64) -> u32 {
    let mut mask = !0u32;
    while window > 0 {
        mask = crc_update_char(mask, 0);
        window -= 1;
    }
    mask ^ !0
}

/// Slide a raw CRC register one byte: add `incoming` on the right,
/// remove `outgoing` from the left via the window table.
#[inline]
pub fn crc_slide_char(crc: u32, incoming: u8, outgoing: u8, window_table: &[u32; 256]) -> u32 {
    (crc >> 8) ^ CRC_TABLE[((crc ^ incoming as u32) & 0xFF) as usize]
        ^ window_table[outgoing as usize]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    #[test]
    fn crc32_matches_crc32fast() {
        for data in [&b""[..], b"a", b"hello world", &[0u8; 1000]] {
            assert_eq!(crc32(data), crc32fast::hash(data));
        }
    }

    #[test]
    fn known_vector() {
        // CRC32 of "123456789" is the classic check value.
        assert_eq!(crc32(b"123456789"), 0xCBF43926);
    }

    #[test]
    fn slide_tracks_naive_recompute_on_random_input() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x5EED);
        for &window in &[4usize, 16, 64, 1000] {
            let data: Vec<u8> = (0..window * 4).map(|_| rng.gen()).collect();
            let table = generate_window_table(window as u64);
            let mask = compute_window_mask(window as u64);

            let mut checksum = crc32(&data[..window]);
            for start in 1..=(data.len() - window) {
                checksum = mask
                    ^ crc_slide_char(
                        mask ^ checksum,
                        data[start + window - 1],
                        data[start - 1],
                        &table,
                    );
                assert_eq!(
                    checksum,
                    crc32fast::hash(&data[start..start + window]),
                    "window {} start {}",
                    window,
                    start
                );
            }
        }
    }

    #[test]
    fn slide_handles_zero_padding() {
        // Sliding zeros in past the end of the data must agree with
        // recomputing the zero-padded window.
        let window = 8usize;
        let data = b"abcdefgh".to_vec();
        let table = generate_window_table(window as u64);
        let mask = compute_window_mask(window as u64);

        let mut padded = data.clone();
        padded.extend_from_slice(&[0u8; 8]);

        let mut checksum = crc32(&data);
        for start in 1..=window {
            checksum = mask
                ^ crc_slide_char(mask ^ checksum, padded[start + window - 1], padded[start - 1], &table);
            assert_eq!(checksum, crc32fast::hash(&padded[start..start + window]));
        }
    }
}
