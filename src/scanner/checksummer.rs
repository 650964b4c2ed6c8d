//! The sliding-window file checksummer.
//!
//! Maintains a circular `blocksize`-byte window over a candidate
//! file. The window CRC32 advances in O(1) per byte via the
//! precomputed window table; the window contents are available for
//! the (rare) MD5 confirmation when the CRC probes positively. Two
//! incremental MD5 contexts accumulate the whole-file hash and the
//! 16 KiB hash as bytes stream in, so one pass yields everything the
//! match classifier needs.
//!
//! Past end-of-file the window is zero padded, matching how PAR2
//! hashes a file's truncated tail block.

use md5::{Digest, Md5};
use std::fs::File;
use std::io::{self, BufReader, Read};

use crate::crc::{crc32, crc_slide_char};
use crate::domain::Md5Hash;

const READ_BUFFER_SIZE: usize = 1024 * 1024;
const HASH_16K_THRESHOLD: u64 = 16384;

pub struct FileCheckSummer<'a> {
    reader: BufReader<File>,
    file_size: u64,
    block_size: usize,
    window: Vec<u8>,
    /// Ring index of the window's oldest byte.
    head: usize,
    /// File offset of the window start.
    offset: u64,
    /// Next file offset to be read (monotonic; every file byte is
    /// absorbed exactly once, in order).
    tail: u64,
    checksum: u32,
    window_table: &'a [u32; 256],
    window_mask: u32,
    hasher_full: Md5,
    hasher_16k: Md5,
    absorbed: u64,
}

impl<'a> FileCheckSummer<'a> {
    pub fn new(
        file: File,
        file_size: u64,
        block_size: usize,
        window_table: &'a [u32; 256],
        window_mask: u32,
    ) -> io::Result<Self> {
        let mut summer = FileCheckSummer {
            reader: BufReader::with_capacity(READ_BUFFER_SIZE, file),
            file_size,
            block_size,
            window: vec![0u8; block_size],
            head: 0,
            offset: 0,
            tail: 0,
            checksum: 0,
            window_table,
            window_mask,
            hasher_full: Md5::new(),
            hasher_16k: Md5::new(),
            absorbed: 0,
        };

        let initial = (file_size.min(block_size as u64)) as usize;
        if initial > 0 {
            let mut filled = 0;
            while filled < initial {
                let n = summer.reader.read(&mut summer.window[filled..initial])?;
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "file shrank during scan",
                    ));
                }
                filled += n;
            }
            summer.tail = initial as u64;
            let absorbed = summer.window[..initial].to_vec();
            summer.absorb(&absorbed);
        }
        summer.checksum = crc32(&summer.window);
        Ok(summer)
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// MD5 of the current (zero-padded) window.
    pub fn window_md5(&self) -> Md5Hash {
        let mut hasher = Md5::new();
        hasher.update(&self.window[self.head..]);
        hasher.update(&self.window[..self.head]);
        Md5Hash::new(hasher.finalize().into())
    }

    /// Slide the window one byte.
    pub fn step(&mut self) -> io::Result<()> {
        let outgoing = self.window[self.head];
        let incoming = if self.tail < self.file_size {
            let mut byte = [0u8; 1];
            self.reader.read_exact(&mut byte)?;
            self.tail += 1;
            self.absorb(&byte);
            byte[0]
        } else {
            0
        };

        self.checksum = self.window_mask
            ^ crc_slide_char(
                self.window_mask ^ self.checksum,
                incoming,
                outgoing,
                self.window_table,
            );
        self.window[self.head] = incoming;
        self.head = (self.head + 1) % self.block_size;
        self.offset += 1;
        Ok(())
    }

    /// Advance the window by a whole block (after a hit or a
    /// duplicate). Clamped at end-of-file.
    pub fn jump(&mut self, distance: u64) -> io::Result<()> {
        for _ in 0..distance {
            if self.offset >= self.file_size {
                break;
            }
            self.step()?;
        }
        Ok(())
    }

    /// Finish the pass and return (whole-file MD5, 16 KiB MD5).
    /// Callers must have driven the scan to end-of-file.
    pub fn file_hashes(self) -> (Md5Hash, Md5Hash) {
        debug_assert_eq!(self.tail, self.file_size);
        let full = Md5Hash::new(self.hasher_full.finalize().into());
        let head = if self.file_size < HASH_16K_THRESHOLD {
            full
        } else {
            Md5Hash::new(self.hasher_16k.finalize().into())
        };
        (full, head)
    }

    fn absorb(&mut self, data: &[u8]) {
        self.hasher_full.update(data);
        if self.absorbed < HASH_16K_THRESHOLD {
            let take = data
                .len()
                .min((HASH_16K_THRESHOLD - self.absorbed) as usize);
            self.hasher_16k.update(&data[..take]);
        }
        self.absorbed += data.len() as u64;
    }
}

/// Hash a whole file without a sliding window: (whole-file MD5,
/// 16 KiB MD5, size). Used when no file in the set is block
/// verifiable.
pub fn hash_file_contents(file: File) -> io::Result<(Md5Hash, Md5Hash, u64)> {
    let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);
    let mut hasher_full = Md5::new();
    let mut hasher_16k = Md5::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher_full.update(&buffer[..n]);
        if total < HASH_16K_THRESHOLD {
            let take = n.min((HASH_16K_THRESHOLD - total) as usize);
            hasher_16k.update(&buffer[..take]);
        }
        total += n as u64;
    }

    let full = Md5Hash::new(hasher_full.finalize().into());
    let head = if total < HASH_16K_THRESHOLD {
        full
    } else {
        Md5Hash::new(hasher_16k.finalize().into())
    };
    Ok((full, head, total))
}
