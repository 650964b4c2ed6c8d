//! Disk files as arena-indexed handles.
//!
//! Source files, data blocks and recovery packets all need to point
//! at on-disk files. Handing out `DiskFileId` indices into one arena
//! (with a canonical-path map for deduplication) keeps that graph
//! acyclic and lets block locations stay `Copy`.

use log::debug;
use rustc_hash::FxHashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Index of a file in the [`DiskFileArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiskFileId(usize);

#[derive(Debug)]
pub struct DiskFile {
    path: PathBuf,
    size: u64,
}

impl DiskFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Arena of every disk file touched during one verify/repair run,
/// keyed by canonical path so the same file is never processed twice.
#[derive(Default)]
pub struct DiskFileArena {
    files: Vec<DiskFile>,
    by_path: FxHashMap<PathBuf, DiskFileId>,
}

impl DiskFileArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical form of a path: resolved when the file exists,
    /// otherwise absolute-ized against the current directory.
    pub fn canonical(path: &Path) -> PathBuf {
        fs::canonicalize(path).unwrap_or_else(|_| {
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                std::env::current_dir()
                    .map(|cwd| cwd.join(path))
                    .unwrap_or_else(|_| path.to_path_buf())
            }
        })
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.by_path.contains_key(&Self::canonical(path))
    }

    /// Register an existing file. Returns `None` when the canonical
    /// path is already present (the caller should skip the file).
    pub fn insert(&mut self, path: &Path, size: u64) -> Option<DiskFileId> {
        let canonical = Self::canonical(path);
        if self.by_path.contains_key(&canonical) {
            return None;
        }
        let id = DiskFileId(self.files.len());
        self.files.push(DiskFile {
            path: canonical.clone(),
            size,
        });
        self.by_path.insert(canonical, id);
        Some(id)
    }

    /// Create a file of the given size (zero-filled by the
    /// filesystem) and register it.
    pub fn create(&mut self, path: &Path, size: u64) -> io::Result<DiskFileId> {
        let file = File::create(path)?;
        file.set_len(size)?;
        drop(file);
        self.insert(path, size).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} is already tracked", path.display()),
            )
        })
    }

    pub fn get(&self, id: DiskFileId) -> &DiskFile {
        &self.files[id.0]
    }

    pub fn open_read(&self, id: DiskFileId) -> io::Result<File> {
        File::open(&self.files[id.0].path)
    }

    pub fn open_write(&self, id: DiskFileId) -> io::Result<File> {
        OpenOptions::new().write(true).open(&self.files[id.0].path)
    }

    /// Move a file aside by appending `.1`, `.2`, … until a free name
    /// is found. Returns the new path.
    pub fn rename_aside(&mut self, id: DiskFileId) -> io::Result<PathBuf> {
        let old = self.files[id.0].path.clone();
        let mut suffix = 1u32;
        loop {
            let mut name = old.clone().into_os_string();
            name.push(format!(".{}", suffix));
            let candidate = PathBuf::from(name);
            if !candidate.exists() && !self.by_path.contains_key(&candidate) {
                self.rename_to(id, &candidate)?;
                return Ok(candidate);
            }
            suffix += 1;
        }
    }

    /// Rename a file to a specific path, updating the canonical map.
    pub fn rename_to(&mut self, id: DiskFileId, new_path: &Path) -> io::Result<()> {
        let old = self.files[id.0].path.clone();
        fs::rename(&old, new_path)?;
        debug!("renamed {} -> {}", old.display(), new_path.display());
        let canonical = Self::canonical(new_path);
        self.by_path.remove(&old);
        self.by_path.insert(canonical.clone(), id);
        self.files[id.0].path = canonical;
        Ok(())
    }

    /// Delete a file and drop it from the canonical map. The arena
    /// slot remains so outstanding ids stay valid; callers clear
    /// their references.
    pub fn delete(&mut self, id: DiskFileId) -> io::Result<()> {
        let path = self.files[id.0].path.clone();
        fs::remove_file(&path)?;
        self.by_path.remove(&path);
        Ok(())
    }
}

/// Read up to `buf.len()` bytes at `offset`, tolerating EOF. Returns
/// the number of bytes read.
pub fn read_at(file: &mut File, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
    file.seek(SeekFrom::Start(offset))?;
    let mut total = 0;
    while total < buf.len() {
        match file.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// Write a full buffer at `offset`.
pub fn write_at(file: &mut File, offset: u64, data: &[u8]) -> io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)
}

/// Raise the process open-file limit so that repair can keep every
/// target file open. No-op on non-unix platforms.
#[cfg(unix)]
pub fn raise_file_limit(needed: u64) {
    unsafe {
        let mut limit = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        if libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) != 0 {
            return;
        }
        let needed = needed as libc::rlim_t;
        if limit.rlim_cur >= needed {
            return;
        }
        limit.rlim_cur = needed.min(limit.rlim_max);
        if libc::setrlimit(libc::RLIMIT_NOFILE, &limit) == 0 {
            debug!("raised open-file limit to {}", limit.rlim_cur);
        }
    }
}

#[cfg(not(unix))]
pub fn raise_file_limit(_needed: u64) {}
