/*++

Licensed under the Apache-2.0 license.

File Name:

    cache.rs

Abstract:

    File contains the on-disk bitstream/bitmask cache keyed by the
    8-digit bitstream id.

--*/

use faultline_error::{FaultlineError, FaultlineResult};
use std::fs;
use std::path::{Path, PathBuf};

/// Read-through / write-through cache of bitstream and bitmask images.
pub struct BitstreamCache {
    dir: PathBuf,
}

impl BitstreamCache {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn bitstream_path(&self, id: u32) -> PathBuf {
        self.dir.join(format!("{id:08}.bin"))
    }

    fn bitmask_path(&self, id: u32) -> PathBuf {
        self.dir.join(format!("{id:08}.msk"))
    }

    /// Fetch bitstream and bitmask for `id`. A missing pair is a cache
    /// miss surfaced to the caller, not retried.
    pub fn load(&self, id: u32) -> FaultlineResult<(Vec<u8>, Vec<u8>)> {
        let bit = self.bitstream_path(id);
        let mask = self.bitmask_path(id);
        if !bit.exists() || !mask.exists() {
            return Err(FaultlineError::CACHE_MISS);
        }
        let bitstream = fs::read(&bit).map_err(|_| FaultlineError::CACHE_IO)?;
        let bitmask = fs::read(&mask).map_err(|_| FaultlineError::CACHE_IO)?;
        log::info!(
            "cache hit for id {id:08}: {} + {} bytes",
            bitstream.len(),
            bitmask.len()
        );
        Ok((bitstream, bitmask))
    }

    /// Write both images through to storage.
    pub fn store(&self, id: u32, bitstream: &[u8], bitmask: &[u8]) -> FaultlineResult<()> {
        fs::create_dir_all(&self.dir).map_err(|_| FaultlineError::CACHE_IO)?;
        fs::write(self.bitstream_path(id), bitstream).map_err(|_| FaultlineError::CACHE_IO)?;
        fs::write(self.bitmask_path(id), bitmask).map_err(|_| FaultlineError::CACHE_IO)?;
        log::info!("cache updated for id {id:08}");
        Ok(())
    }

    /// Remove every cached bitstream and bitmask file.
    pub fn clean(&self) -> FaultlineResult<u32> {
        let mut removed = 0;
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(0),
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let ext = path.extension().and_then(|e| e.to_str());
            if matches!(ext, Some("bin") | Some("msk")) {
                fs::remove_file(&path).map_err(|_| FaultlineError::CACHE_IO)?;
                removed += 1;
            }
        }
        log::info!("cache cleanup finished: {removed} files removed");
        Ok(removed)
    }

    /// Cached files and their sizes.
    pub fn list(&self) -> Vec<(String, u64)> {
        let mut files = Vec::new();
        if let Ok(entries) = fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                if let (Some(name), Ok(meta)) =
                    (entry.file_name().to_str().map(String::from), entry.metadata())
                {
                    files.push((name, meta.len()));
                }
            }
        }
        files.sort();
        files
    }
}
