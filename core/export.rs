//! The frame exporter: writes the latest frame for a stream to disk as a
//! pair of files (`frame.data`, `frame.meta`) that a model container reads
//! via `mmap`, using write-to-temp-then-rename so a reader never observes a
//! partially-written file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::ring::Frame;

/// Version tag written into every `frame.meta` header.
const META_VERSION: u32 = 1;
const META_HEADER_LEN: usize = 64;

/// Packs a `frame.meta` header:
/// `version@0(u32) frame_id@4(u64) timestamp_ns@12(u64) width@20(u32)
/// height@24(u32) pixel_format@28(u32) stride@32(u32) data_size@36(u64)
/// reserved@44..64`, all little-endian.
fn pack_meta(frame: &Frame) -> [u8; META_HEADER_LEN] {
    let mut buf = [0u8; META_HEADER_LEN];
    buf[0..4].copy_from_slice(&META_VERSION.to_le_bytes());
    buf[4..12].copy_from_slice(&frame.frame_id.to_le_bytes());
    buf[12..20].copy_from_slice(&frame.timestamp_ns.to_le_bytes());
    buf[20..24].copy_from_slice(&frame.width.to_le_bytes());
    buf[24..28].copy_from_slice(&frame.height.to_le_bytes());
    buf[28..32].copy_from_slice(&crate::model::PixelFormat::NV12_WIRE_CODE.to_le_bytes());
    buf[32..36].copy_from_slice(&frame.stride.to_le_bytes());
    buf[36..44].copy_from_slice(&(frame.data.len() as u64).to_le_bytes());
    // bytes 44..64 stay zeroed (reserved).
    buf
}

/// Unpacked view of a `frame.meta` header, as a model container would
/// parse it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameMeta {
    pub version: u32,
    pub frame_id: u64,
    pub timestamp_ns: u64,
    pub width: u32,
    pub height: u32,
    pub pixel_format_code: u32,
    pub stride: u32,
    pub data_size: u64,
}

/// Parses a 64-byte `frame.meta` buffer. Returns `None` if `buf` is the
/// wrong length; this crate has no other consumer of this path, but the
/// format is a public contract and malformed input must not panic.
pub fn parse_meta(buf: &[u8]) -> Option<FrameMeta> {
    if buf.len() != META_HEADER_LEN {
        return None;
    }
    let u32_at = |o: usize| u32::from_le_bytes(buf[o..o + 4].try_into().unwrap());
    let u64_at = |o: usize| u64::from_le_bytes(buf[o..o + 8].try_into().unwrap());
    Some(FrameMeta {
        version: u32_at(0),
        frame_id: u64_at(4),
        timestamp_ns: u64_at(12),
        width: u32_at(20),
        height: u32_at(24),
        pixel_format_code: u32_at(28),
        stride: u32_at(32),
        data_size: u64_at(36),
    })
}

/// Writes the latest frame of one stream to a directory, atomically.
pub struct Exporter {
    dir: PathBuf,
}

impl Exporter {
    /// Prepares `dir` to receive exports: creates it (mode 0o755) if
    /// missing, and touches `frame.data`/`frame.meta` (mode 0o644) so both
    /// files exist from stream start even before the first `export_frame`.
    /// Best-effort: failures are logged, not propagated.
    pub fn initialize(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if let Err(e) = fs::create_dir_all(&dir) {
            warn!(dir = %dir.display(), err = %e, "failed to create frame export directory");
        } else {
            set_permissions(&dir, 0o755);
            for name in ["frame.data", "frame.meta"] {
                let path = dir.join(name);
                match fs::OpenOptions::new().create(true).write(true).open(&path) {
                    Ok(_) => set_permissions(&path, 0o644),
                    Err(e) => warn!(path = %path.display(), err = %e, "failed to touch exported frame file"),
                }
            }
        }
        Exporter { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `frame.data` and `frame.meta` for `frame`, each via a
    /// write-to-temp-then-rename so a concurrent reader only ever sees a
    /// complete file or the previous complete file, never a partial one.
    /// Returns `false` (and logs) on any I/O failure; this is an
    /// operational path, not one that raises `base::Error`.
    pub fn export_frame(&self, frame: &Frame) -> bool {
        let data_ok = self.write_atomic("frame.data", &frame.data);
        let meta = pack_meta(frame);
        let meta_ok = self.write_atomic("frame.meta", &meta);
        if data_ok && meta_ok {
            debug!(frame_id = frame.frame_id, "exported frame");
            true
        } else {
            false
        }
    }

    /// Removes `frame.data`, `frame.meta`, and the directory itself, if
    /// present. Best-effort.
    pub fn cleanup(&self) {
        for name in ["frame.data", "frame.meta"] {
            let path = self.dir.join(name);
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), err = %e, "failed to remove exported frame file");
                }
            }
        }
        if let Err(e) = fs::remove_dir(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(dir = %self.dir.display(), err = %e, "failed to remove frame export directory");
            }
        }
    }

    fn write_atomic(&self, name: &str, contents: &[u8]) -> bool {
        let final_path = self.dir.join(name);
        let tmp_path = self.dir.join(format!("{name}.tmp"));
        let result = (|| -> std::io::Result<()> {
            let mut f = fs::File::create(&tmp_path)?;
            f.write_all(contents)?;
            f.sync_all()?;
            drop(f);
            fs::rename(&tmp_path, &final_path)?;
            Ok(())
        })();
        match result {
            Ok(()) => {
                set_permissions(&final_path, 0o644);
                true
            }
            Err(e) => {
                warn!(path = %final_path.display(), err = %e, "failed to export frame file");
                let _ = fs::remove_file(&tmp_path);
                false
            }
        }
    }
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
        warn!(path = %path.display(), err = %e, "failed to set permissions");
    }
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _mode: u32) {}
