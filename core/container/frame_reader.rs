//! Read-only shared-memory frame access.
//!
//! Opens for read, maps read-only via `memmap2`, copies the bytes the
//! caller needs, then drops the mapping and file handle before returning.
//! Never opens for write, never truncates. Every failure mode collapses to
//! `None`; this is a reader-side operational path and must never raise.

use std::path::Path;

use crate::model::PixelFormat;

/// What the handler asks for: the declared geometry of the frame it
/// expects to find at `frame_reference`.
#[derive(Copy, Clone, Debug)]
pub struct FrameRequest<'a> {
    pub width: u32,
    pub height: u32,
    pub format: &'a str,
}

/// Reads exactly `width*height*3/2` bytes from `path`, read-only, and
/// returns them as an owned copy. `None` on any failure: missing file,
/// permission denied, unsupported format, bad metadata, or a short read.
pub fn read_frame(path: &Path, request: FrameRequest<'_>) -> Option<Vec<u8>> {
    if PixelFormat::parse(request.format).is_none() {
        return None;
    }
    if request.width == 0 || request.height == 0 {
        return None;
    }
    let expected_len = (request.width as usize) * (request.height as usize) * 3 / 2;

    let file = std::fs::OpenOptions::new().read(true).write(false).open(path).ok()?;
    // Safety: the mapping is read-only and scoped to this function; we
    // copy out of it before returning, so no reference to mapped memory
    // escapes this call.
    let mmap = unsafe { memmap2::Mmap::map(&file).ok()? };
    if mmap.len() < expected_len {
        return None;
    }
    Some(mmap[..expected_len].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_none() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("frame.data");
        assert!(read_frame(&path, FrameRequest { width: 4, height: 2, format: "NV12" }).is_none());
    }

    #[test]
    fn rejects_unsupported_format() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("frame.data");
        std::fs::write(&path, vec![0u8; 12]).unwrap();
        assert!(read_frame(&path, FrameRequest { width: 4, height: 2, format: "yuv420" }).is_none());
    }

    #[test]
    fn short_file_yields_none() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("frame.data");
        std::fs::write(&path, vec![0u8; 4]).unwrap();
        assert!(read_frame(&path, FrameRequest { width: 4, height: 2, format: "NV12" }).is_none());
    }

    #[test]
    fn reads_exact_byte_count_and_copies() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("frame.data");
        let contents = vec![7u8; 12];
        std::fs::write(&path, &contents).unwrap();
        let read = read_frame(&path, FrameRequest { width: 4, height: 2, format: "NV12" }).unwrap();
        assert_eq!(read, contents);

        // Mutating the file after the read must not affect the copy already
        // returned.
        std::fs::write(&path, vec![9u8; 12]).unwrap();
        assert_eq!(read, vec![7u8; 12]);
    }

    #[test]
    fn reads_only_up_to_expected_len_when_file_is_longer() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("frame.data");
        let mut contents = vec![1u8; 12];
        contents.extend_from_slice(&[0xFF; 8]);
        std::fs::write(&path, &contents).unwrap();
        let read = read_frame(&path, FrameRequest { width: 4, height: 2, format: "NV12" }).unwrap();
        assert_eq!(read, vec![1u8; 12]);
    }
}
