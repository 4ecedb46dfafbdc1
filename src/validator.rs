//! DICOM object detection by file signature.
//!
//! A Part 10 file carries a 128 byte preamble followed by the literal
//! `DICM`. Checking those four bytes is enough to classify a file during a
//! tree walk; the extension is ignored entirely.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use tracing::trace;

pub const SIGNATURE_OFFSET: u64 = 128;
pub const SIGNATURE: &[u8; 4] = b"DICM";

/// True iff bytes `[128, 132)` of the file are `DICM`.
///
/// Unreadable and short files are simply not DICOM objects.
pub fn is_dicom_object(path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    match read_signature(path) {
        Ok(signature) => &signature == SIGNATURE,
        Err(e) => {
            trace!("{} not classified as DICOM: {}", path.display(), e);
            false
        }
    }
}

fn read_signature(path: &Path) -> io::Result<[u8; 4]> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(SIGNATURE_OFFSET))?;
    let mut signature = [0u8; 4];
    file.read_exact(&mut signature)?;
    Ok(signature)
}
