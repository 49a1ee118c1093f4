//! Zip access shared by the EPUB and Word parsers.

use std::io::{Cursor, Read};

use zip::result::ZipError;
use zip::ZipArchive;

/// Upper bound on a single decompressed entry.
pub const MAX_ENTRY_BYTES: u64 = 256 * 1024 * 1024;

pub type Archive<'a> = ZipArchive<Cursor<&'a [u8]>>;

pub fn open(bytes: &[u8]) -> Result<Archive<'_>, String> {
    ZipArchive::new(Cursor::new(bytes)).map_err(|e| format!("not a zip archive: {}", e))
}

/// Reads an entry, `Ok(None)` if the archive has no such entry.
pub fn read_entry(archive: &mut Archive<'_>, name: &str) -> Result<Option<Vec<u8>>, String> {
    let entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(format!("cannot open '{}': {}", name, e)),
    };

    if entry.size() > MAX_ENTRY_BYTES {
        return Err(format!(
            "entry '{}' is too large ({} bytes)",
            name,
            entry.size()
        ));
    }

    let mut buf = Vec::with_capacity(entry.size() as usize);
    entry
        .take(MAX_ENTRY_BYTES + 1)
        .read_to_end(&mut buf)
        .map_err(|e| format!("cannot read '{}': {}", name, e))?;
    if buf.len() as u64 > MAX_ENTRY_BYTES {
        return Err(format!("entry '{}' exceeds the size limit", name));
    }
    Ok(Some(buf))
}

/// Reads a UTF-8 text entry. A leading byte-order mark is dropped.
pub fn read_text_entry(archive: &mut Archive<'_>, name: &str) -> Result<Option<String>, String> {
    let Some(bytes) = read_entry(archive, name)? else {
        return Ok(None);
    };
    let text = String::from_utf8(bytes).map_err(|_| format!("'{}' is not valid UTF-8", name))?;
    Ok(Some(text.trim_start_matches('\u{feff}').to_string()))
}
