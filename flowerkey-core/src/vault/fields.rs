//! At-rest sealing of an entry's sensitive fields.

use crate::crypto::FieldCodec;
use crate::database::Entry;
use crate::Result;

/// Seal every non-empty sensitive field unless the entry is marked plaintext.
pub(crate) fn seal_entry(codec: &FieldCodec, entry: &Entry) -> Result<Entry> {
    let mut stored = entry.clone();
    if !entry.is_encrypted() {
        return Ok(stored);
    }

    for field in sensitive_fields(&mut stored) {
        if let Some(value) = field.filter(|v| !v.is_empty()) {
            *value = codec.seal_field(value)?;
        }
    }
    Ok(stored)
}

/// Reverse of [`seal_entry`]. A field that fails to open is an error.
pub(crate) fn open_entry(codec: &FieldCodec, mut stored: Entry) -> Result<Entry> {
    if !stored.is_encrypted() {
        return Ok(stored);
    }

    for field in sensitive_fields(&mut stored) {
        if let Some(value) = field.filter(|v| !v.is_empty()) {
            *value = codec.open_field(value)?;
        }
    }
    Ok(stored)
}

fn sensitive_fields(entry: &mut Entry) -> [Option<&mut String>; 6] {
    [
        entry.codename.as_mut(),
        entry.url.as_mut(),
        entry.title.as_mut(),
        Some(&mut entry.description),
        entry.file_name.as_mut(),
        entry.source_url.as_mut(),
    ]
}
