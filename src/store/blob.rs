// BLOB version prefix helpers. [version: u8][payload].
// snapshot_data: version 1 = wincode Snapshot. warnings_data: version 1 = wincode Vec<String>.

pub(super) const BLOB_VERSION: u8 = 1;

pub(super) fn with_version_prefix(payload: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(BLOB_VERSION);
    out.extend_from_slice(&payload);
    out
}

/// Payload after the version byte, or None for an empty or unknown-version blob.
pub(super) fn payload(bytes: &[u8]) -> Option<&[u8]> {
    match bytes.split_first() {
        Some((&BLOB_VERSION, rest)) => Some(rest),
        _ => None,
    }
}
