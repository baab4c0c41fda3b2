//! Impression fingerprints via xxh3.

use xxhash_rust::xxh3::xxh3_64;

use crate::impression::Impression;

const FIELD_SEPARATOR: u8 = 0x1f;

/// Fingerprint of an impression for deduplication.
///
/// Covers user key, flag, treatment and label. Time is excluded so repeated
/// evaluations collide.
#[inline]
pub fn fingerprint(impression: &Impression) -> u64 {
    let fields = [
        impression.user_key.as_bytes(),
        impression.flag_name.as_bytes(),
        impression.treatment.as_bytes(),
        impression.label.as_bytes(),
    ];
    let mut buf = Vec::with_capacity(fields.iter().map(|f| f.len() + 1).sum());
    for field in fields {
        buf.extend_from_slice(field);
        buf.push(FIELD_SEPARATOR);
    }
    xxh3_64(&buf)
}
