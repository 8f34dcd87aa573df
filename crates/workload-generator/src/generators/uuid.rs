//! UUID value generator.

use rand::Rng;
use uuid::Uuid;
use workload_core::Value;

/// Build a version 4 UUID from the random stream, so replays are repeatable.
pub fn uuid_from_rng<R: Rng>(rng: &mut R) -> Uuid {
    let mut bytes = [0u8; 16];
    rng.fill(&mut bytes);

    // Set version (4) and variant (RFC 4122) bits
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    Uuid::from_bytes(bytes)
}

/// Generate a UUID rendered as its hyphenated string.
pub fn generate_uuid<R: Rng>(rng: &mut R) -> Value {
    Value::String(uuid_from_rng(rng).to_string())
}
