//! ID generation for tasks.

use chrono::{DateTime, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};

/// Prefix of generated task ids.
pub const TASK_ID_PREFIX: &str = "tl-";

/// Generate a task id from its title, creation time and entropy.
/// Format: "tl-" + 10 hex chars of SHA256(title + timestamp + random)
pub fn generate_task_id(title: &str, created_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(created_at.timestamp_nanos_opt().unwrap_or(0).to_le_bytes());
    hasher.update(rand::rng().random::<[u8; 8]>());
    let hash = hasher.finalize();
    // 40 bits
    format!(
        "{}{:010x}",
        TASK_ID_PREFIX,
        u64::from_be_bytes([0, 0, 0, hash[0], hash[1], hash[2], hash[3], hash[4]])
    )
}
