//! UUID utilities

use uuid::Uuid;

/// Generate a new UUIDv4 (audit ids, request ids)
pub fn generate() -> Uuid {
    Uuid::new_v4()
}
