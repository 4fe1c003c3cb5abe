//! Checkout reference tokens (`uref`).
//!
//! The uref is the only local key that travels through a provider's metadata,
//! so it is restricted to characters that never need escaping in the custom
//! field: `sx_` followed by 32 lowercase hex chars.

use uuid::Uuid;

pub const UREF_PREFIX: &str = "sx_";

/// Generate a fresh checkout reference.
pub fn generate_uref() -> String {
    format!("{}{}", UREF_PREFIX, Uuid::new_v4().as_simple())
}
