/**
 * Cryptographic types and operations.
 *  - Ed25519 identities and SSH key forms
 *  - Symmetric, sealed box and password encryption
 */
pub mod crypto;
/**
 * Display name rules shared by the server
 *  and the client.
 */
pub mod name;
/**
 * JSON messages spoken over SSH sessions
 *  and the HTTP data plane.
 */
pub mod protocol;
/**
 * Helper for setting build version information
 *  at compile time.
 */
pub mod version;

pub mod prelude {
    pub use crate::crypto::{AuthorizedKey, PublicKey, SecretKey};
    pub use crate::name::validate_name;
    pub use crate::version::build_info;
}
