//! Content identities for model files and their thumbnails.

pub mod fingerprint;
pub mod hashing;

pub use fingerprint::{fingerprint_image, fingerprint_image_async};
pub use hashing::{compute_identity, compute_identity_async, ContentIdentity};
