pub mod challenge;
pub mod signature;

// Re-export main functions for easier access
pub use challenge::{generate_challenge, Challenge, DigestAlgorithm};
pub use signature::{verify_signature, Signature};
