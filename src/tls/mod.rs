//! TLS peer verification: CA-chain checks with a TOFU fallback (§4.7, §4.8).

pub mod tofu_registry;
pub mod verifier;
