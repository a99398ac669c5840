pub mod encryption;
pub mod key_derivation;
pub mod logging;
pub mod pin_hash;
pub mod retry;
