//! Cryptographic utility functions

use rand::RngCore;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;

/// Fill a buffer with cryptographically secure random bytes.
///
/// Surfaces OS entropy failures to the caller instead of panicking.
pub fn random_bytes(len: usize) -> Result<Vec<u8>, rand::Error> {
    let mut buf = vec![0u8; len];
    OsRng.try_fill_bytes(&mut buf)?;
    Ok(buf)
}

/// Constant-time byte comparison to prevent timing attacks
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
