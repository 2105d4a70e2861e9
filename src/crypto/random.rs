//! Cryptographically secure random number generation.

use rand::rngs::OsRng;
use rand::RngCore;

/// Generate cryptographically secure random bytes.
pub fn random_bytes(length: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; length];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Fill an existing buffer with random bytes.
pub fn fill_random(buffer: &mut [u8]) {
    OsRng.fill_bytes(buffer);
}

/// Generate a random value in `[0, max)` using rejection sampling to avoid
/// modulo bias.
pub fn random_range(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    let range = u64::MAX - (u64::MAX % max);
    loop {
        let mut buf = [0u8; 8];
        OsRng.fill_bytes(&mut buf);
        let value = u64::from_le_bytes(buf);
        if value < range {
            return value % max;
        }
    }
}
