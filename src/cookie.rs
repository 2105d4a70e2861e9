//! Stateless cookie gate: DoS mitigation for the `COOKIE` state.
//!
//! A cookie is `HMAC-SHA256(cookie_key, client_addr || client_random)`,
//! verified in constant time. No timestamp component is needed: freshness
//! comes from the per-attempt random cookie key, regenerated each time a
//! session re-enters `COOKIE`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::constants::{FLOOD_PAUSE, FLOOD_THRESHOLD};
use crate::crypto::random;

const COOKIE_SIZE: usize = 32;

/// Per-attempt random key used to key the HMAC. Regenerated whenever a
/// session (re-)enters `COOKIE`.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
struct CookieKey([u8; 32]);

impl CookieKey {
    fn generate() -> Self {
        let bytes = random::random_bytes(32);
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        CookieKey(key)
    }
}

fn hmac_sha256(key: &[u8; 32], data: &[&[u8]]) -> [u8; 32] {
    let mut ipad_key = [0x36u8; 64];
    let mut opad_key = [0x5cu8; 64];
    for (i, &byte) in key.iter().enumerate() {
        ipad_key[i] ^= byte;
        opad_key[i] ^= byte;
    }

    let mut inner = Sha256::new();
    inner.update(&ipad_key);
    for chunk in data {
        inner.update(chunk);
    }
    let inner_hash = inner.finalize();

    let mut outer = Sha256::new();
    outer.update(&opad_key);
    outer.update(&inner_hash);
    let digest = outer.finalize();

    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Stateless cookie gate for one `COOKIE`-state sojourn: generates and
/// verifies cookies, and tracks cumulative invalid-cookie bytes for flood
/// pacing.
pub struct CookieGate {
    key: CookieKey,
    cumulative_bytes: AtomicUsize,
}

impl CookieGate {
    /// Start a fresh gate with a new random cookie key.
    pub fn new() -> Self {
        CookieGate {
            key: CookieKey::generate(),
            cumulative_bytes: AtomicUsize::new(0),
        }
    }

    /// Compute the cookie for `client_addr || client_random`.
    pub fn generate(&self, client_addr: &[u8], client_random: &[u8]) -> [u8; COOKIE_SIZE] {
        hmac_sha256(&self.key.0, &[client_addr, client_random])
    }

    /// Verify `cookie` against the expected value for this client, in
    /// constant time.
    pub fn verify(&self, client_addr: &[u8], client_random: &[u8], cookie: &[u8]) -> bool {
        if cookie.len() != COOKIE_SIZE {
            return false;
        }
        let expected = self.generate(client_addr, client_random);
        expected.ct_eq(cookie).into()
    }

    /// Record `bytes` of datagram consumed while in `COOKIE`. If cumulative
    /// consumption has crossed [`FLOOD_THRESHOLD`] since this gate was
    /// created, sleep [`FLOOD_PAUSE`] before returning, pacing a flood of
    /// invalid-cookie traffic.
    pub fn record_and_pace(&self, bytes: usize) {
        let previous = self.cumulative_bytes.fetch_add(bytes, Ordering::Relaxed);
        if previous < FLOOD_THRESHOLD && previous + bytes >= FLOOD_THRESHOLD {
            std::thread::sleep(FLOOD_PAUSE);
        } else if previous >= FLOOD_THRESHOLD {
            std::thread::sleep(FLOOD_PAUSE);
        }
    }

    /// Cumulative bytes recorded so far (test/diagnostic visibility).
    pub fn cumulative_bytes(&self) -> usize {
        self.cumulative_bytes.load(Ordering::Relaxed)
    }
}

impl Default for CookieGate {
    fn default() -> Self {
        Self::new()
    }
}
