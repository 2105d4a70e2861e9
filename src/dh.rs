//! Owned Diffie-Hellman parameter material.
//!
//! Real DH parameter generation (choosing a safe prime and generator) is out
//! of scope here — the design specifies only that this type produce opaque
//! material suitable as server key-exchange input, exclusively owned by a
//! small wrapper whose destruction releases it, mirroring the credential and
//! key-material handles elsewhere in this crate.

use std::sync::mpsc::Receiver;
use std::time::Duration;

use zeroize::Zeroize;

use crate::crypto::random;
use crate::error::{SessionError, SessionResult};

/// Opaque DH parameter material, owned exclusively by this handle.
///
/// Cloning is intentionally not derived: callers that need a second owner
/// must go through [`DhParams::deep_copy`], matching the "copies go through
/// deep-copy primitives only" design rule for owned native handles.
pub struct DhParams {
    material: Vec<u8>,
}

impl DhParams {
    /// Generate fresh opaque DH material of the conventional 2048-bit
    /// (256-byte) size class.
    pub fn generate() -> Self {
        DhParams {
            material: random::random_bytes(256),
        }
    }

    /// Reconstruct from previously serialized bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        DhParams {
            material: bytes.to_vec(),
        }
    }

    /// Serialize to bytes suitable for the X.509/anonymous credential setup
    /// step to consume as server KX input.
    pub fn to_bytes(&self) -> &[u8] {
        &self.material
    }

    /// Explicit deep copy; the only supported way to duplicate DH material.
    pub fn deep_copy(&self) -> Self {
        DhParams {
            material: self.material.clone(),
        }
    }
}

impl Drop for DhParams {
    fn drop(&mut self) {
        self.material.zeroize();
    }
}

impl std::fmt::Debug for DhParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DhParams([REDACTED; {} bytes])", self.material.len())
    }
}

/// A future/promise of DH parameters, resolved by a background generator.
/// Resolving may block the caller (typically the FSM worker during `SETUP`)
/// until the generator completes or the given timeout elapses.
pub struct DhParamsFuture {
    rx: Receiver<DhParams>,
}

impl DhParamsFuture {
    /// Wrap a channel receiver that will eventually yield the generated
    /// parameters.
    pub fn new(rx: Receiver<DhParams>) -> Self {
        DhParamsFuture { rx }
    }

    /// Spawn a background thread generating fresh parameters immediately,
    /// returning a future over its result. Convenience for callers that
    /// don't have an existing generation pipeline.
    pub fn spawn_generate() -> Self {
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(DhParams::generate());
        });
        DhParamsFuture { rx }
    }

    /// Block until the parameters are ready or `timeout` elapses.
    pub fn resolve(self, timeout: Duration) -> SessionResult<DhParams> {
        self.rx
            .recv_timeout(timeout)
            .map_err(|_| SessionError::Resource("dh parameter generation timed out"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_produces_nonempty_material() {
        let params = DhParams::generate();
        assert_eq!(params.to_bytes().len(), 256);
    }

    #[test]
    fn round_trips_through_bytes() {
        let params = DhParams::generate();
        let bytes = params.to_bytes().to_vec();
        let restored = DhParams::from_bytes(&bytes);
        assert_eq!(restored.to_bytes(), bytes.as_slice());
    }

    #[test]
    fn deep_copy_is_independent() {
        let params = DhParams::generate();
        let copy = params.deep_copy();
        assert_eq!(params.to_bytes(), copy.to_bytes());
    }

    #[test]
    fn future_resolves_with_generated_material() {
        let future = DhParamsFuture::spawn_generate();
        let params = future.resolve(Duration::from_secs(5)).unwrap();
        assert_eq!(params.to_bytes().len(), 256);
    }

    #[test]
    fn future_times_out_when_never_sent() {
        let (_tx, rx) = std::sync::mpsc::channel();
        let future = DhParamsFuture::new(rx);
        let result = future.resolve(Duration::from_millis(20));
        assert!(result.is_err());
    }
}
