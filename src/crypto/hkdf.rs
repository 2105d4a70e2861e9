//! HKDF-SHA256 key derivation for the handshake and record layers.

use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::{SessionError, SessionResult};

/// Derive `output_length` bytes of key material from `input_key_material`
/// (concatenated) and domain-separated by `info`, with an empty salt.
pub fn derive_key(
    input_key_material: &[&[u8]],
    info: &[u8],
    output_length: usize,
) -> SessionResult<Vec<u8>> {
    derive_key_with_salt(&[], input_key_material, info, output_length)
}

/// Same as [`derive_key`] but with an explicit salt.
pub fn derive_key_with_salt(
    salt: &[u8],
    input_key_material: &[&[u8]],
    info: &[u8],
    output_length: usize,
) -> SessionResult<Vec<u8>> {
    let mut ikm = Vec::new();
    for material in input_key_material {
        ikm.extend_from_slice(material);
    }

    let salt = if salt.is_empty() { None } else { Some(salt) };
    let hkdf = Hkdf::<Sha256>::new(salt, &ikm);

    let mut output = vec![0u8; output_length];
    hkdf.expand(info, &mut output)
        .map_err(|_| SessionError::Resource("hkdf expand output too large"))?;

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_same_input() {
        let ikm = b"shared secret";
        let key1 = derive_key(&[ikm], b"session-key", 32).unwrap();
        let key2 = derive_key(&[ikm], b"session-key", 32).unwrap();
        assert_eq!(key1, key2);
        assert_eq!(key1.len(), 32);
    }

    #[test]
    fn different_info_different_output() {
        let ikm = b"shared secret";
        let key1 = derive_key(&[ikm], b"client-to-server", 32).unwrap();
        let key2 = derive_key(&[ikm], b"server-to-client", 32).unwrap();
        assert_ne!(key1, key2);
    }

    #[test]
    fn salt_changes_output() {
        let ikm = b"shared secret";
        let key1 = derive_key_with_salt(b"salt-a", &[ikm], b"info", 32).unwrap();
        let key2 = derive_key_with_salt(b"salt-b", &[ikm], b"info", 32).unwrap();
        assert_ne!(key1, key2);
    }

    #[test]
    fn multiple_ikm_sources_are_concatenated() {
        let key_concat = derive_key(&[b"ab"], b"info", 32).unwrap();
        let key_split = derive_key(&[b"a", b"b"], b"info", 32).unwrap();
        assert_eq!(key_concat, key_split);
    }
}
