//! Handshake driver: priority-string selection, anonymous/certificate key
//! exchange, and anonymous→certificate forced renegotiation.
//!
//! Two priority strings are selectable: a certificate-only one and a full
//! one that offers anonymous ECDH first. Certificate content itself stays
//! opaque (see [`crate::credentials`]); this driver only moves bytes and
//! derives keys.

use std::time::Duration;

use rand::rngs::OsRng;
use subtle::ConstantTimeEq;
use x25519_dalek::{EphemeralSecret, PublicKey};

use crate::credentials::{CredentialKind, Credentials};
use crate::crypto::hkdf::derive_key_with_salt;
use crate::crypto::random;
use crate::error::{SessionError, SessionResult};
use crate::socket::PacketSocket;

/// Which end of the handshake this driver is playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// The two priority strings the handshake driver can select between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityString {
    /// `SECURE192:-VERS-TLS-ALL:+VERS-DTLS-ALL:-RSA:%SERVER_PRECEDENCE:%SAFE_RENEGOTIATION`
    CertificateOnly,
    /// `SECURE192:-KX-ALL:+ANON-ECDH:+ANON-DH:+SECURE192:-VERS-TLS-ALL:+VERS-DTLS-ALL:-RSA:%SERVER_PRECEDENCE:%SAFE_RENEGOTIATION`
    Full,
}

impl PriorityString {
    /// The literal priority string gnutls-style session setup would install.
    pub fn as_str(self) -> &'static str {
        match self {
            PriorityString::CertificateOnly => {
                "SECURE192:-VERS-TLS-ALL:+VERS-DTLS-ALL:-RSA:%SERVER_PRECEDENCE:%SAFE_RENEGOTIATION"
            }
            PriorityString::Full => {
                "SECURE192:-KX-ALL:+ANON-ECDH:+ANON-DH:+SECURE192:-VERS-TLS-ALL:+VERS-DTLS-ALL:-RSA:%SERVER_PRECEDENCE:%SAFE_RENEGOTIATION"
            }
        }
    }

    /// Select the priority string for the requested anonymous-first stance.
    pub fn for_mode(anonymous_first: bool) -> Self {
        if anonymous_first {
            PriorityString::Full
        } else {
            PriorityString::CertificateOnly
        }
    }
}

/// Session keys derived from the handshake, one per direction, each paired
/// with the random nonce prefix that the record layer XORs the record
/// sequence number into.
pub struct SessionKeys {
    pub client_write_key: Vec<u8>,
    pub client_nonce_prefix: [u8; 12],
    pub server_write_key: Vec<u8>,
    pub server_nonce_prefix: [u8; 12],
}

/// Result of a completed handshake round.
pub struct HandshakeOutcome {
    pub negotiated_kind: CredentialKind,
    /// Whether this round's renegotiation-continuity proof checked out
    /// against what this side remembers of the session's prior round (or,
    /// for a session's first round, trivially `true` since there is nothing
    /// to protect continuity with).
    pub safe_renegotiation: bool,
    pub keys: SessionKeys,
    pub peer_certificate_chain: Option<Vec<u8>>,
    /// Continuity proof derived from this round's shared secret and
    /// transcript, carried into whichever handshake round comes next on
    /// this session (internal anonymous→certificate renegotiation, or a
    /// user-requested rehandshake) so both sides can tell a genuine
    /// continuation from an injected one.
    pub finished_verify_data: [u8; 32],
}

const MSG_CLIENT_HELLO: u8 = 1;
const MSG_SERVER_HELLO: u8 = 2;
const MSG_COOKIE_CHALLENGE: u8 = 3;

/// A parsed client hello: random and ephemeral public key, an attached
/// cookie if the client already holds one, an optional client certificate
/// chain for mutual authentication, and an optional renegotiation-proof
/// carried over from a prior round on this session.
pub(crate) struct ClientHello {
    pub client_random: [u8; 32],
    pub client_public: PublicKey,
    pub cookie: Option<Vec<u8>>,
    pub client_cert: Option<Vec<u8>>,
    pub prior_verify_data: Option<[u8; 32]>,
}

fn encode_client_hello(
    client_random: &[u8; 32],
    client_public: &PublicKey,
    cookie: Option<&[u8]>,
    client_cert: Option<&[u8]>,
    prior_verify_data: Option<&[u8; 32]>,
) -> Vec<u8> {
    let cookie = cookie.unwrap_or(&[]);
    let cert = client_cert.unwrap_or(&[]);
    let mut out = Vec::with_capacity(1 + 32 + 32 + 1 + cookie.len() + 4 + cert.len() + 1 + 32);
    out.push(MSG_CLIENT_HELLO);
    out.extend_from_slice(client_random);
    out.extend_from_slice(client_public.as_bytes());
    out.push(cookie.len() as u8);
    out.extend_from_slice(cookie);
    out.extend_from_slice(&(cert.len() as u32).to_be_bytes());
    out.extend_from_slice(cert);
    match prior_verify_data {
        Some(data) => {
            out.push(1);
            out.extend_from_slice(data);
        }
        None => out.push(0),
    }
    out
}

/// Parse a client hello. Exposed to [`crate::session`] so the `COOKIE`-state
/// handler can parse the same wire message the handshake driver produces,
/// without a second round trip once the cookie checks out.
pub(crate) fn decode_client_hello(bytes: &[u8]) -> SessionResult<ClientHello> {
    let malformed = || SessionError::FatalHandshake {
        state: crate::session::fsm::SessionState::Handshake,
        reason: "malformed client hello",
    };
    if bytes.len() < 1 + 32 + 32 + 1 || bytes[0] != MSG_CLIENT_HELLO {
        return Err(malformed());
    }
    let mut client_random = [0u8; 32];
    client_random.copy_from_slice(&bytes[1..33]);
    let mut public_bytes = [0u8; 32];
    public_bytes.copy_from_slice(&bytes[33..65]);
    let cookie_len = bytes[65] as usize;
    let mut offset = 66;
    if bytes.len() < offset + cookie_len {
        return Err(malformed());
    }
    let cookie = if cookie_len == 0 {
        None
    } else {
        Some(bytes[offset..offset + cookie_len].to_vec())
    };
    offset += cookie_len;

    if bytes.len() < offset + 4 {
        return Err(malformed());
    }
    let cert_len = u32::from_be_bytes(bytes[offset..offset + 4].try_into().unwrap()) as usize;
    offset += 4;
    if bytes.len() < offset + cert_len {
        return Err(malformed());
    }
    let client_cert = if cert_len == 0 {
        None
    } else {
        Some(bytes[offset..offset + cert_len].to_vec())
    };
    offset += cert_len;

    if bytes.len() < offset + 1 {
        return Err(malformed());
    }
    let has_prior = bytes[offset] != 0;
    offset += 1;
    let prior_verify_data = if has_prior {
        if bytes.len() != offset + 32 {
            return Err(malformed());
        }
        let mut data = [0u8; 32];
        data.copy_from_slice(&bytes[offset..offset + 32]);
        Some(data)
    } else {
        if bytes.len() != offset {
            return Err(malformed());
        }
        None
    };

    Ok(ClientHello {
        client_random,
        client_public: PublicKey::from(public_bytes),
        cookie,
        client_cert,
        prior_verify_data,
    })
}

pub(crate) fn encode_cookie_challenge(cookie: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + cookie.len());
    out.push(MSG_COOKIE_CHALLENGE);
    out.extend_from_slice(cookie);
    out
}

fn decode_cookie_challenge(bytes: &[u8]) -> Option<Vec<u8>> {
    if bytes.len() > 1 && bytes[0] == MSG_COOKIE_CHALLENGE {
        Some(bytes[1..].to_vec())
    } else {
        None
    }
}

/// A parsed server hello: random, ephemeral public key, the server's
/// renegotiation-proof record for this session (if any), and an optional
/// certificate chain.
struct ServerHello {
    server_random: [u8; 32],
    server_public: PublicKey,
    prior_verify_data: Option<[u8; 32]>,
    certificate_chain: Option<Vec<u8>>,
}

fn encode_server_hello(
    server_random: &[u8; 32],
    server_public: &PublicKey,
    prior_verify_data: Option<&[u8; 32]>,
    certificate_chain: Option<&[u8]>,
) -> Vec<u8> {
    let chain = certificate_chain.unwrap_or(&[]);
    let mut out = Vec::with_capacity(1 + 32 + 32 + 1 + 32 + 4 + chain.len());
    out.push(MSG_SERVER_HELLO);
    out.extend_from_slice(server_random);
    out.extend_from_slice(server_public.as_bytes());
    match prior_verify_data {
        Some(data) => {
            out.push(1);
            out.extend_from_slice(data);
        }
        None => out.push(0),
    }
    out.extend_from_slice(&(chain.len() as u32).to_be_bytes());
    out.extend_from_slice(chain);
    out
}

fn decode_server_hello(bytes: &[u8]) -> SessionResult<ServerHello> {
    let malformed = || SessionError::FatalHandshake {
        state: crate::session::fsm::SessionState::Handshake,
        reason: "malformed server hello",
    };
    if bytes.len() < 1 + 32 + 32 + 1 || bytes[0] != MSG_SERVER_HELLO {
        return Err(malformed());
    }
    let mut server_random = [0u8; 32];
    server_random.copy_from_slice(&bytes[1..33]);
    let mut public_bytes = [0u8; 32];
    public_bytes.copy_from_slice(&bytes[33..65]);
    let has_prior = bytes[65] != 0;
    let mut offset = 66;
    let prior_verify_data = if has_prior {
        if bytes.len() < offset + 32 {
            return Err(malformed());
        }
        let mut data = [0u8; 32];
        data.copy_from_slice(&bytes[offset..offset + 32]);
        offset += 32;
        Some(data)
    } else {
        None
    };

    if bytes.len() < offset + 4 {
        return Err(malformed());
    }
    let chain_len = u32::from_be_bytes(bytes[offset..offset + 4].try_into().unwrap()) as usize;
    offset += 4;
    if bytes.len() != offset + chain_len {
        return Err(malformed());
    }
    let chain = if chain_len == 0 {
        None
    } else {
        Some(bytes[offset..offset + chain_len].to_vec())
    };
    Ok(ServerHello {
        server_random,
        server_public: PublicKey::from(public_bytes),
        prior_verify_data,
        certificate_chain: chain,
    })
}

fn derive_session_keys(shared_secret: &[u8], client_random: &[u8], server_random: &[u8]) -> SessionKeys {
    let salt = [client_random, server_random].concat();
    let expand = |info: &[u8], len: usize| {
        derive_key_with_salt(&salt, &[shared_secret], info, len)
            .expect("fixed-length hkdf expand cannot fail")
    };

    let client_write_key = expand(b"dtls session client write key", 32);
    let server_write_key = expand(b"dtls session server write key", 32);
    let client_nonce_prefix_vec = expand(b"dtls session client nonce prefix", 12);
    let server_nonce_prefix_vec = expand(b"dtls session server nonce prefix", 12);

    let mut client_nonce_prefix = [0u8; 12];
    client_nonce_prefix.copy_from_slice(&client_nonce_prefix_vec);
    let mut server_nonce_prefix = [0u8; 12];
    server_nonce_prefix.copy_from_slice(&server_nonce_prefix_vec);

    SessionKeys {
        client_write_key,
        client_nonce_prefix,
        server_write_key,
        server_nonce_prefix,
    }
}

/// Derive the renegotiation-continuity proof for this round: bound to the
/// round's own shared secret and transcript, so a party that wasn't privy to
/// the real key exchange can't fabricate one for a later round.
fn derive_finished_verify_data(
    shared_secret: &[u8],
    client_random: &[u8],
    server_random: &[u8],
) -> [u8; 32] {
    let salt = [client_random, server_random].concat();
    let bytes = derive_key_with_salt(&salt, &[shared_secret], b"dtls session finished verify data", 32)
        .expect("fixed-length hkdf expand cannot fail");
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    out
}

/// Whether a renegotiation-continuity check passes: trivially true for a
/// session's first round (nothing to protect continuity with), true if both
/// sides independently hold the same prior-round proof, and unsafe on any
/// mismatch including one side believing this is a continuation and the
/// other not.
fn safe_renegotiation_check(mine: Option<[u8; 32]>, theirs: Option<[u8; 32]>) -> bool {
    match (mine, theirs) {
        (None, None) => true,
        (Some(a), Some(b)) => a.ct_eq(&b).into(),
        _ => false,
    }
}

/// Drives one handshake round over a [`PacketSocket`], as either client or
/// server.
pub struct HandshakeDriver<'a> {
    socket: &'a dyn PacketSocket,
    role: Role,
}

impl<'a> HandshakeDriver<'a> {
    pub fn new(socket: &'a dyn PacketSocket, role: Role) -> Self {
        HandshakeDriver { socket, role }
    }

    /// Run one handshake to completion: client side.
    ///
    /// When `use_cookie` is set, the client first sends a bare client hello
    /// and, if challenged, resends it with the cookie attached before the
    /// real server hello arrives — this is only needed on first contact
    /// with a server in `COOKIE`; a renegotiation round skips it.
    ///
    /// `verify_certificate` is invoked with the peer's raw certificate chain
    /// bytes when the negotiated credentials are certificate-based; a
    /// `false` return rejects the handshake. `local_cert` is this client's
    /// own certificate chain, sent for the server to verify when mutually
    /// authenticating; `None` if this client only verifies the server.
    /// `prior_verify_data` is the continuity proof from this session's
    /// previous round, if any.
    pub fn run_client(
        &self,
        timeout: Duration,
        verify_certificate: Option<&dyn Fn(&[u8]) -> bool>,
        use_cookie: bool,
        local_cert: Option<&[u8]>,
        prior_verify_data: Option<[u8; 32]>,
    ) -> SessionResult<HandshakeOutcome> {
        let client_random = random_32();
        let client_secret = EphemeralSecret::random_from_rng(OsRng);
        let client_public = PublicKey::from(&client_secret);

        let mut cookie: Option<Vec<u8>> = None;
        let response = loop {
            self.socket
                .send_to(&encode_client_hello(
                    &client_random,
                    &client_public,
                    cookie.as_deref(),
                    local_cert,
                    prior_verify_data.as_ref(),
                ))
                .map_err(|_| SessionError::Transient("client hello send failed"))?;

            let reply = self
                .socket
                .recv_timeout(timeout)
                .ok_or(SessionError::Timeout("handshake"))?;

            if use_cookie && cookie.is_none() {
                if let Some(challenge) = decode_cookie_challenge(&reply) {
                    cookie = Some(challenge);
                    continue;
                }
            }
            break reply;
        };
        let server_hello = decode_server_hello(&response)?;

        let shared = client_secret.diffie_hellman(&server_hello.server_public);
        let keys = derive_session_keys(shared.as_bytes(), &client_random, &server_hello.server_random);
        let finished_verify_data =
            derive_finished_verify_data(shared.as_bytes(), &client_random, &server_hello.server_random);

        let negotiated_kind = if let Some(chain) = &server_hello.certificate_chain {
            if let Some(verify) = verify_certificate {
                if !verify(chain) {
                    return Err(SessionError::CertificateRejected);
                }
            }
            CredentialKind::Certificate
        } else {
            CredentialKind::Anonymous
        };

        let safe_renegotiation =
            safe_renegotiation_check(prior_verify_data, server_hello.prior_verify_data);

        Ok(HandshakeOutcome {
            negotiated_kind,
            safe_renegotiation,
            keys,
            peer_certificate_chain: server_hello.certificate_chain,
            finished_verify_data,
        })
    }

    /// Run one handshake to completion: server side, with the given
    /// installed credentials determining whether certificate material is
    /// offered. Used standalone (no cookie gate) and for the
    /// anonymous→certificate renegotiation round.
    pub fn run_server(
        &self,
        credentials: &Credentials,
        timeout: Duration,
        verify_certificate: Option<&dyn Fn(&[u8]) -> bool>,
        prior_verify_data: Option<[u8; 32]>,
    ) -> SessionResult<HandshakeOutcome> {
        let request = self
            .socket
            .recv_timeout(timeout)
            .ok_or(SessionError::Timeout("handshake"))?;
        let client_hello = decode_client_hello(&request)?;
        self.complete_server(credentials, &client_hello, verify_certificate, prior_verify_data)
    }

    /// Complete the server side of a handshake whose client hello has
    /// already been received and validated elsewhere (the `COOKIE`-state
    /// handler, which consumes the cookie-bearing client hello itself).
    ///
    /// When `credentials` is certificate-based and the client presented a
    /// chain, `verify_certificate` is invoked to check it; clients that only
    /// verify the server (no `client_cert`) are still accepted, matching
    /// [`crate::credentials::CertificateCredentials`]'s optional local chain.
    pub fn complete_server(
        &self,
        credentials: &Credentials,
        client_hello: &ClientHello,
        verify_certificate: Option<&dyn Fn(&[u8]) -> bool>,
        prior_verify_data: Option<[u8; 32]>,
    ) -> SessionResult<HandshakeOutcome> {
        if credentials.kind() == CredentialKind::Certificate {
            if let Some(chain) = &client_hello.client_cert {
                if let Some(verify) = verify_certificate {
                    if !verify(chain) {
                        return Err(SessionError::CertificateRejected);
                    }
                }
            }
        }

        let server_random = random_32();
        let server_secret = EphemeralSecret::random_from_rng(OsRng);
        let server_public = PublicKey::from(&server_secret);

        let certificate_chain = match credentials {
            Credentials::Anonymous => None,
            Credentials::Certificate(bundle) => {
                bundle.local_chain.as_ref().map(|c| c.certificate_chain.clone())
            }
        };

        let safe_renegotiation =
            safe_renegotiation_check(prior_verify_data, client_hello.prior_verify_data);

        self.socket
            .send_to(&encode_server_hello(
                &server_random,
                &server_public,
                prior_verify_data.as_ref(),
                certificate_chain.as_deref(),
            ))
            .map_err(|_| SessionError::Transient("server hello send failed"))?;

        let shared = server_secret.diffie_hellman(&client_hello.client_public);
        let keys = derive_session_keys(shared.as_bytes(), &client_hello.client_random, &server_random);
        let finished_verify_data =
            derive_finished_verify_data(shared.as_bytes(), &client_hello.client_random, &server_random);

        Ok(HandshakeOutcome {
            negotiated_kind: credentials.kind(),
            safe_renegotiation,
            keys,
            peer_certificate_chain: client_hello.client_cert.clone(),
            finished_verify_data,
        })
    }

    /// Which role this driver is playing.
    pub fn role(&self) -> Role {
        self.role
    }
}

fn random_32() -> [u8; 32] {
    let bytes = random::random_bytes(32);
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    out
}
