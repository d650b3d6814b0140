/*!
# UMICP Security Manager

Key lifecycle, signing, and authenticated payload encryption for one local
node identity.

The manager walks a strict state machine:

```text
UNINITIALISED -(generate_keypair | load_private_key)-> KEYED
KEYED         -(set_peer_public_key)                -> PEERED
PEERED        -(establish_session)                  -> SESSION
SESSION       -(close_session)                      -> PEERED
```

Key material layout: the 32-byte private key is a seed from which both the
Ed25519 signing key and the X25519 static secret (SHA-256 of the seed) are
derived. The 64-byte public identity is `ed25519 verifying key (32) ||
x25519 public key (32)`. Two peers holding each other's public identities
derive the same session key: HKDF-SHA256 over the X25519 shared secret,
with the two node ids in lexicographic order as context.

The manager is not thread-safe; callers serialise access externally
(typically one manager per protocol instance).
*/

use crate::error::{Result, UmicpError};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use tracing::debug;
use x25519_dalek::{PublicKey as KxPublicKey, StaticSecret};
use zeroize::Zeroizing;

/// Private key length in bytes
pub const PRIVATE_KEY_SIZE: usize = 32;

/// Public identity length in bytes: verifying key plus key-exchange key
pub const PUBLIC_KEY_SIZE: usize = 64;

/// Session key length in bytes
pub const SESSION_KEY_SIZE: usize = 32;

/// Detached signature length in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// AEAD nonce length prepended to every ciphertext
pub const NONCE_SIZE: usize = 12;

/// AEAD authentication tag length appended to every ciphertext
pub const TAG_SIZE: usize = 16;

/// Lifecycle state of a [`SecurityManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityState {
    Uninitialised,
    Keyed,
    Peered,
    Session,
}

struct LocalKeys {
    signing_key: SigningKey,
    kx_secret: StaticSecret,
    public_key: [u8; PUBLIC_KEY_SIZE],
}

struct PeerKeys {
    verify_key: VerifyingKey,
    kx_public: KxPublicKey,
}

/// Security manager bound to a `local_id`
pub struct SecurityManager {
    local_id: String,
    local: Option<LocalKeys>,
    peer: Option<PeerKeys>,
    session_key: Option<Zeroizing<[u8; SESSION_KEY_SIZE]>>,
    peer_id: Option<String>,
    authenticated: bool,
}

impl SecurityManager {
    pub fn new(local_id: &str) -> Self {
        SecurityManager {
            local_id: local_id.to_string(),
            local: None,
            peer: None,
            session_key: None,
            peer_id: None,
            authenticated: false,
        }
    }

    /// The node identity this manager signs for
    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Current lifecycle state
    pub fn state(&self) -> SecurityState {
        if self.session_key.is_some() {
            SecurityState::Session
        } else if self.peer.is_some() {
            SecurityState::Peered
        } else if self.local.is_some() {
            SecurityState::Keyed
        } else {
            SecurityState::Uninitialised
        }
    }

    /// Whether a session key is established
    pub fn has_session(&self) -> bool {
        self.session_key.is_some()
    }

    /// Whether the peer authenticated during session establishment
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Peer id recorded at session establishment
    pub fn peer_id(&self) -> Option<&str> {
        self.peer_id.as_deref()
    }

    /// The 64-byte public identity to hand to peers, once keyed
    pub fn public_key(&self) -> Option<[u8; PUBLIC_KEY_SIZE]> {
        self.local.as_ref().map(|keys| keys.public_key)
    }

    /// Generate a fresh local keypair. Any prior session and peer binding
    /// is invalidated.
    pub fn generate_keypair(&mut self) -> Result<()> {
        let mut seed = Zeroizing::new([0u8; PRIVATE_KEY_SIZE]);
        OsRng.fill_bytes(&mut seed[..]);
        self.install_seed(&seed);
        Ok(())
    }

    /// Load a 32-byte private key and derive the matching public identity.
    /// Any prior session and peer binding is invalidated.
    pub fn load_private_key(&mut self, key_data: &[u8]) -> Result<()> {
        if key_data.len() != PRIVATE_KEY_SIZE {
            return Err(UmicpError::invalid_argument(format!(
                "Private key must be {} bytes, got {}",
                PRIVATE_KEY_SIZE,
                key_data.len()
            )));
        }
        let mut seed = Zeroizing::new([0u8; PRIVATE_KEY_SIZE]);
        seed.copy_from_slice(key_data);
        self.install_seed(&seed);
        Ok(())
    }

    fn install_seed(&mut self, seed: &[u8; PRIVATE_KEY_SIZE]) {
        self.drop_session();
        self.peer = None;

        let signing_key = SigningKey::from_bytes(seed);
        let kx_secret = StaticSecret::from(crate::utils::sha256_raw(seed));

        let mut public_key = [0u8; PUBLIC_KEY_SIZE];
        public_key[..32].copy_from_slice(signing_key.verifying_key().as_bytes());
        public_key[32..].copy_from_slice(KxPublicKey::from(&kx_secret).as_bytes());

        self.local = Some(LocalKeys {
            signing_key,
            kx_secret,
            public_key,
        });
    }

    /// Bind the peer's 64-byte public identity. Requires local keys; not
    /// permitted while a session is open.
    pub fn set_peer_public_key(&mut self, public_key: &[u8]) -> Result<()> {
        if public_key.len() != PUBLIC_KEY_SIZE {
            return Err(UmicpError::invalid_argument(format!(
                "Peer public key must be {} bytes, got {}",
                PUBLIC_KEY_SIZE,
                public_key.len()
            )));
        }
        if self.local.is_none() {
            return Err(UmicpError::authentication(
                "Local keys must exist before binding a peer key",
            ));
        }
        if self.session_key.is_some() {
            return Err(UmicpError::authentication(
                "Close the active session before changing peer keys",
            ));
        }

        let verify_bytes: [u8; 32] = public_key[..32].try_into().expect("32-byte slice");
        let verify_key = VerifyingKey::from_bytes(&verify_bytes).map_err(|e| {
            UmicpError::invalid_argument(format!("Peer verifying key is invalid: {}", e))
        })?;
        let kx_bytes: [u8; 32] = public_key[32..].try_into().expect("32-byte slice");

        self.peer = Some(PeerKeys {
            verify_key,
            kx_public: KxPublicKey::from(kx_bytes),
        });
        Ok(())
    }

    /// Sign `data` with the local identity. Requires at least KEYED state.
    pub fn sign_data(&self, data: &[u8]) -> Result<Vec<u8>> {
        let local = self
            .local
            .as_ref()
            .ok_or_else(|| UmicpError::authentication("No local keys generated"))?;
        if data.is_empty() {
            return Err(UmicpError::invalid_argument("Cannot sign empty data"));
        }
        Ok(local.signing_key.sign(data).to_bytes().to_vec())
    }

    /// Verify a detached signature against the bound peer identity.
    /// Requires PEERED state.
    pub fn verify_signature(&self, data: &[u8], signature: &[u8]) -> Result<bool> {
        let peer = self
            .peer
            .as_ref()
            .ok_or_else(|| UmicpError::authentication("No peer public key set"))?;
        if signature.len() != SIGNATURE_SIZE {
            return Err(UmicpError::invalid_argument(format!(
                "Signature must be {} bytes, got {}",
                SIGNATURE_SIZE,
                signature.len()
            )));
        }
        let sig_bytes: [u8; SIGNATURE_SIZE] = signature.try_into().expect("64-byte slice");
        let signature = Signature::from_bytes(&sig_bytes);
        Ok(peer.verify_key.verify(data, &signature).is_ok())
    }

    /// Derive the symmetric session key from the X25519 shared secret.
    /// Requires PEERED state. Both sides converge on the same key when
    /// holding each other's public identities.
    pub fn establish_session(&mut self, peer_id: &str) -> Result<()> {
        let local = self
            .local
            .as_ref()
            .ok_or_else(|| UmicpError::authentication("No local keys generated"))?;
        let peer = self
            .peer
            .as_ref()
            .ok_or_else(|| UmicpError::authentication("No peer public key set"))?;

        let shared = local.kx_secret.diffie_hellman(&peer.kx_public);

        // Order the two ids lexicographically so both peers feed identical
        // context into the KDF.
        let (first, second) = if self.local_id.as_str() <= peer_id {
            (self.local_id.as_str(), peer_id)
        } else {
            (peer_id, self.local_id.as_str())
        };
        let mut info = Vec::with_capacity(first.len() + second.len() + 1);
        info.extend_from_slice(first.as_bytes());
        info.push(0);
        info.extend_from_slice(second.as_bytes());

        let hkdf = Hkdf::<Sha256>::new(None, shared.as_bytes());
        let mut session_key = Zeroizing::new([0u8; SESSION_KEY_SIZE]);
        hkdf.expand(&info, &mut session_key[..])
            .map_err(|_| UmicpError::authentication("Session key derivation failed"))?;

        self.session_key = Some(session_key);
        self.peer_id = Some(peer_id.to_string());
        self.authenticated = true;
        debug!(peer = peer_id, "session established");
        Ok(())
    }

    /// Authenticated encryption of `plaintext`. Output layout:
    /// `nonce(12) || ciphertext || tag(16)`. Requires SESSION state.
    pub fn encrypt_data(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let session_key = self
            .session_key
            .as_ref()
            .ok_or_else(|| UmicpError::authentication("No session established"))?;

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&session_key[..]));
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| UmicpError::authentication("AEAD encryption failed"))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Authenticated decryption. The tag is verified in constant time; any
    /// mismatch fails with `DECRYPTION_FAILED`. Requires SESSION state.
    pub fn decrypt_data(&self, data: &[u8]) -> Result<Vec<u8>> {
        let session_key = self
            .session_key
            .as_ref()
            .ok_or_else(|| UmicpError::authentication("No session established"))?;
        if data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(UmicpError::invalid_argument(format!(
                "Ciphertext of {} bytes is shorter than nonce plus tag",
                data.len()
            )));
        }

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&session_key[..]));
        let nonce = Nonce::from_slice(&data[..NONCE_SIZE]);
        cipher
            .decrypt(nonce, &data[NONCE_SIZE..])
            .map_err(|_| UmicpError::decryption("Authentication tag mismatch"))
    }

    /// Securely erase the session key and drop the peer association. The
    /// peer public key stays bound, so a new session can be established
    /// without re-exchanging keys.
    pub fn close_session(&mut self) {
        self.drop_session();
        debug!("session closed");
    }

    fn drop_session(&mut self) {
        // Zeroizing overwrites the key bytes on drop
        self.session_key = None;
        self.peer_id = None;
        self.authenticated = false;
    }
}

impl Drop for SecurityManager {
    fn drop(&mut self) {
        self.drop_session();
    }
}
