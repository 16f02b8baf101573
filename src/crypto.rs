use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use log::debug;
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;

use crate::key::RoomKey;

/// Length of the per-message AES-GCM nonce.
pub const IV_LEN: usize = 12;
/// Length of the GCM authentication tag appended to every ciphertext.
pub const TAG_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionError,
    #[error("Authentication failed")]
    AuthenticationFailed,
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(&'static str),
    #[error("Decrypted payload is not valid UTF-8")]
    InvalidUtf8,
    #[error("Secure random source unavailable: {0}")]
    RandomUnavailable(String),
}

/// Platform primitives the codec is built on.
///
/// The default [`OsCryptoProvider`] uses the operating system RNG and
/// AES-256-GCM; other platforms can substitute their own equivalents.
pub trait CryptoProvider: Send + Sync {
    /// Fill `buf` from a cryptographically secure source. Never falls back
    /// to a weaker generator.
    fn fill_random(&self, buf: &mut [u8]) -> Result<(), CryptoError>;

    /// AEAD-encrypt `plaintext`, returning `ciphertext || tag`.
    fn seal(&self, key: &[u8; 32], iv: &[u8; IV_LEN], plaintext: &[u8])
        -> Result<Vec<u8>, CryptoError>;

    /// AEAD-decrypt `ciphertext || tag`.
    fn open(&self, key: &[u8; 32], iv: &[u8; IV_LEN], ciphertext: &[u8])
        -> Result<Vec<u8>, CryptoError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OsCryptoProvider;

impl CryptoProvider for OsCryptoProvider {
    fn fill_random(&self, buf: &mut [u8]) -> Result<(), CryptoError> {
        OsRng
            .try_fill_bytes(buf)
            .map_err(|e| CryptoError::RandomUnavailable(e.to_string()))
    }

    fn seal(
        &self,
        key: &[u8; 32],
        iv: &[u8; IV_LEN],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        cipher
            .encrypt(Nonce::from_slice(iv), plaintext)
            .map_err(|_| CryptoError::EncryptionError)
    }

    fn open(
        &self,
        key: &[u8; 32],
        iv: &[u8; IV_LEN],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        cipher
            .decrypt(Nonce::from_slice(iv), ciphertext)
            .map_err(|_| CryptoError::AuthenticationFailed)
    }
}

/// A sealed message as carried in the `text` field: `<ivHex>:<cipherHex>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    iv: [u8; IV_LEN],
    ciphertext: Vec<u8>,
}

impl Envelope {
    pub fn iv(&self) -> &[u8; IV_LEN] {
        &self.iv
    }

    /// Ciphertext with the authentication tag appended.
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", hex::encode(self.iv), hex::encode(&self.ciphertext))
    }
}

impl FromStr for Envelope {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (iv_hex, cipher_hex) = s
            .split_once(':')
            .ok_or(CryptoError::MalformedEnvelope("missing separator"))?;
        if iv_hex.is_empty() || cipher_hex.is_empty() {
            return Err(CryptoError::MalformedEnvelope("empty segment"));
        }

        let iv_bytes =
            hex::decode(iv_hex).map_err(|_| CryptoError::MalformedEnvelope("iv is not hex"))?;
        let iv: [u8; IV_LEN] = iv_bytes
            .try_into()
            .map_err(|_| CryptoError::MalformedEnvelope("iv must be 12 bytes"))?;
        let ciphertext = hex::decode(cipher_hex)
            .map_err(|_| CryptoError::MalformedEnvelope("ciphertext is not hex"))?;

        Ok(Self { iv, ciphertext })
    }
}

/// Result of trying to read one message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Opened {
    Plaintext(String),
    /// Malformed envelope, wrong key or tampered ciphertext. Callers cannot
    /// tell these apart.
    DecryptionFailed,
    /// No key is held, so decryption was not attempted.
    KeyAbsent,
}

/// Seals and opens message payloads under a room key.
#[derive(Clone)]
pub struct CryptoCodec {
    provider: Arc<dyn CryptoProvider>,
}

impl Default for CryptoCodec {
    fn default() -> Self {
        Self::new(Arc::new(OsCryptoProvider))
    }
}

impl CryptoCodec {
    pub fn new(provider: Arc<dyn CryptoProvider>) -> Self {
        Self { provider }
    }

    pub fn seal(&self, plaintext: &str, key: &RoomKey) -> Result<Envelope, CryptoError> {
        let mut iv = [0u8; IV_LEN];
        self.provider.fill_random(&mut iv)?;

        let ciphertext = self.provider.seal(key.as_bytes(), &iv, plaintext.as_bytes())?;
        Ok(Envelope { iv, ciphertext })
    }

    pub fn open_envelope(&self, envelope: &Envelope, key: &RoomKey) -> Result<String, CryptoError> {
        let plaintext = self
            .provider
            .open(key.as_bytes(), &envelope.iv, &envelope.ciphertext)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidUtf8)
    }

    /// Open the wire form of a message body.
    ///
    /// Malformed and forged envelopes collapse into the same
    /// [`Opened::DecryptionFailed`]; only the debug log tells them apart.
    pub fn open(&self, text: &str, key: Option<&RoomKey>) -> Opened {
        let Some(key) = key else {
            return Opened::KeyAbsent;
        };

        let result = text
            .parse::<Envelope>()
            .and_then(|envelope| self.open_envelope(&envelope, key));

        match result {
            Ok(plaintext) => Opened::Plaintext(plaintext),
            Err(e) => {
                debug!("envelope rejected under key {}: {}", key.fingerprint(), e);
                Opened::DecryptionFailed
            }
        }
    }

    /// Wire form for an outgoing message. Without a key the text goes out
    /// unencrypted.
    pub fn outgoing(&self, text: &str, key: Option<&RoomKey>) -> Result<String, CryptoError> {
        match key {
            Some(key) => Ok(self.seal(text, key)?.to_string()),
            None => Ok(text.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn key_a1() -> RoomKey {
        "a1".repeat(32).parse().unwrap()
    }

    struct NoEntropy;

    impl CryptoProvider for NoEntropy {
        fn fill_random(&self, _buf: &mut [u8]) -> Result<(), CryptoError> {
            Err(CryptoError::RandomUnavailable("no entropy".into()))
        }

        fn seal(&self, key: &[u8; 32], iv: &[u8; IV_LEN], pt: &[u8]) -> Result<Vec<u8>, CryptoError> {
            OsCryptoProvider.seal(key, iv, pt)
        }

        fn open(&self, key: &[u8; 32], iv: &[u8; IV_LEN], ct: &[u8]) -> Result<Vec<u8>, CryptoError> {
            OsCryptoProvider.open(key, iv, ct)
        }
    }

    #[test]
    fn seal_hello_with_a1_key() {
        let codec = CryptoCodec::default();
        let key = key_a1();

        let wire = codec.seal("hello", &key).unwrap().to_string();
        let (iv_hex, cipher_hex) = wire.split_once(':').unwrap();
        assert_eq!(iv_hex.len(), 24);
        // 5 bytes of text plus the 16 byte tag
        assert_eq!(cipher_hex.len(), (5 + TAG_LEN) * 2);
        assert!(wire.chars().all(|c| c == ':' || c.is_ascii_digit() || ('a'..='f').contains(&c)));

        assert_eq!(codec.open(&wire, Some(&key)), Opened::Plaintext("hello".into()));

        let other: RoomKey = "b2".repeat(32).parse().unwrap();
        assert_eq!(codec.open(&wire, Some(&other)), Opened::DecryptionFailed);
    }

    #[test]
    fn single_bit_flip_is_detected() {
        let codec = CryptoCodec::default();
        let key = key_a1();
        let envelope = codec.seal("attack at dawn", &key).unwrap();

        let mut ciphertext = envelope.ciphertext().to_vec();
        ciphertext[3] ^= 0x01;
        let tampered = format!("{}:{}", hex::encode(envelope.iv()), hex::encode(&ciphertext));

        assert_eq!(codec.open(&tampered, Some(&key)), Opened::DecryptionFailed);
    }

    #[test]
    fn flipped_tag_bit_is_detected() {
        let codec = CryptoCodec::default();
        let key = key_a1();
        let envelope = codec.seal("x", &key).unwrap();

        let mut ciphertext = envelope.ciphertext().to_vec();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0x80;
        let tampered = format!("{}:{}", hex::encode(envelope.iv()), hex::encode(&ciphertext));

        assert_eq!(codec.open(&tampered, Some(&key)), Opened::DecryptionFailed);
    }

    #[test]
    fn malformed_envelopes_never_reach_the_cipher() {
        let codec = CryptoCodec::default();
        let key = key_a1();

        for wire in [
            "",
            "no-separator",
            ":abcd",
            "000000000000000000000000:",
            "zz0000000000000000000000:abcd",
            "000000000000000000000000:not-hex",
            "0000:abcdabcd",
            "000000000000000000000000:abc",
        ] {
            assert_eq!(codec.open(wire, Some(&key)), Opened::DecryptionFailed, "{wire:?}");
        }

        assert!(matches!(
            "0000:abcd".parse::<Envelope>(),
            Err(CryptoError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn open_without_key_is_key_absent() {
        let codec = CryptoCodec::default();
        let wire = codec.seal("hi", &key_a1()).unwrap().to_string();

        assert_eq!(codec.open(&wire, None), Opened::KeyAbsent);
        assert_eq!(codec.open("garbage", None), Opened::KeyAbsent);
    }

    #[test]
    fn nonces_do_not_repeat() {
        let codec = CryptoCodec::default();
        let key = key_a1();

        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let envelope = codec.seal("same", &key).unwrap();
            assert!(seen.insert(*envelope.iv()));
        }
    }

    #[test]
    fn seal_fails_without_entropy() {
        let codec = CryptoCodec::new(Arc::new(NoEntropy));
        assert!(matches!(
            codec.seal("hi", &key_a1()),
            Err(CryptoError::RandomUnavailable(_))
        ));
    }

    #[test]
    fn outgoing_without_key_is_raw() {
        let codec = CryptoCodec::default();
        assert_eq!(codec.outgoing("plain", None).unwrap(), "plain");

        let key = key_a1();
        let wire = codec.outgoing("plain", Some(&key)).unwrap();
        assert_ne!(wire, "plain");
        assert_eq!(codec.open(&wire, Some(&key)), Opened::Plaintext("plain".into()));
    }

    #[test]
    fn envelope_display_parses_back() {
        let codec = CryptoCodec::default();
        let envelope = codec.seal("🔥 ünïcödé", &key_a1()).unwrap();
        let parsed: Envelope = envelope.to_string().parse().unwrap();
        assert_eq!(parsed, envelope);
    }
}
