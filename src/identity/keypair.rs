//! Keypair generation, marshaling, signing and verification (§4.2).

use ed25519_dalek::{Signer as _, Verifier as _};
use p256::ecdsa::signature::{Signer as EcdsaSigner, Verifier as EcdsaVerifier};
use rsa::pkcs1v15::{SigningKey as RsaSigningKey, VerifyingKey as RsaVerifyingKey};
use rsa::sha2::Sha256 as RsaSha256;
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier as RsaVerifierTrait};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::error::Error;

const MIN_RSA_BITS: usize = 2048;
const MAX_RSA_BITS: usize = 8192;

/// Tag identifying a key's algorithm on the wire (§6 crypto key envelope).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyType {
    Rsa = 0,
    Ed25519 = 1,
    Secp256k1 = 2,
    Ecdsa = 3,
}

impl KeyType {
    fn from_tag(tag: u8) -> Result<Self, Error> {
        Ok(match tag {
            0 => KeyType::Rsa,
            1 => KeyType::Ed25519,
            2 => KeyType::Secp256k1,
            3 => KeyType::Ecdsa,
            _ => return Err(Error::InvalidFormat(format!("unknown key type tag {tag}"))),
        })
    }
}

/// A public key, tagged by algorithm.
#[derive(Debug, Clone)]
pub enum PublicKey {
    Ed25519(ed25519_dalek::VerifyingKey),
    Rsa(RsaPublicKey),
    Ecdsa(p256::ecdsa::VerifyingKey),
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.marshal() == other.marshal()
    }
}
impl Eq for PublicKey {}

impl PublicKey {
    pub fn key_type(&self) -> KeyType {
        match self {
            PublicKey::Ed25519(_) => KeyType::Ed25519,
            PublicKey::Rsa(_) => KeyType::Rsa,
            PublicKey::Ecdsa(_) => KeyType::Ecdsa,
        }
    }

    /// Canonical key bytes, algorithm-specific, used both for the `{type, data}`
    /// envelope and as the multihash preimage for PeerId derivation.
    fn inner_bytes(&self) -> Vec<u8> {
        match self {
            PublicKey::Ed25519(pk) => pk.to_bytes().to_vec(),
            PublicKey::Rsa(pk) => {
                use rsa::pkcs8::EncodePublicKey;
                pk.to_public_key_der().expect("valid rsa public key").as_bytes().to_vec()
            }
            PublicKey::Ecdsa(pk) => pk.to_encoded_point(true).as_bytes().to_vec(),
        }
    }

    /// Marshal to the `{type: enum, data: bytes}` envelope described in §6,
    /// as a minimal protobuf-compatible two-field record: varint tag 0x08
    /// (field 1, varint) + type, then tag 0x12 (field 2, length-delimited) + data.
    pub fn marshal(&self) -> Vec<u8> {
        let data = self.inner_bytes();
        let mut out = Vec::with_capacity(data.len() + 8);
        out.push(0x08);
        out.push(self.key_type() as u8);
        out.push(0x12);
        write_varint_usize(&mut out, data.len());
        out.extend_from_slice(&data);
        out
    }

    pub fn unmarshal(bytes: &[u8]) -> Result<Self, Error> {
        let mut cursor = bytes;
        if read_byte(&mut cursor)? != 0x08 {
            return Err(Error::InvalidFormat("expected key type field".into()));
        }
        let tag = KeyType::from_tag(read_byte(&mut cursor)?)?;
        if read_byte(&mut cursor)? != 0x12 {
            return Err(Error::InvalidFormat("expected key data field".into()));
        }
        let len = read_varint_usize(&mut cursor)?;
        if cursor.len() < len {
            return Err(Error::InvalidFormat("truncated key data".into()));
        }
        let data = &cursor[..len];
        match tag {
            KeyType::Ed25519 => {
                let arr: [u8; 32] = data
                    .try_into()
                    .map_err(|_| Error::InvalidFormat("bad ed25519 public key length".into()))?;
                Ok(PublicKey::Ed25519(
                    ed25519_dalek::VerifyingKey::from_bytes(&arr)
                        .map_err(|e| Error::InvalidFormat(e.to_string()))?,
                ))
            }
            KeyType::Rsa => {
                use rsa::pkcs8::DecodePublicKey;
                Ok(PublicKey::Rsa(
                    RsaPublicKey::from_public_key_der(data).map_err(|e| Error::InvalidFormat(e.to_string()))?,
                ))
            }
            KeyType::Ecdsa => {
                let pk = p256::ecdsa::VerifyingKey::from_sec1_bytes(data)
                    .map_err(|e| Error::InvalidFormat(e.to_string()))?;
                Ok(PublicKey::Ecdsa(pk))
            }
            KeyType::Secp256k1 => Err(Error::InvalidFormat("secp256k1 verification unsupported".into())),
        }
    }

    pub fn verify(&self, msg: &[u8], signature: &[u8]) -> bool {
        match self {
            PublicKey::Ed25519(pk) => {
                let Ok(sig) = ed25519_dalek::Signature::from_slice(signature) else { return false };
                pk.verify(msg, &sig).is_ok()
            }
            PublicKey::Rsa(pk) => {
                let verifying = RsaVerifyingKey::<RsaSha256>::new(pk.clone());
                let Ok(sig) = rsa::pkcs1v15::Signature::try_from(signature) else { return false };
                RsaVerifierTrait::verify(&verifying, msg, &sig).is_ok()
            }
            PublicKey::Ecdsa(pk) => {
                let Ok(sig) = p256::ecdsa::Signature::from_slice(signature) else { return false };
                EcdsaVerifier::verify(pk, msg, &sig).is_ok()
            }
        }
    }
}

/// A private key, owning exactly one [`PublicKey`] (§3 invariant).
pub enum PrivateKey {
    Ed25519(ed25519_dalek::SigningKey),
    Rsa(RsaPrivateKey),
    Ecdsa(p256::ecdsa::SigningKey),
}

impl PrivateKey {
    pub fn public(&self) -> PublicKey {
        match self {
            PrivateKey::Ed25519(sk) => PublicKey::Ed25519(sk.verifying_key()),
            PrivateKey::Rsa(sk) => PublicKey::Rsa(sk.to_public_key()),
            PrivateKey::Ecdsa(sk) => PublicKey::Ecdsa(*sk.verifying_key()),
        }
    }

    pub fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(match self {
            PrivateKey::Ed25519(sk) => sk.sign(msg).to_bytes().to_vec(),
            PrivateKey::Rsa(sk) => {
                let signing = RsaSigningKey::<RsaSha256>::new(sk.clone());
                let sig = signing.sign_with_rng(&mut rand::rngs::OsRng, msg);
                sig.to_vec()
            }
            PrivateKey::Ecdsa(sk) => {
                let sig: p256::ecdsa::Signature = EcdsaSigner::sign(sk, msg);
                sig.to_bytes().to_vec()
            }
        })
    }

    fn key_type(&self) -> KeyType {
        match self {
            PrivateKey::Ed25519(_) => KeyType::Ed25519,
            PrivateKey::Rsa(_) => KeyType::Rsa,
            PrivateKey::Ecdsa(_) => KeyType::Ecdsa,
        }
    }

    /// Canonical private-key bytes, algorithm-specific: raw seed for
    /// Ed25519, PKCS#8 DER for RSA and ECDSA-P256 (the inner layout this
    /// crate fixes for the `{type, data}` envelope, §6/§E).
    fn inner_bytes(&self) -> Vec<u8> {
        match self {
            PrivateKey::Ed25519(sk) => sk.to_bytes().to_vec(),
            PrivateKey::Rsa(sk) => {
                use rsa::pkcs8::EncodePrivateKey;
                sk.to_pkcs8_der().expect("valid rsa private key").as_bytes().to_vec()
            }
            PrivateKey::Ecdsa(sk) => {
                use p256::pkcs8::EncodePrivateKey;
                sk.to_pkcs8_der().expect("valid ecdsa private key").as_bytes().to_vec()
            }
        }
    }

    /// Marshal to the `{type: enum, data: bytes}` envelope (§6), the private-key
    /// mirror of [`PublicKey::marshal`].
    pub fn marshal(&self) -> Vec<u8> {
        let data = self.inner_bytes();
        let mut out = Vec::with_capacity(data.len() + 8);
        out.push(0x08);
        out.push(self.key_type() as u8);
        out.push(0x12);
        write_varint_usize(&mut out, data.len());
        out.extend_from_slice(&data);
        out
    }

    pub fn unmarshal(bytes: &[u8]) -> Result<Self, Error> {
        let mut cursor = bytes;
        if read_byte(&mut cursor)? != 0x08 {
            return Err(Error::InvalidFormat("expected key type field".into()));
        }
        let tag = KeyType::from_tag(read_byte(&mut cursor)?)?;
        if read_byte(&mut cursor)? != 0x12 {
            return Err(Error::InvalidFormat("expected key data field".into()));
        }
        let len = read_varint_usize(&mut cursor)?;
        if cursor.len() < len {
            return Err(Error::InvalidFormat("truncated key data".into()));
        }
        let data = &cursor[..len];
        match tag {
            KeyType::Ed25519 => {
                let arr: [u8; 32] = data
                    .try_into()
                    .map_err(|_| Error::InvalidFormat("bad ed25519 private key length".into()))?;
                Ok(PrivateKey::Ed25519(ed25519_dalek::SigningKey::from_bytes(&arr)))
            }
            KeyType::Rsa => {
                use rsa::pkcs8::DecodePrivateKey;
                Ok(PrivateKey::Rsa(
                    RsaPrivateKey::from_pkcs8_der(data).map_err(|e| Error::InvalidFormat(e.to_string()))?,
                ))
            }
            KeyType::Ecdsa => {
                use p256::pkcs8::DecodePrivateKey;
                Ok(PrivateKey::Ecdsa(
                    p256::ecdsa::SigningKey::from_pkcs8_der(data).map_err(|e| Error::InvalidFormat(e.to_string()))?,
                ))
            }
            KeyType::Secp256k1 => Err(Error::InvalidFormat("secp256k1 signing unsupported".into())),
        }
    }
}

/// A generated or imported keypair: a [`PrivateKey`] and its matching [`PublicKey`].
pub struct Keypair {
    private: PrivateKey,
}

impl Keypair {
    pub fn generate_ed25519() -> Self {
        let sk = ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng);
        Keypair { private: PrivateKey::Ed25519(sk) }
    }

    /// RSA key generation enforcing the §4.2 bit-size window.
    pub fn generate_rsa(bits: usize) -> Result<Self, Error> {
        if !(MIN_RSA_BITS..=MAX_RSA_BITS).contains(&bits) {
            return Err(Error::InvalidFormat(format!(
                "rsa key size {bits} out of range [{MIN_RSA_BITS}, {MAX_RSA_BITS}]"
            )));
        }
        let sk = RsaPrivateKey::new(&mut rand::rngs::OsRng, bits)
            .map_err(|e| Error::InvalidFormat(e.to_string()))?;
        Ok(Keypair { private: PrivateKey::Rsa(sk) })
    }

    /// Construct from an existing RSA private key, still enforcing the bit-size window.
    pub fn from_rsa(sk: RsaPrivateKey) -> Result<Self, Error> {
        let bits = sk.n().bits();
        if !(MIN_RSA_BITS..=MAX_RSA_BITS).contains(&bits) {
            return Err(Error::InvalidFormat(format!(
                "rsa key size {bits} out of range [{MIN_RSA_BITS}, {MAX_RSA_BITS}]"
            )));
        }
        Ok(Keypair { private: PrivateKey::Rsa(sk) })
    }

    pub fn generate_ecdsa() -> Self {
        let sk = p256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
        Keypair { private: PrivateKey::Ecdsa(sk) }
    }

    pub fn public(&self) -> PublicKey {
        self.private.public()
    }

    pub fn private(&self) -> &PrivateKey {
        &self.private
    }

    pub fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, Error> {
        self.private.sign(msg)
    }

    pub fn into_keypair(self) -> (PrivateKey, PublicKey) {
        let pk = self.private.public();
        (self.private, pk)
    }
}

fn write_varint_usize(out: &mut Vec<u8>, mut v: usize) {
    loop {
        let mut byte = (v & 0x7f) as u8;
        v >>= 7;
        if v != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if v == 0 {
            break;
        }
    }
}

fn read_byte(cursor: &mut &[u8]) -> Result<u8, Error> {
    if cursor.is_empty() {
        return Err(Error::InvalidFormat("unexpected end of key bytes".into()));
    }
    let b = cursor[0];
    *cursor = &cursor[1..];
    Ok(b)
}

fn read_varint_usize(cursor: &mut &[u8]) -> Result<usize, Error> {
    let mut result: usize = 0;
    let mut shift = 0;
    loop {
        let byte = read_byte(cursor)?;
        result |= ((byte & 0x7f) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 63 {
            return Err(Error::InvalidFormat("varint too long".into()));
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ed25519_sign_verify() {
        let kp = Keypair::generate_ed25519();
        let sig = kp.sign(b"hello").unwrap();
        assert!(kp.public().verify(b"hello", &sig));
        assert!(!kp.public().verify(b"world", &sig));
    }

    #[test]
    fn ed25519_marshal_round_trip() {
        let kp = Keypair::generate_ed25519();
        let pk = kp.public();
        let bytes = pk.marshal();
        let pk2 = PublicKey::unmarshal(&bytes).unwrap();
        assert_eq!(pk, pk2);
    }

    #[test]
    fn ecdsa_sign_verify() {
        let kp = Keypair::generate_ecdsa();
        let sig = kp.sign(b"hello").unwrap();
        assert!(kp.public().verify(b"hello", &sig));
    }

    #[test]
    fn rsa_bit_size_enforced() {
        assert!(Keypair::generate_rsa(1024).is_err());
    }

    #[test]
    fn ed25519_private_marshal_round_trip() {
        let kp = Keypair::generate_ed25519();
        let (sk, pk) = kp.into_keypair();
        let bytes = sk.marshal();
        let sk2 = PrivateKey::unmarshal(&bytes).unwrap();
        assert_eq!(sk2.public(), pk);
    }

    #[test]
    fn ecdsa_private_marshal_round_trip() {
        let kp = Keypair::generate_ecdsa();
        let (sk, pk) = kp.into_keypair();
        let bytes = sk.marshal();
        let sk2 = PrivateKey::unmarshal(&bytes).unwrap();
        assert_eq!(sk2.public(), pk);
        let sig = sk2.sign(b"hello").unwrap();
        assert!(pk.verify(b"hello", &sig));
    }

    #[test]
    fn rsa_private_marshal_round_trip() {
        let kp = Keypair::generate_rsa(MIN_RSA_BITS).unwrap();
        let (sk, pk) = kp.into_keypair();
        let bytes = sk.marshal();
        let sk2 = PrivateKey::unmarshal(&bytes).unwrap();
        assert_eq!(sk2.public(), pk);
    }
}
