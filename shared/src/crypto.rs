//! Fachada criptográfica do EduBit
//!
//! Todos os participantes assinam e verificam através desta fachada; o
//! algoritmo concreto (ML-DSA / CRYSTALS-Dilithium) fica encapsulado aqui
//! e pode ser trocado sem tocar o resto do sistema. A codificação das
//! chaves em bytes é determinística, então dois processos derivam o mesmo
//! keyhash da mesma chave.

use crate::{BlockchainError, KeyHash, Result};
use pqcrypto_dilithium::dilithium5;
use pqcrypto_traits::sign::{
    DetachedSignature as PQCDetachedSignature, PublicKey as PQCPublicKeyTrait,
    SecretKey as PQCSecretKeyTrait,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroize;

/// Chave pública de um participante
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    key_data: Vec<u8>,
}

/// Chave privada de um participante
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateKey {
    key_data: Vec<u8>,
}

/// Par de chaves de uma carteira, gerado na inicialização do minerador
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
}

/// Assinatura digital destacada sobre uma mensagem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    data: Vec<u8>,
}

impl PublicKey {
    /// Cria uma chave pública a partir de bytes
    ///
    /// # Errors
    ///
    /// Retorna erro se os bytes não representarem uma chave válida
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        dilithium5::PublicKey::from_bytes(&bytes)
            .map_err(|e| BlockchainError::CryptographicError(e.to_string()))?;
        Ok(Self { key_data: bytes })
    }

    /// Returns the raw bytes of the public key
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.key_data
    }

    /// Keyhash do dono: `RIPEMD160(SHA256(chave))`
    #[must_use]
    pub fn keyhash(&self) -> KeyHash {
        KeyHash::of_pubkey_bytes(&self.key_data)
    }

    /// Codificação hexadecimal determinística da chave
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(&self.key_data)
    }

    /// Decodifica uma chave pública de hexadecimal
    ///
    /// # Errors
    ///
    /// Retorna erro se o hex ou a chave forem inválidos
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let bytes = hex::decode(encoded)
            .map_err(|e| BlockchainError::CryptographicError(e.to_string()))?;
        Self::from_bytes(bytes)
    }

    fn to_pqc(&self) -> Result<dilithium5::PublicKey> {
        dilithium5::PublicKey::from_bytes(&self.key_data)
            .map_err(|e| BlockchainError::CryptographicError(e.to_string()))
    }
}

impl PrivateKey {
    /// Creates a `PrivateKey` from raw bytes
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are invalid for the algorithm
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        dilithium5::SecretKey::from_bytes(&bytes)
            .map_err(|e| BlockchainError::CryptographicError(e.to_string()))?;
        Ok(Self { key_data: bytes })
    }

    /// Returns the raw bytes of the private key
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.key_data
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(&self.key_data)
    }

    /// Decodifica uma chave privada de hexadecimal
    ///
    /// # Errors
    ///
    /// Retorna erro se o hex ou a chave forem inválidos
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let bytes = hex::decode(encoded)
            .map_err(|e| BlockchainError::CryptographicError(e.to_string()))?;
        Self::from_bytes(bytes)
    }

    fn to_pqc(&self) -> Result<dilithium5::SecretKey> {
        dilithium5::SecretKey::from_bytes(&self.key_data)
            .map_err(|e| BlockchainError::CryptographicError(e.to_string()))
    }
}

impl KeyPair {
    /// Gera um novo par de chaves
    #[must_use]
    pub fn generate() -> Self {
        let (public_key_bytes, secret_key_bytes) = dilithium5::keypair();

        Self {
            public_key: PublicKey {
                key_data: public_key_bytes.as_bytes().to_vec(),
            },
            private_key: PrivateKey {
                key_data: secret_key_bytes.as_bytes().to_vec(),
            },
        }
    }

    /// Assina uma mensagem com a chave privada
    ///
    /// # Errors
    ///
    /// Retorna erro se a chave privada estiver corrompida
    pub fn sign(&self, message: &[u8]) -> Result<Signature> {
        let secret_key = self.private_key.to_pqc()?;
        let signature = dilithium5::detached_sign(message, &secret_key);

        Ok(Signature {
            data: signature.as_bytes().to_vec(),
        })
    }

    /// Keyhash da chave pública deste par
    #[must_use]
    pub fn keyhash(&self) -> KeyHash {
        self.public_key.keyhash()
    }
}

impl Signature {
    /// Verifica a assinatura sobre `message` com a chave pública dada.
    /// Assinaturas ou chaves malformadas contam como verificação falha.
    #[must_use]
    pub fn verify(&self, public_key: &PublicKey, message: &[u8]) -> bool {
        let Ok(pqc_key) = public_key.to_pqc() else {
            return false;
        };
        let Ok(signature) = dilithium5::DetachedSignature::from_bytes(&self.data) else {
            return false;
        };
        dilithium5::verify_detached_signature(&signature, message, &pqc_key).is_ok()
    }

    /// Returns the size in bytes of this signature
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl Zeroize for PrivateKey {
    fn zeroize(&mut self) {
        self.key_data.zeroize();
    }
}

impl Drop for PrivateKey {
    fn drop(&mut self) {
        self.zeroize();
    }
}

// Chaves e assinaturas viajam como hexadecimal nas mensagens; a
// desserialização rejeita bytes que não formem uma chave do algoritmo.
impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.data))
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let data = hex::decode(&s).map_err(serde::de::Error::custom)?;
        Ok(Self { data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let keypair = KeyPair::generate();
        let message = b"bloco candidato da rodada 7";

        let signature = keypair.sign(message).unwrap();
        assert!(signature.verify(&keypair.public_key, message));

        // Mensagem adulterada falha
        assert!(!signature.verify(&keypair.public_key, b"outra mensagem"));

        // Chave de outro participante falha
        let other = KeyPair::generate();
        assert!(!signature.verify(&other.public_key, message));
    }

    #[test]
    fn test_keyhash_is_deterministic() {
        let keypair = KeyPair::generate();
        let restored =
            PublicKey::from_bytes(keypair.public_key.as_bytes().to_vec()).unwrap();

        assert_eq!(keypair.keyhash(), restored.keyhash());
    }

    #[test]
    fn test_hex_round_trip() {
        let keypair = KeyPair::generate();

        let public = PublicKey::from_hex(&keypair.public_key.to_hex()).unwrap();
        assert_eq!(public, keypair.public_key);

        let private = PrivateKey::from_hex(&keypair.private_key.to_hex()).unwrap();
        assert_eq!(private.as_bytes(), keypair.private_key.as_bytes());
    }

    #[test]
    fn test_invalid_key_bytes_rejected() {
        assert!(PublicKey::from_bytes(vec![1, 2, 3]).is_err());
        assert!(PrivateKey::from_bytes(vec![]).is_err());
    }
}
