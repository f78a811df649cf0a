use ripemd::Ripemd160;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::BlockchainError;

/// Hash de 256 bits usado para identificar blocos, transações e alvos
/// de mineração.
///
/// A ordenação derivada compara os bytes em big-endian, então
/// `hash <= alvo` é a verificação numérica da prova de trabalho.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    /// Creates a zeroed hash
    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Maior valor representável (alvo mais permissivo possível)
    #[must_use]
    pub const fn max() -> Self {
        Self([0xff; 32])
    }

    /// Creates a hash from a 32-byte array
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes of the hash
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Computes the SHA-256 hash of the provided data
    #[must_use]
    pub fn sha256(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        Self(hash)
    }

    /// SHA-256 duplo: `SHA256(SHA256(data))`
    #[must_use]
    pub fn dsha256(data: &[u8]) -> Self {
        let first = Self::sha256(data);
        Self::sha256(&first.0)
    }

    /// Verifica se o hash é o valor todo-zeros
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Constrói o alvo com `bits` bits zero à esquerda e o restante em um.
    /// Bits além de 256 saturam no hash zero.
    #[must_use]
    pub fn with_leading_zero_bits(bits: u32) -> Self {
        let mut bytes = [0xffu8; 32];
        let full = (bits / 8) as usize;
        let rem = bits % 8;
        for byte in bytes.iter_mut().take(full.min(32)) {
            *byte = 0;
        }
        if full < 32 && rem > 0 {
            bytes[full] = 0xff >> rem;
        }
        Self(bytes)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for Hash256 {
    type Err = BlockchainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| BlockchainError::InvalidHash)?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| BlockchainError::InvalidHash)?;
        Ok(Self(array))
    }
}

// No fio e nas serializações canônicas o hash viaja como string
// hexadecimal minúscula.
impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Hash de 160 bits que identifica o dono de uma saída (estilo P2PKH):
/// `RIPEMD160(SHA256(chave_pública))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyHash([u8; 20]);

impl KeyHash {
    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; 20])
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Calcula o keyhash dos bytes de uma chave pública
    #[must_use]
    pub fn of_pubkey_bytes(pubkey: &[u8]) -> Self {
        let sha = Hash256::sha256(pubkey);
        let mut hasher = Ripemd160::new();
        hasher.update(sha.as_bytes());
        let result = hasher.finalize();
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&result);
        Self(hash)
    }
}

impl fmt::Display for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for KeyHash {
    type Err = BlockchainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| BlockchainError::InvalidHash)?;
        let array: [u8; 20] = bytes
            .try_into()
            .map_err(|_| BlockchainError::InvalidHash)?;
        Ok(Self(array))
    }
}

impl Serialize for KeyHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for KeyHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
