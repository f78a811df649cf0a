pub mod crypto;
pub mod error;
pub mod hash;
pub mod types;

pub use crypto::{KeyPair, PrivateKey, PublicKey, Signature};
pub use error::BlockchainError;
pub use hash::{Hash256, KeyHash};
pub use types::{Amount, BlockHeight, Timestamp, TxId, VoutIndex};

pub type Result<T> = std::result::Result<T, BlockchainError>;
