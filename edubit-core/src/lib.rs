pub mod block;
pub mod mempool;
pub mod mining;
pub mod target;
pub mod transaction;
pub mod utxo;
pub mod validate;

// Re-exports principais
pub use block::{merkle_root, Block, BlockHeader, BLOCK_VERSION, GENESIS};
pub use mempool::TxPool;
pub use mining::{assemble_template, mine_block, MineWorker};
pub use target::{target_for, BLOCK_REWARD};
pub use transaction::{OutPoint, Transaction, TxInput, TxOutput, TxValue};
pub use utxo::{ChainStats, UtxoSet};
pub use validate::{
    elect_chain, validate_block, validate_chain, validate_transaction, BlockVerifier,
    HonestVerifier, SelfishVerifier,
};

// Re-exports de tipos compartilhados
pub use shared::{BlockchainError, Hash256, KeyHash, Result};
