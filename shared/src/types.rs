//! Aliases de tipos compartilhados entre os módulos do EduBit

/// Alias para identificador único de transação
pub type TxId = crate::Hash256;

/// Alias para valor monetário (satoshis)
pub type Amount = u64;

/// Alias para timestamp Unix em segundos
pub type Timestamp = i64;

/// Alias para altura do bloco na blockchain
pub type BlockHeight = u64;

/// Alias para índice de saída de transação
pub type VoutIndex = u32;
