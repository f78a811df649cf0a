use shared::{Amount, Hash256};

/// Recompensa fixa por bloco, em satoshis
pub const BLOCK_REWARD: Amount = 50_000_000;

/// Bits zero à esquerda exigidos pelo alvo do gênese
pub const INITIAL_TARGET_BITS: u32 = 8;

/// Incremento de dificuldade por duplicação do número de mineradores
const TARGET_STEP_BITS: u32 = 2;

/// Teto de dificuldade do cronograma
const MAX_TARGET_BITS: u32 = 24;

/// Alvo da rodada em função do número de mineradores conectados.
/// Mais mineradores, alvo mais difícil:
/// `bits = INITIAL_TARGET_BITS + TARGET_STEP_BITS * ⌊log2(N)⌋`,
/// limitado a `MAX_TARGET_BITS`. O coordenador aplica o cronograma ao
/// abrir a rodada; os validadores apenas conferem `hash <= alvo`.
#[must_use]
pub fn target_for(miner_count: usize) -> Hash256 {
    let n = u32::try_from(miner_count.max(1)).unwrap_or(u32::MAX);
    let log2_floor = 31 - n.leading_zeros();
    let bits = (INITIAL_TARGET_BITS + TARGET_STEP_BITS * log2_floor).min(MAX_TARGET_BITS);
    Hash256::with_leading_zero_bits(bits)
}
