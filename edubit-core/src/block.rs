use crate::target::INITIAL_TARGET_BITS;
use crate::transaction::Transaction;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use shared::{Hash256, Result, Timestamp};

/// Versão fixa do cabeçalho de bloco
pub const BLOCK_VERSION: u32 = 1;

/// Timestamp fixo do bloco gênese (acordado por todos os participantes)
pub const GENESIS_TIME: Timestamp = 1_721_001_600;

/// Cabeçalho do bloco
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Versão do bloco
    pub version: u32,
    /// Hash do cabeçalho do bloco anterior (todo-zeros para o gênese)
    pub parent_hash: Hash256,
    /// Merkle root das transações
    pub merkle_root: Hash256,
    /// Timestamp Unix em segundos
    pub time: Timestamp,
    /// Alvo da prova de trabalho: o hash deve ser numericamente <= alvo
    pub target: Hash256,
    /// Nonce iterado durante a mineração
    pub nonce: u64,
}

impl BlockHeader {
    /// Hash do cabeçalho: SHA-256 duplo sobre a concatenação da
    /// representação textual dos campos, na ordem em que aparecem.
    #[must_use]
    pub fn hash(&self) -> Hash256 {
        let preimage = format!(
            "{}{}{}{}{}{}",
            self.version, self.parent_hash, self.merkle_root, self.time, self.target, self.nonce
        );
        Hash256::dsha256(preimage.as_bytes())
    }

    /// Verifica a prova de trabalho
    #[must_use]
    pub fn meets_target(&self) -> bool {
        self.hash() <= self.target
    }
}

/// Bloco completo: cabeçalho mais a sequência ordenada de transações,
/// com a coinbase obrigatoriamente em primeiro lugar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    #[must_use]
    pub const fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    /// Hash do bloco (o hash do cabeçalho)
    #[must_use]
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    /// A transação coinbase, quando presente na primeira posição
    #[must_use]
    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first().filter(|tx| tx.is_coinbase())
    }
}

/// Calcula a merkle root de uma lista de transações: os ids são
/// emparelhados (duplicando o último quando a contagem é ímpar),
/// cada par é concatenado e re-hasheado até restar um único hash.
/// A raiz da lista vazia é o hash zero.
///
/// # Errors
///
/// Retorna erro se a serialização de alguma transação falhar
pub fn merkle_root(transactions: &[Transaction]) -> Result<Hash256> {
    if transactions.is_empty() {
        return Ok(Hash256::zero());
    }

    let mut hashes: Vec<Hash256> = transactions
        .iter()
        .map(Transaction::id)
        .collect::<Result<Vec<_>>>()?;

    while hashes.len() > 1 {
        if hashes.len() % 2 != 0 {
            // Contagem ímpar: o último é pareado consigo mesmo
            hashes.push(hashes[hashes.len() - 1]);
        }

        let mut next_level = Vec::with_capacity(hashes.len() / 2);
        for pair in hashes.chunks(2) {
            let mut data = Vec::with_capacity(64);
            data.extend_from_slice(pair[0].as_bytes());
            data.extend_from_slice(pair[1].as_bytes());
            next_level.push(Hash256::dsha256(&data));
        }

        hashes = next_level;
    }

    Ok(hashes[0])
}

/// Bloco gênese acordado por todos os participantes. Não carrega prova
/// de trabalho; a validação de cadeia o compara por igualdade.
pub static GENESIS: Lazy<Block> = Lazy::new(|| {
    Block::new(
        BlockHeader {
            version: BLOCK_VERSION,
            parent_hash: Hash256::zero(),
            merkle_root: Hash256::zero(),
            time: GENESIS_TIME,
            target: Hash256::with_leading_zero_bits(INITIAL_TARGET_BITS),
            nonce: 0,
        },
        Vec::new(),
    )
});

#[cfg(test)]
mod tests {
    use super::*;
    use shared::KeyHash;

    fn sample_tx(tag: u64) -> Transaction {
        Transaction::coinbase(tag, KeyHash::zero())
    }

    #[test]
    fn test_header_hash_covers_every_field() {
        let header = GENESIS.header.clone();
        let base = header.hash();

        let mut nonced = header.clone();
        nonced.nonce = 1;
        assert_ne!(nonced.hash(), base);

        let mut timed = header;
        timed.time += 1;
        assert_ne!(timed.hash(), base);

        // Determinístico
        assert_eq!(GENESIS.header.hash(), base);
    }

    #[test]
    fn test_merkle_root_of_empty_list_is_zero() {
        assert_eq!(merkle_root(&[]).unwrap(), Hash256::zero());
    }

    #[test]
    fn test_merkle_root_of_single_tx_is_its_id() {
        let tx = sample_tx(1);
        assert_eq!(merkle_root(&[tx.clone()]).unwrap(), tx.id().unwrap());
    }

    #[test]
    fn test_merkle_root_duplicates_last_on_odd_count() {
        let txs = vec![sample_tx(1), sample_tx(2), sample_tx(3)];
        let mut padded = txs.clone();
        padded.push(sample_tx(3));

        // Com contagem ímpar o último hash é pareado consigo mesmo,
        // o que equivale a duplicar a última transação.
        assert_eq!(
            merkle_root(&txs).unwrap(),
            merkle_root(&padded).unwrap()
        );
    }

    #[test]
    fn test_merkle_root_depends_on_order() {
        let a = sample_tx(1);
        let b = sample_tx(2);

        assert_ne!(
            merkle_root(&[a.clone(), b.clone()]).unwrap(),
            merkle_root(&[b, a]).unwrap()
        );
    }

    #[test]
    fn test_genesis_constants() {
        assert!(GENESIS.header.parent_hash.is_zero());
        assert!(GENESIS.transactions.is_empty());
        assert_eq!(
            GENESIS.header.merkle_root,
            merkle_root(&GENESIS.transactions).unwrap()
        );

        // Todos os processos derivam o mesmo hash do gênese
        assert_eq!(GENESIS.hash(), GENESIS.hash());
    }
}
