use crate::block::Block;
use crate::transaction::{OutPoint, Transaction, TxOutput};
use serde::{Deserialize, Serialize};
use shared::{Amount, BlockchainError, BlockHeight, KeyHash, Result};
use std::collections::HashMap;

/// Conjunto de saídas não gastas: o estado derivado da cadeia.
/// Cada saída já produzida por um bloco e ainda não consumida aparece
/// exatamente uma vez; gastar um outpoint o remove do conjunto.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UtxoSet {
    utxos: HashMap<OutPoint, TxOutput>,
}

impl UtxoSet {
    /// Cria um conjunto vazio
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconstrói o conjunto reproduzindo a cadeia desde o gênese
    ///
    /// # Errors
    ///
    /// Retorna erro se algum bloco gastar um outpoint inexistente
    pub fn rebuild(blocks: &[Block]) -> Result<Self> {
        let mut set = Self::new();
        for block in blocks {
            set.apply_block(block)?;
        }
        Ok(set)
    }

    /// Obtém uma saída não gasta
    #[must_use]
    pub fn get(&self, outpoint: &OutPoint) -> Option<&TxOutput> {
        self.utxos.get(outpoint)
    }

    /// Verifica se um outpoint existe no conjunto
    #[must_use]
    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.utxos.contains_key(outpoint)
    }

    /// Aplica uma transação: remove as entradas gastas e insere as
    /// novas saídas.
    ///
    /// # Errors
    ///
    /// Retorna erro se alguma entrada referenciar um outpoint ausente
    pub fn apply_transaction(&mut self, tx: &Transaction) -> Result<()> {
        for input in &tx.inputs {
            if self.utxos.remove(&input.outpoint).is_none() {
                return Err(BlockchainError::UtxoNotFound);
            }
        }

        let txid = tx.id()?;
        for (index, output) in tx.outputs.iter().enumerate() {
            let vout = u32::try_from(index).map_err(|_| {
                BlockchainError::InvalidTransaction("índice de saída excede u32".to_string())
            })?;
            self.utxos.insert(OutPoint::new(txid, vout), output.clone());
        }

        Ok(())
    }

    /// Aplica todas as transações de um bloco, na ordem
    ///
    /// # Errors
    ///
    /// Retorna erro se alguma transação gastar um outpoint ausente
    pub fn apply_block(&mut self, block: &Block) -> Result<()> {
        for tx in &block.transactions {
            self.apply_transaction(tx)?;
        }
        Ok(())
    }

    /// Saldo monetário controlado por um keyhash
    #[must_use]
    pub fn balance(&self, keyhash: &KeyHash) -> Amount {
        self.utxos
            .values()
            .filter(|output| output.keyhash == *keyhash)
            .map(|output| output.value.amount())
            .sum()
    }

    /// Outpoints monetários pertencentes a um keyhash, com seus valores
    #[must_use]
    pub fn owned_outpoints(&self, keyhash: &KeyHash) -> Vec<(OutPoint, Amount)> {
        self.utxos
            .iter()
            .filter(|(_, output)| output.keyhash == *keyhash && output.value.is_coins())
            .map(|(outpoint, output)| (*outpoint, output.value.amount()))
            .collect()
    }

    /// Seleciona outpoints monetários de um keyhash até cobrir `amount`.
    /// Devolve os outpoints escolhidos e o total que eles somam.
    ///
    /// # Errors
    ///
    /// Retorna erro se o saldo do keyhash não cobrir o valor
    pub fn select_outpoints(
        &self,
        keyhash: &KeyHash,
        amount: Amount,
    ) -> Result<(Vec<OutPoint>, Amount)> {
        let mut selected = Vec::new();
        let mut total = 0u64;

        for (outpoint, value) in self.owned_outpoints(keyhash) {
            selected.push(outpoint);
            total = total.checked_add(value).ok_or_else(|| {
                BlockchainError::InvalidTransaction(
                    "overflow na seleção de UTXOs".to_string(),
                )
            })?;

            if total >= amount {
                return Ok((selected, total));
            }
        }

        Err(BlockchainError::InsufficientFunds)
    }

    /// Número de saídas não gastas
    #[must_use]
    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }
}

/// Resumo do estado de uma cadeia e do conjunto UTXO derivado dela,
/// para registro em log e exibição no console
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStats {
    pub height: BlockHeight,
    pub total_blocks: u64,
    pub total_transactions: u64,
    pub total_utxos: u64,
}

impl ChainStats {
    /// Coleta o resumo de uma cadeia e do seu conjunto UTXO
    #[must_use]
    pub fn collect(blocks: &[Block], utxo: &UtxoSet) -> Self {
        Self {
            height: blocks.len().saturating_sub(1) as u64,
            total_blocks: blocks.len() as u64,
            total_transactions: blocks
                .iter()
                .map(|block| block.transactions.len() as u64)
                .sum(),
            total_utxos: utxo.len() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::GENESIS;
    use crate::transaction::TxValue;
    use shared::{Hash256, KeyPair};

    #[test]
    fn test_apply_coinbase_creates_utxo() {
        let keypair = KeyPair::generate();
        let coinbase = Transaction::coinbase(5000, keypair.keyhash());

        let mut set = UtxoSet::new();
        set.apply_transaction(&coinbase).unwrap();

        assert_eq!(set.len(), 1);
        assert_eq!(set.balance(&keypair.keyhash()), 5000);

        let outpoint = OutPoint::new(coinbase.id().unwrap(), 0);
        assert!(set.contains(&outpoint));
        assert_eq!(set.get(&outpoint).unwrap().value, TxValue::Coins(5000));
    }

    #[test]
    fn test_spending_removes_and_inserts() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();

        let coinbase = Transaction::coinbase(5000, alice.keyhash());
        let mut set = UtxoSet::new();
        set.apply_transaction(&coinbase).unwrap();

        let outpoint = OutPoint::new(coinbase.id().unwrap(), 0);
        let spend = Transaction::spend(
            &alice,
            vec![outpoint],
            vec![TxOutput::coins(4900, bob.keyhash())],
        )
        .unwrap();

        set.apply_transaction(&spend).unwrap();

        assert!(!set.contains(&outpoint));
        assert_eq!(set.balance(&alice.keyhash()), 0);
        assert_eq!(set.balance(&bob.keyhash()), 4900);
    }

    #[test]
    fn test_missing_outpoint_is_an_error() {
        let keypair = KeyPair::generate();
        let spend = Transaction::spend(
            &keypair,
            vec![OutPoint::new(Hash256::dsha256(b"fantasma"), 0)],
            vec![TxOutput::coins(1, keypair.keyhash())],
        )
        .unwrap();

        let mut set = UtxoSet::new();
        assert!(matches!(
            set.apply_transaction(&spend),
            Err(BlockchainError::UtxoNotFound)
        ));
    }

    #[test]
    fn test_rebuild_matches_incremental_application() {
        let keypair = KeyPair::generate();
        let coinbase = Transaction::coinbase(5000, keypair.keyhash());

        let mut block = GENESIS.clone();
        block.transactions = vec![coinbase];

        let mut incremental = UtxoSet::new();
        incremental.apply_block(&block).unwrap();

        let rebuilt = UtxoSet::rebuild(std::slice::from_ref(&block)).unwrap();
        assert_eq!(rebuilt.len(), incremental.len());
        assert_eq!(
            rebuilt.balance(&keypair.keyhash()),
            incremental.balance(&keypair.keyhash())
        );
    }

    #[test]
    fn test_select_outpoints_covers_the_amount() {
        let alice = KeyPair::generate();
        let tx = Transaction::new(
            vec![],
            vec![
                TxOutput::coins(100, alice.keyhash()),
                TxOutput::coins(200, alice.keyhash()),
                TxOutput::coins(300, alice.keyhash()),
            ],
        );

        let mut set = UtxoSet::new();
        set.apply_transaction(&tx).unwrap();

        let (outpoints, total) = set.select_outpoints(&alice.keyhash(), 250).unwrap();
        assert!(total >= 250);
        assert!(!outpoints.is_empty());
        for outpoint in &outpoints {
            assert_eq!(set.get(outpoint).unwrap().keyhash, alice.keyhash());
        }

        // O saldo todo é 600; pedir mais do que isso falha
        assert!(matches!(
            set.select_outpoints(&alice.keyhash(), 700),
            Err(BlockchainError::InsufficientFunds)
        ));
    }

    #[test]
    fn test_chain_stats_summarizes_chain_and_utxo() {
        let keypair = KeyPair::generate();
        let mut block = GENESIS.clone();
        block.transactions = vec![Transaction::coinbase(5000, keypair.keyhash())];

        let chain = vec![GENESIS.clone(), block];
        let utxo = UtxoSet::rebuild(&chain).unwrap();

        let stats = ChainStats::collect(&chain, &utxo);
        assert_eq!(stats.height, 1);
        assert_eq!(stats.total_blocks, 2);
        assert_eq!(stats.total_transactions, 1);
        assert_eq!(stats.total_utxos, 1);
    }

    #[test]
    fn test_owned_outpoints_skip_data_outputs() {
        let keypair = KeyPair::generate();
        let tx = Transaction::new(
            vec![],
            vec![
                TxOutput::coins(100, keypair.keyhash()),
                TxOutput::data("anotação".to_string(), keypair.keyhash()),
            ],
        );

        let mut set = UtxoSet::new();
        set.apply_transaction(&tx).unwrap();

        let owned = set.owned_outpoints(&keypair.keyhash());
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].1, 100);
    }
}
