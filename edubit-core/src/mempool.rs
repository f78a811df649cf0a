use crate::block::Block;
use crate::transaction::Transaction;
use crate::utxo::UtxoSet;
use crate::validate::validate_transaction;
use shared::{Result, TxId};
use std::collections::HashSet;
use tracing::debug;

/// Pool local de transações pendentes. As entradas são mantidas e
/// consumidas em ordem de inserção; a inserção é idempotente por id.
#[derive(Debug, Default, Clone)]
pub struct TxPool {
    entries: Vec<Transaction>,
    ids: HashSet<TxId>,
}

impl TxPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insere uma transação; devolve `false` se o id já estava no pool
    ///
    /// # Errors
    ///
    /// Retorna erro se o id da transação não puder ser calculado
    pub fn insert(&mut self, tx: Transaction) -> Result<bool> {
        let id = tx.id()?;
        if !self.ids.insert(id) {
            return Ok(false);
        }
        self.entries.push(tx);
        Ok(true)
    }

    #[must_use]
    pub fn contains(&self, id: &TxId) -> bool {
        self.ids.contains(id)
    }

    /// Retrato imutável do pool, na ordem de inserção
    #[must_use]
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.entries.clone()
    }

    /// Remove do pool toda transação que aparece no bloco aceito
    ///
    /// # Errors
    ///
    /// Retorna erro se algum id não puder ser calculado
    pub fn remove_included(&mut self, block: &Block) -> Result<()> {
        let mut included = HashSet::new();
        for tx in &block.transactions {
            included.insert(tx.id()?);
        }

        let mut kept = Vec::with_capacity(self.entries.len());
        for tx in self.entries.drain(..) {
            let id = tx.id()?;
            if included.contains(&id) {
                self.ids.remove(&id);
            } else {
                kept.push(tx);
            }
        }
        self.entries = kept;

        Ok(())
    }

    /// Refiltra o pool contra um novo conjunto UTXO, descartando as
    /// transações que deixaram de validar após a troca de cadeia.
    pub fn refilter(&mut self, utxo: &UtxoSet) {
        let mut kept = Vec::with_capacity(self.entries.len());
        for tx in self.entries.drain(..) {
            match validate_transaction(&tx, utxo) {
                Ok(_) => kept.push(tx),
                Err(e) => {
                    if let Ok(id) = tx.id() {
                        self.ids.remove(&id);
                        debug!("transação {id} removida do pool: {e}");
                    }
                }
            }
        }
        self.entries = kept;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
