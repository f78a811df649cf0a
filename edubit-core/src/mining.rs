use crate::block::{merkle_root, Block, BlockHeader, BLOCK_VERSION};
use crate::target::BLOCK_REWARD;
use crate::transaction::Transaction;
use crate::utxo::UtxoSet;
use crate::validate::transaction_fee;
use chrono::Utc;
use rand::Rng;
use shared::{BlockchainError, Hash256, KeyHash, Result};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Quantos hashes entre cada verificação do sinal de cancelamento
const CANCEL_POLL_INTERVAL: u64 = 1 << 14;

/// Monta o modelo de bloco de uma rodada: a coinbase primeiro, depois
/// as transações do pool em ordem de inserção. A coinbase paga a
/// recompensa mais a soma das taxas do pool.
///
/// # Errors
///
/// Retorna erro se alguma transação do pool não validar contra o
/// conjunto UTXO fornecido
pub fn assemble_template(
    parent: &BlockHeader,
    target: Hash256,
    reward_keyhash: KeyHash,
    pool: Vec<Transaction>,
    utxo: &UtxoSet,
) -> Result<Block> {
    let mut working = utxo.clone();
    let mut fees = 0u64;
    for tx in &pool {
        let mut spent = HashSet::new();
        let fee = transaction_fee(tx, &working, &mut spent)?;
        fees = fees.checked_add(fee).ok_or_else(|| {
            BlockchainError::InvalidBlock("overflow na soma das taxas".to_string())
        })?;
        working.apply_transaction(tx)?;
    }

    let reward = BLOCK_REWARD.checked_add(fees).ok_or_else(|| {
        BlockchainError::InvalidBlock("overflow na recompensa da coinbase".to_string())
    })?;
    let mut transactions = vec![Transaction::coinbase(reward, reward_keyhash)];
    transactions.extend(pool);

    let header = BlockHeader {
        version: BLOCK_VERSION,
        parent_hash: parent.hash(),
        merkle_root: merkle_root(&transactions)?,
        time: Utc::now().timestamp(),
        target,
        nonce: 0,
    };

    Ok(Block::new(header, transactions))
}

/// Itera o nonce de um modelo até satisfazer o alvo do cabeçalho.
/// Ferramenta síncrona para construção de cadeias em testes e no gênese
/// de redes locais; a mineração de produção usa [`MineWorker`].
#[must_use]
pub fn mine_block(mut block: Block) -> Block {
    let mut nonce = 0u64;
    loop {
        block.header.nonce = nonce;
        if block.header.meets_target() {
            return block;
        }
        nonce = nonce.wrapping_add(1);
    }
}

/// Trabalhador de mineração: uma thread dedicada que itera o nonce de
/// um modelo de bloco e entrega a solução pelo callback fornecido.
///
/// O trabalhador é cancelável: a flag é consultada a cada lote de
/// hashes e, quando acionada, a thread termina em silêncio. O timestamp
/// é recarimbado quando o nonce dá a volta completa no espaço.
pub struct MineWorker {
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MineWorker {
    /// Inicia a mineração de `block` em uma thread própria
    pub fn spawn<F>(mut block: Block, on_found: F) -> Self
    where
        F: FnOnce(Block) + Send + 'static,
    {
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);

        let handle = thread::spawn(move || {
            // Cada minerador parte de um ponto aleatório do espaço de
            // nonce, para não repetir o trabalho dos concorrentes
            let start = rand::thread_rng().gen::<u64>();
            let mut nonce = start;
            let mut attempts = 0u64;

            loop {
                block.header.nonce = nonce;
                if block.header.meets_target() {
                    on_found(block);
                    return;
                }

                nonce = nonce.wrapping_add(1);
                if nonce == start {
                    // Espaço esgotado: recarimba o tempo e recomeça
                    block.header.time = Utc::now().timestamp();
                }

                attempts = attempts.wrapping_add(1);
                if attempts % CANCEL_POLL_INTERVAL == 0 && flag.load(Ordering::SeqCst) {
                    return;
                }
            }
        });

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Aciona o sinal de cancelamento sem esperar a thread
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Verifica se a thread já terminou (solução entregue ou cancelada)
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Cancela e espera a thread terminar
    pub fn stop(mut self) {
        self.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MineWorker {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::GENESIS;
    use crate::validate::validate_block;
    use shared::KeyPair;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_assemble_template_orders_coinbase_first() {
        let miner = KeyPair::generate();
        let data = Transaction::new(
            vec![],
            vec![crate::transaction::TxOutput::data(
                "aula 3".to_string(),
                miner.keyhash(),
            )],
        );

        let template = assemble_template(
            &GENESIS.header,
            Hash256::max(),
            miner.keyhash(),
            vec![data.clone()],
            &UtxoSet::new(),
        )
        .unwrap();

        assert_eq!(template.transactions.len(), 2);
        assert!(template.transactions[0].is_coinbase());
        assert_eq!(template.transactions[1], data);
        assert_eq!(template.transactions[0].output_total().unwrap(), BLOCK_REWARD);
    }

    #[test]
    fn test_worker_delivers_a_valid_block() {
        let miner = KeyPair::generate();
        let template = assemble_template(
            &GENESIS.header,
            Hash256::with_leading_zero_bits(8),
            miner.keyhash(),
            vec![],
            &UtxoSet::new(),
        )
        .unwrap();

        let (tx, rx) = mpsc::channel();
        let worker = MineWorker::spawn(template, move |block| {
            let _ = tx.send(block);
        });

        let block = rx.recv_timeout(Duration::from_secs(30)).unwrap();
        assert!(block.header.meets_target());
        validate_block(&block, Some(&GENESIS.header), &UtxoSet::new()).unwrap();

        worker.stop();
    }

    #[test]
    fn test_worker_cancels_promptly() {
        let miner = KeyPair::generate();
        // Alvo inalcançável na prática
        let template = assemble_template(
            &GENESIS.header,
            Hash256::with_leading_zero_bits(200),
            miner.keyhash(),
            vec![],
            &UtxoSet::new(),
        )
        .unwrap();

        let (tx, rx) = mpsc::channel();
        let worker = MineWorker::spawn(template, move |block| {
            let _ = tx.send(block);
        });

        worker.stop();
        // Cancelado antes de achar solução: nada foi entregue
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }
}
