//! Motor de validação: funções sem estado sobre `(cadeia, conjunto UTXO)`.
//!
//! Nenhuma função daqui atravessa a fronteira de rede com pânico; toda
//! decisão volta como `Result` com o motivo da recusa.

use crate::block::{Block, BlockHeader, GENESIS};
use crate::target::BLOCK_REWARD;
use crate::transaction::{OutPoint, Transaction};
use crate::utxo::UtxoSet;
use shared::{Amount, BlockchainError, Result};
use std::collections::HashSet;
use tracing::debug;

/// Valida uma transação isolada contra um retrato do conjunto UTXO e
/// retorna a taxa que ela paga.
///
/// # Errors
///
/// Retorna erro quando a transação viola alguma regra: sem saídas,
/// outpoint ausente ou gasto em duplicidade, dono errado, assinatura
/// inválida ou saídas maiores que as entradas.
pub fn validate_transaction(tx: &Transaction, utxo: &UtxoSet) -> Result<Amount> {
    let mut spent = HashSet::new();
    transaction_fee(tx, utxo, &mut spent)
}

/// Núcleo da validação de transação. `spent` acumula os outpoints já
/// consumidos no mesmo bloco, para barrar gasto duplo entre transações
/// vizinhas.
///
/// # Errors
///
/// Como em [`validate_transaction`]
pub fn transaction_fee(
    tx: &Transaction,
    utxo: &UtxoSet,
    spent: &mut HashSet<OutPoint>,
) -> Result<Amount> {
    if tx.outputs.is_empty() {
        return Err(BlockchainError::InvalidTransaction(
            "transação sem saídas".to_string(),
        ));
    }

    let payload = Transaction::signing_payload(&tx.outputs)?;
    let mut input_total = 0u64;

    for input in &tx.inputs {
        if !spent.insert(input.outpoint) {
            return Err(BlockchainError::InvalidTransaction(
                "outpoint gasto em duplicidade".to_string(),
            ));
        }

        let previous = utxo
            .get(&input.outpoint)
            .ok_or(BlockchainError::UtxoNotFound)?;

        if input.pubkey.keyhash() != previous.keyhash {
            return Err(BlockchainError::InvalidTransaction(
                "chave da entrada não corresponde ao dono da saída".to_string(),
            ));
        }

        if !input.signature.verify(&input.pubkey, &payload) {
            return Err(BlockchainError::InvalidSignature);
        }

        input_total = input_total
            .checked_add(previous.value.amount())
            .ok_or_else(|| {
                BlockchainError::InvalidTransaction("overflow na soma das entradas".to_string())
            })?;
    }

    let output_total = tx.output_total()?;
    input_total.checked_sub(output_total).ok_or_else(|| {
        BlockchainError::InvalidTransaction("saídas excedem as entradas".to_string())
    })
}

/// Valida um bloco contra a ponta da cadeia e o conjunto UTXO.
///
/// As transações são aplicadas da esquerda para a direita sobre uma
/// visão de trabalho do conjunto, então saídas produzidas mais cedo no
/// bloco podem ser gastas mais adiante nele.
///
/// # Errors
///
/// Retorna erro quando o cabeçalho, o encadeamento, a merkle root, a
/// coinbase ou alguma transação violam as regras.
pub fn validate_block(block: &Block, parent: Option<&BlockHeader>, utxo: &UtxoSet) -> Result<()> {
    let header = &block.header;

    if !header.meets_target() {
        return Err(BlockchainError::InvalidBlock(
            "hash do cabeçalho acima do alvo".to_string(),
        ));
    }

    match parent {
        Some(parent) => {
            if header.parent_hash != parent.hash() {
                return Err(BlockchainError::InvalidBlock(
                    "parent_hash não aponta para a ponta da cadeia".to_string(),
                ));
            }
        }
        None => {
            if !header.parent_hash.is_zero() {
                return Err(BlockchainError::InvalidBlock(
                    "bloco sem antecessor deve referenciar o hash zero".to_string(),
                ));
            }
        }
    }

    if crate::block::merkle_root(&block.transactions)? != header.merkle_root {
        return Err(BlockchainError::InvalidBlock(
            "merkle root não corresponde às transações".to_string(),
        ));
    }

    let coinbase_count = block
        .transactions
        .iter()
        .filter(|tx| tx.is_coinbase())
        .count();
    if coinbase_count != 1 {
        return Err(BlockchainError::InvalidBlock(format!(
            "esperada exatamente uma coinbase, encontradas {coinbase_count}"
        )));
    }
    if !block.transactions[0].is_coinbase() {
        return Err(BlockchainError::InvalidBlock(
            "a coinbase deve ser a primeira transação".to_string(),
        ));
    }

    let mut working = utxo.clone();
    let mut fees = 0u64;
    for tx in &block.transactions[1..] {
        let mut spent = HashSet::new();
        let fee = transaction_fee(tx, &working, &mut spent)?;
        fees = fees.checked_add(fee).ok_or_else(|| {
            BlockchainError::InvalidBlock("overflow na soma das taxas".to_string())
        })?;
        working.apply_transaction(tx)?;
    }

    let expected_reward = BLOCK_REWARD.checked_add(fees).ok_or_else(|| {
        BlockchainError::InvalidBlock("overflow na recompensa da coinbase".to_string())
    })?;
    if block.transactions[0].output_total()? != expected_reward {
        return Err(BlockchainError::InvalidBlock(format!(
            "coinbase deve pagar {expected_reward} (recompensa + taxas)"
        )));
    }

    Ok(())
}

/// Valida uma cadeia completa a partir do gênese e devolve o conjunto
/// UTXO reconstruído por ela.
///
/// # Errors
///
/// Retorna erro se a cadeia estiver vazia, se o primeiro bloco divergir
/// do gênese acordado ou se algum bloco não validar.
pub fn validate_chain(blocks: &[Block]) -> Result<UtxoSet> {
    let Some(first) = blocks.first() else {
        return Err(BlockchainError::InvalidChain("cadeia vazia".to_string()));
    };

    if *first != *GENESIS {
        return Err(BlockchainError::InvalidChain(
            "bloco inicial diverge do gênese acordado".to_string(),
        ));
    }

    let mut utxo = UtxoSet::new();
    utxo.apply_block(first)?;

    for pair in blocks.windows(2) {
        validate_block(&pair[1], Some(&pair[0].header), &utxo)
            .map_err(|e| BlockchainError::InvalidChain(e.to_string()))?;
        utxo.apply_block(&pair[1])?;
    }

    Ok(utxo)
}

/// Eleição da cadeia válida mais longa. Empates preservam a cadeia
/// local, o que torna retransmissões idempotentes.
#[must_use]
pub fn elect_chain<'a>(local: &'a [Block], candidates: &'a [Vec<Block>]) -> &'a [Block] {
    let mut best = local;
    for candidate in candidates {
        if candidate.len() > best.len() && validate_chain(candidate).is_ok() {
            best = candidate;
        }
    }
    best
}

/// Estratégia de voto de um minerador sobre blocos alheios
pub trait BlockVerifier: Send + Sync {
    fn verify(&self, block: &Block, parent: Option<&BlockHeader>, utxo: &UtxoSet) -> bool;
}

/// Minerador honesto: vota de acordo com a validação completa do bloco
pub struct HonestVerifier;

impl BlockVerifier for HonestVerifier {
    fn verify(&self, block: &Block, parent: Option<&BlockHeader>, utxo: &UtxoSet) -> bool {
        match validate_block(block, parent, utxo) {
            Ok(()) => true,
            Err(e) => {
                debug!("bloco {} recusado: {e}", block.hash());
                false
            }
        }
    }
}

/// Minerador egoísta: vota não em todo bloco alheio, sem validar
pub struct SelfishVerifier;

impl BlockVerifier for SelfishVerifier {
    fn verify(&self, _block: &Block, _parent: Option<&BlockHeader>, _utxo: &UtxoSet) -> bool {
        false
    }
}
