use serde::{Deserialize, Serialize};
use shared::{
    Amount, BlockchainError, Hash256, KeyHash, KeyPair, PublicKey, Result, Signature, TxId,
    VoutIndex,
};

/// Referência a uma saída de transação anterior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    /// Id da transação que contém a saída
    pub txid: TxId,
    /// Índice da saída na transação
    pub vout: VoutIndex,
}

impl OutPoint {
    /// Cria um novo `OutPoint`
    #[must_use]
    pub const fn new(txid: TxId, vout: VoutIndex) -> Self {
        Self { txid, vout }
    }
}

/// Valor transportado por uma saída: satoshis ou uma carga de dados
/// arbitrária. Cargas de dados valem zero na aritmética de taxas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxValue {
    Coins(Amount),
    Data(String),
}

impl TxValue {
    /// Contribuição da saída para as somas de valores
    #[must_use]
    pub const fn amount(&self) -> Amount {
        match self {
            Self::Coins(amount) => *amount,
            Self::Data(_) => 0,
        }
    }

    #[must_use]
    pub const fn is_coins(&self) -> bool {
        matches!(self, Self::Coins(_))
    }
}

/// Saída de transação: um valor e o keyhash do novo dono
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: TxValue,
    pub keyhash: KeyHash,
}

impl TxOutput {
    /// Cria uma saída monetária
    #[must_use]
    pub const fn coins(amount: Amount, keyhash: KeyHash) -> Self {
        Self {
            value: TxValue::Coins(amount),
            keyhash,
        }
    }

    /// Cria uma saída de dados
    #[must_use]
    pub const fn data(payload: String, keyhash: KeyHash) -> Self {
        Self {
            value: TxValue::Data(payload),
            keyhash,
        }
    }
}

/// Entrada de transação: a prova de posse de uma saída anterior.
/// A assinatura cobre a serialização canônica das saídas da transação.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub outpoint: OutPoint,
    pub pubkey: PublicKey,
    pub signature: Signature,
}

/// Transação da blockchain EduBit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Versão da transação
    pub version: u32,
    /// Entradas da transação
    pub inputs: Vec<TxInput>,
    /// Saídas da transação
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    pub const VERSION: u32 = 1;

    /// Cria uma nova transação
    #[must_use]
    pub const fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        Self {
            version: Self::VERSION,
            inputs,
            outputs,
        }
    }

    /// Cria a transação coinbase de um bloco: zero entradas e uma única
    /// saída pagando `amount` ao keyhash do minerador.
    #[must_use]
    pub fn coinbase(amount: Amount, keyhash: KeyHash) -> Self {
        Self::new(vec![], vec![TxOutput::coins(amount, keyhash)])
    }

    /// Constrói uma transação gastando `outpoints` (todos do mesmo dono)
    /// e assinando cada entrada sobre as saídas.
    ///
    /// # Errors
    ///
    /// Retorna erro se a assinatura falhar
    pub fn spend(
        keypair: &KeyPair,
        outpoints: Vec<OutPoint>,
        outputs: Vec<TxOutput>,
    ) -> Result<Self> {
        let payload = Self::signing_payload(&outputs)?;
        let inputs = outpoints
            .into_iter()
            .map(|outpoint| {
                Ok(TxInput {
                    outpoint,
                    pubkey: keypair.public_key.clone(),
                    signature: keypair.sign(&payload)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::new(inputs, outputs))
    }

    /// Id da transação: SHA-256 duplo da serialização canônica
    ///
    /// # Errors
    ///
    /// Retorna erro se a serialização falhar
    pub fn id(&self) -> Result<TxId> {
        let serialized = serde_json::to_vec(self)
            .map_err(|e| BlockchainError::SerializationError(e.to_string()))?;
        Ok(Hash256::dsha256(&serialized))
    }

    /// Bytes que cada entrada assina: a serialização canônica das saídas
    ///
    /// # Errors
    ///
    /// Retorna erro se a serialização falhar
    pub fn signing_payload(outputs: &[TxOutput]) -> Result<Vec<u8>> {
        serde_json::to_vec(outputs)
            .map_err(|e| BlockchainError::SerializationError(e.to_string()))
    }

    /// Verifica se é uma transação coinbase: sem entradas e uma única
    /// saída monetária. Transações sem entrada com saída de dados são
    /// transações comuns.
    #[must_use]
    pub fn is_coinbase(&self) -> bool {
        self.inputs.is_empty() && self.outputs.len() == 1 && self.outputs[0].value.is_coins()
    }

    /// Soma dos valores monetários das saídas
    ///
    /// # Errors
    ///
    /// Retorna erro se houver overflow na soma
    pub fn output_total(&self) -> Result<Amount> {
        let mut total = 0u64;
        for output in &self.outputs {
            total = total.checked_add(output.value.amount()).ok_or_else(|| {
                BlockchainError::InvalidTransaction("overflow na soma das saídas".to_string())
            })?;
        }
        Ok(total)
    }
}
