use thiserror::Error;

/// Erros do núcleo da blockchain e do protocolo de coordenação
#[derive(Error, Debug)]
pub enum BlockchainError {
    #[error("Transação inválida: {0}")]
    InvalidTransaction(String),

    #[error("Bloco inválido: {0}")]
    InvalidBlock(String),

    #[error("Cadeia inválida: {0}")]
    InvalidChain(String),

    #[error("Mensagem malformada: {0}")]
    MalformedMessage(String),

    #[error("Rodada sem consenso: nenhum candidato obteve maioria estrita")]
    ConsensusFailure,

    #[error("Assinatura inválida")]
    InvalidSignature,

    #[error("Hash inválido")]
    InvalidHash,

    #[error("UTXO não encontrado")]
    UtxoNotFound,

    #[error("Fundos insuficientes")]
    InsufficientFunds,

    #[error("Erro criptográfico: {0}")]
    CryptographicError(String),

    #[error("Erro de serialização: {0}")]
    SerializationError(String),

    #[error("Erro de I/O: {0}")]
    IoError(String),

    #[error("Erro de rede: {0}")]
    NetworkError(String),
}

impl From<std::io::Error> for BlockchainError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}
