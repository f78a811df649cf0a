//! Protocolo de fio entre coordenador e mineradores: quadros
//! delimitados por tamanho sobre TCP, com carga JSON autodescritiva.
//!
//! Uma mensagem que não decodifica é um erro local da conexão; quem a
//! recebeu encerra aquela conexão e o resto da rede segue intacta.

use bytes::Bytes;
use edubit_core::{Block, Hash256, Transaction};
use futures::{SinkExt, StreamExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use shared::{BlockchainError, Result};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

/// Porta TCP padrão do coordenador
pub const DEFAULT_PORT: u16 = 65432;

/// Mensagens do coordenador para os mineradores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum CoordinatorMessage {
    /// Encaminha uma transação construída pelo usuário
    Transaction(Transaction),
    /// Abre uma rodada de mineração com o alvo travado pela rodada
    Mine { target: Hash256 },
    /// Pede o voto do minerador sobre um bloco candidato
    Verify(Block),
    /// Desfecho da votação do candidato ativo
    Verdict { accept: bool, block: Block },
    /// Instala uma cadeia (entrada na rede ou comando de integridade)
    Chain(Vec<Block>),
    /// Solicita o par de chaves do minerador
    Keys,
    /// Encerramento gracioso da conexão
    CloseConnection,
}

/// Mensagens dos mineradores para o coordenador
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MinerMessage {
    /// Anuncia um bloco que satisfez o alvo
    Solution(Block),
    /// Resposta de voto sobre o candidato ativo
    Verify { accept: bool },
    /// Contraproposta: a cadeia local é mais longa
    Chain(Vec<Block>),
    /// Entrega do par de chaves (uso estritamente didático)
    Keys {
        #[serde(rename = "priv")]
        private_key: String,
        #[serde(rename = "pub")]
        public_key: String,
    },
}

pub type WireReader = FramedRead<ReadHalf<TcpStream>, LengthDelimitedCodec>;
pub type WireWriter = FramedWrite<WriteHalf<TcpStream>, LengthDelimitedCodec>;

/// Divide um socket em um leitor e um escritor de quadros
#[must_use]
pub fn split(stream: TcpStream) -> (WireReader, WireWriter) {
    let (read, write) = tokio::io::split(stream);
    (
        FramedRead::new(read, LengthDelimitedCodec::new()),
        FramedWrite::new(write, LengthDelimitedCodec::new()),
    )
}

/// Serializa e envia uma mensagem em um quadro
///
/// # Errors
///
/// Retorna erro se a serialização ou a escrita no socket falharem
pub async fn send<T: Serialize>(writer: &mut WireWriter, message: &T) -> Result<()> {
    let raw = serde_json::to_vec(message)
        .map_err(|e| BlockchainError::SerializationError(e.to_string()))?;
    writer
        .send(Bytes::from(raw))
        .await
        .map_err(|e| BlockchainError::NetworkError(e.to_string()))
}

/// Lê a próxima mensagem; `None` quando o par fechou a conexão
///
/// # Errors
///
/// Retorna `MalformedMessage` para quadros que não decodificam e
/// `NetworkError` para falhas de leitura
pub async fn recv<T: DeserializeOwned>(reader: &mut WireReader) -> Result<Option<T>> {
    match reader.next().await {
        None => Ok(None),
        Some(Err(e)) => Err(BlockchainError::NetworkError(e.to_string())),
        Some(Ok(frame)) => serde_json::from_slice(&frame)
            .map(Some)
            .map_err(|e| BlockchainError::MalformedMessage(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edubit_core::{TxOutput, GENESIS};
    use shared::KeyHash;

    fn round_trip_coordinator(message: &CoordinatorMessage) {
        let json = serde_json::to_string(message).unwrap();
        let back: CoordinatorMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(&back, message);
    }

    fn round_trip_miner(message: &MinerMessage) {
        let json = serde_json::to_string(message).unwrap();
        let back: MinerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(&back, message);
    }

    #[test]
    fn test_every_coordinator_message_round_trips() {
        let tx = Transaction::new(
            vec![],
            vec![TxOutput::data("carga".to_string(), KeyHash::zero())],
        );

        round_trip_coordinator(&CoordinatorMessage::Transaction(tx));
        round_trip_coordinator(&CoordinatorMessage::Mine {
            target: Hash256::with_leading_zero_bits(12),
        });
        round_trip_coordinator(&CoordinatorMessage::Verify(GENESIS.clone()));
        round_trip_coordinator(&CoordinatorMessage::Verdict {
            accept: true,
            block: GENESIS.clone(),
        });
        round_trip_coordinator(&CoordinatorMessage::Chain(vec![GENESIS.clone()]));
        round_trip_coordinator(&CoordinatorMessage::Keys);
        round_trip_coordinator(&CoordinatorMessage::CloseConnection);
    }

    #[test]
    fn test_every_miner_message_round_trips() {
        round_trip_miner(&MinerMessage::Solution(GENESIS.clone()));
        round_trip_miner(&MinerMessage::Verify { accept: false });
        round_trip_miner(&MinerMessage::Chain(vec![GENESIS.clone()]));
        round_trip_miner(&MinerMessage::Keys {
            private_key: "0a0b".to_string(),
            public_key: "0c0d".to_string(),
        });
    }

    #[test]
    fn test_wire_tags_are_stable() {
        let mine = serde_json::to_value(CoordinatorMessage::Mine {
            target: Hash256::zero(),
        })
        .unwrap();
        assert_eq!(mine["type"], "mine");

        let close = serde_json::to_value(CoordinatorMessage::CloseConnection).unwrap();
        assert_eq!(close["type"], "close_connection");

        let vote = serde_json::to_value(MinerMessage::Verify { accept: true }).unwrap();
        assert_eq!(vote["type"], "verify");
        assert_eq!(vote["payload"]["accept"], true);

        let keys = serde_json::to_value(MinerMessage::Keys {
            private_key: "aa".to_string(),
            public_key: "bb".to_string(),
        })
        .unwrap();
        assert_eq!(keys["payload"]["priv"], "aa");
        assert_eq!(keys["payload"]["pub"], "bb");
    }

    #[test]
    fn test_malformed_payload_is_rejected() {
        let garbled = r#"{"type":"mine","payload":{"target":"not-hex"}}"#;
        assert!(serde_json::from_str::<CoordinatorMessage>(garbled).is_err());

        let unknown = r#"{"type":"gossip","payload":{}}"#;
        assert!(serde_json::from_str::<CoordinatorMessage>(unknown).is_err());
    }
}
