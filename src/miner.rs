//! Nó minerador: mantém a cópia local da cadeia, o conjunto UTXO, o
//! pool de transações e o trabalhador de mineração, e atende as
//! mensagens do coordenador.

use crate::wire::{self, CoordinatorMessage, MinerMessage};
use edubit_core::{
    assemble_template, validate_chain, validate_transaction, Block, BlockVerifier, ChainStats,
    Hash256, KeyHash, MineWorker, TxPool, UtxoSet, GENESIS,
};
use shared::{KeyPair, Result};
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

/// Estado compartilhado do nó: cadeia, UTXO e pool sob um único mutex
struct NodeState {
    chain: Vec<Block>,
    utxo: UtxoSet,
    pool: TxPool,
}

pub struct MinerNode {
    keypair: KeyPair,
    verifier: Box<dyn BlockVerifier>,
    state: Mutex<NodeState>,
    worker: Mutex<Option<MineWorker>>,
    solutions: UnboundedSender<Block>,
}

impl MinerNode {
    /// Cria um nó partindo do gênese. Devolve também o receptor por
    /// onde o trabalhador entrega as soluções encontradas.
    ///
    /// # Errors
    ///
    /// Retorna erro se o estado inicial não puder ser derivado do gênese
    pub fn new(
        keypair: KeyPair,
        verifier: Box<dyn BlockVerifier>,
    ) -> Result<(Arc<Self>, UnboundedReceiver<Block>)> {
        let chain = vec![GENESIS.clone()];
        let utxo = UtxoSet::rebuild(&chain)?;
        let (solutions, solution_rx) = unbounded_channel();

        let node = Arc::new(Self {
            keypair,
            verifier,
            state: Mutex::new(NodeState {
                chain,
                utxo,
                pool: TxPool::new(),
            }),
            worker: Mutex::new(None),
            solutions,
        });

        Ok((node, solution_rx))
    }

    /// Keyhash da carteira deste minerador
    #[must_use]
    pub fn keyhash(&self) -> KeyHash {
        self.keypair.keyhash()
    }

    /// Altura atual (número de blocos) da cadeia local
    #[must_use]
    pub fn chain_len(&self) -> usize {
        self.state.lock().unwrap().chain.len()
    }

    /// Cópia da cadeia local
    #[must_use]
    pub fn chain_snapshot(&self) -> Vec<Block> {
        self.state.lock().unwrap().chain.clone()
    }

    /// Número de transações pendentes no pool
    #[must_use]
    pub fn pool_len(&self) -> usize {
        self.state.lock().unwrap().pool.len()
    }

    /// Valida a transação contra o UTXO local e, passando, insere no
    /// pool. Transações inválidas são descartadas em silêncio, só com
    /// registro no log.
    fn handle_transaction(&self, tx: edubit_core::Transaction) {
        let mut state = self.state.lock().unwrap();
        match validate_transaction(&tx, &state.utxo) {
            Ok(_) => match state.pool.insert(tx) {
                Ok(true) => debug!("transação aceita no pool ({} pendentes)", state.pool.len()),
                Ok(false) => debug!("transação repetida ignorada"),
                Err(e) => warn!("falha ao inserir transação no pool: {e}"),
            },
            Err(e) => debug!("transação descartada: {e}"),
        }
    }

    /// Abre uma rodada local: monta o modelo (coinbase primeiro, pool
    /// em ordem de inserção) e entrega ao trabalhador. Ignorado se já
    /// existe um trabalhador ativo.
    fn handle_mine(&self, target: Hash256) {
        let mut worker_slot = self.worker.lock().unwrap();
        if worker_slot.as_ref().is_some_and(|w| !w.is_finished()) {
            debug!("comando mine ignorado: trabalhador ainda ativo");
            return;
        }

        let template = {
            let state = self.state.lock().unwrap();
            let tip = state.chain.last().unwrap(); // gênese sempre existe
            assemble_template(
                &tip.header,
                target,
                self.keypair.keyhash(),
                state.pool.snapshot(),
                &state.utxo,
            )
        };

        match template {
            Ok(template) => {
                info!(
                    "⛏️ minerando sobre a ponta {} com {} transações",
                    template.header.parent_hash,
                    template.transactions.len()
                );
                let sender = self.solutions.clone();
                *worker_slot = Some(MineWorker::spawn(template, move |block| {
                    let _ = sender.send(block);
                }));
            }
            Err(e) => warn!("falha ao montar o modelo de bloco: {e}"),
        }
    }

    /// Vota no candidato conforme a estratégia configurada
    fn handle_verify(&self, block: &Block) -> MinerMessage {
        let state = self.state.lock().unwrap();
        let parent = state.chain.last().map(|tip| &tip.header);
        let accept = self.verifier.verify(block, parent, &state.utxo);
        debug!("voto sobre o candidato {}: {accept}", block.hash());
        MinerMessage::Verify { accept }
    }

    /// Aplica o desfecho da rodada. Qualquer veredito cancela o
    /// trabalhador; só o aceite altera o estado local.
    fn handle_verdict(&self, accept: bool, block: Block) -> Result<()> {
        if let Some(worker) = self.worker.lock().unwrap().take() {
            worker.stop();
        }

        if !accept {
            debug!("candidato {} rejeitado pela rede", block.hash());
            return Ok(());
        }

        let mut state = self.state.lock().unwrap();
        let tip_hash = state.chain.last().unwrap().hash(); // gênese sempre existe
        if tip_hash == block.hash() {
            // Reenvio do veredito para o bloco que já é a ponta
            return Ok(());
        }

        state.utxo.apply_block(&block)?;
        state.pool.remove_included(&block)?;
        let hash = block.hash();
        state.chain.push(block);

        let stats = ChainStats::collect(&state.chain, &state.utxo);
        info!(
            "✅ bloco {hash} anexado: altura {}, {} transações, {} UTXOs",
            stats.height, stats.total_transactions, stats.total_utxos
        );

        Ok(())
    }

    /// Adota cadeias válidas estritamente mais longas; responde com a
    /// cadeia local quando ela é a estritamente mais longa.
    fn handle_chain(&self, candidate: Vec<Block>) -> Option<MinerMessage> {
        let mut state = self.state.lock().unwrap();

        if candidate == state.chain {
            return None; // retransmissão idempotente
        }

        if candidate.len() > state.chain.len() {
            match validate_chain(&candidate) {
                Ok(utxo) => {
                    info!(
                        "🔁 cadeia local substituída: altura {} -> {}",
                        state.chain.len(),
                        candidate.len()
                    );
                    state.pool.refilter(&utxo);
                    state.chain = candidate;
                    state.utxo = utxo;
                }
                Err(e) => warn!("cadeia proposta recusada: {e}"),
            }
            return None;
        }

        if state.chain.len() > candidate.len() {
            debug!("contrapropondo a cadeia local, mais longa");
            return Some(MinerMessage::Chain(state.chain.clone()));
        }

        None
    }

    /// Entrega o par de chaves ao coordenador (uso didático)
    fn handle_keys(&self) -> MinerMessage {
        MinerMessage::Keys {
            private_key: self.keypair.private_key.to_hex(),
            public_key: self.keypair.public_key.to_hex(),
        }
    }

    /// Cancela o trabalhador, se houver, e espera a thread terminar
    fn shutdown_worker(&self) {
        if let Some(worker) = self.worker.lock().unwrap().take() {
            worker.stop();
        }
    }

    /// Conecta ao coordenador e atende mensagens até o encerramento
    ///
    /// # Errors
    ///
    /// Retorna erro em falhas de conexão ou de escrita no socket
    pub async fn run(
        self: Arc<Self>,
        coordinator_addr: String,
        mut solutions: UnboundedReceiver<Block>,
    ) -> Result<()> {
        let stream = TcpStream::connect(&coordinator_addr).await?;
        let (mut reader, mut writer) = wire::split(stream);
        info!(
            "🔗 conectado ao coordenador em {coordinator_addr}; carteira {}",
            self.keyhash()
        );

        loop {
            tokio::select! {
                Some(block) = solutions.recv() => {
                    info!("🧩 solução encontrada: {}", block.hash());
                    wire::send(&mut writer, &MinerMessage::Solution(block)).await?;
                }
                incoming = wire::recv::<CoordinatorMessage>(&mut reader) => {
                    match incoming {
                        Ok(None) => {
                            info!("coordenador encerrou a conexão");
                            break;
                        }
                        Err(e) => {
                            warn!("conexão encerrada: {e}");
                            break;
                        }
                        Ok(Some(CoordinatorMessage::Transaction(tx))) => self.handle_transaction(tx),
                        Ok(Some(CoordinatorMessage::Mine { target })) => self.handle_mine(target),
                        Ok(Some(CoordinatorMessage::Verify(block))) => {
                            let reply = self.handle_verify(&block);
                            wire::send(&mut writer, &reply).await?;
                        }
                        Ok(Some(CoordinatorMessage::Verdict { accept, block })) => {
                            if let Err(e) = self.handle_verdict(accept, block) {
                                warn!("falha ao aplicar o veredito: {e}");
                            }
                        }
                        Ok(Some(CoordinatorMessage::Chain(blocks))) => {
                            if let Some(reply) = self.handle_chain(blocks) {
                                wire::send(&mut writer, &reply).await?;
                            }
                        }
                        Ok(Some(CoordinatorMessage::Keys)) => {
                            let reply = self.handle_keys();
                            wire::send(&mut writer, &reply).await?;
                        }
                        Ok(Some(CoordinatorMessage::CloseConnection)) => {
                            info!("encerramento solicitado pelo coordenador");
                            break;
                        }
                    }
                }
            }
        }

        // Cancela e junta o trabalhador antes de derrubar o socket
        self.shutdown_worker();
        info!(
            "🛑 nó encerrado: cadeia com {} blocos, {} transações pendentes",
            self.chain_len(),
            self.pool_len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edubit_core::{
        mine_block, HonestVerifier, OutPoint, SelfishVerifier, Transaction, TxOutput, BLOCK_REWARD,
    };
    use std::time::Duration;

    fn honest_node() -> (Arc<MinerNode>, UnboundedReceiver<Block>) {
        MinerNode::new(KeyPair::generate(), Box::new(HonestVerifier)).unwrap()
    }

    fn data_tx(payload: &str) -> Transaction {
        Transaction::new(
            vec![],
            vec![TxOutput::data(payload.to_string(), KeyHash::zero())],
        )
    }

    /// Minera um filho da ponta dada com alvo trivial
    fn easy_child(parent: &Block, pool: Vec<Transaction>, miner: &KeyPair, utxo: &UtxoSet) -> Block {
        let template = assemble_template(
            &parent.header,
            Hash256::max(),
            miner.keyhash(),
            pool,
            utxo,
        )
        .unwrap();
        mine_block(template)
    }

    #[test]
    fn test_transactions_enter_pool_idempotently() {
        let (node, _rx) = honest_node();

        node.handle_transaction(data_tx("uma"));
        node.handle_transaction(data_tx("uma"));
        node.handle_transaction(data_tx("outra"));

        assert_eq!(node.pool_len(), 2);
    }

    #[test]
    fn test_invalid_transaction_is_dropped_silently() {
        let (node, _rx) = honest_node();
        let alice = KeyPair::generate();

        // Gasta um outpoint que não existe no UTXO local
        let ghost = Transaction::spend(
            &alice,
            vec![OutPoint::new(Hash256::dsha256(b"fantasma"), 0)],
            vec![TxOutput::coins(10, alice.keyhash())],
        )
        .unwrap();
        node.handle_transaction(ghost);

        assert_eq!(node.pool_len(), 0);
    }

    #[tokio::test]
    async fn test_mine_produces_a_solution() {
        let (node, mut rx) = honest_node();
        node.handle_transaction(data_tx("entra no bloco"));

        node.handle_mine(Hash256::with_leading_zero_bits(8));

        let block = tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert!(block.header.meets_target());
        assert_eq!(block.transactions.len(), 2);
        assert!(block.transactions[0].is_coinbase());
        assert_eq!(block.transactions[1], data_tx("entra no bloco"));
    }

    #[test]
    fn test_second_mine_is_ignored_while_worker_runs() {
        let (node, _rx) = honest_node();

        node.handle_mine(Hash256::with_leading_zero_bits(220));
        node.handle_mine(Hash256::with_leading_zero_bits(220));

        assert!(node.worker.lock().unwrap().is_some());
        node.shutdown_worker();
    }

    #[test]
    fn test_verdict_accept_updates_state_and_is_idempotent() {
        let (node, _rx) = honest_node();
        let proposer = KeyPair::generate();

        node.handle_transaction(data_tx("consumida"));
        node.handle_transaction(data_tx("sobrevive"));

        // Bloco alheio que consome uma das transações do pool
        let block = easy_child(
            &GENESIS,
            vec![data_tx("consumida")],
            &proposer,
            &UtxoSet::new(),
        );

        node.handle_verdict(true, block.clone()).unwrap();
        assert_eq!(node.chain_len(), 2);
        assert_eq!(node.pool_len(), 1);

        // Reenvio do mesmo veredito não muda nada
        node.handle_verdict(true, block).unwrap();
        assert_eq!(node.chain_len(), 2);
        assert_eq!(node.pool_len(), 1);
    }

    #[test]
    fn test_verdict_reject_keeps_state() {
        let (node, _rx) = honest_node();
        let proposer = KeyPair::generate();
        let block = easy_child(&GENESIS, vec![], &proposer, &UtxoSet::new());

        node.handle_verdict(false, block).unwrap();
        assert_eq!(node.chain_len(), 1);
    }

    #[test]
    fn test_honest_vote_follows_validation() {
        let (node, _rx) = honest_node();
        let proposer = KeyPair::generate();

        let good = easy_child(&GENESIS, vec![], &proposer, &UtxoSet::new());
        assert_eq!(node.handle_verify(&good), MinerMessage::Verify { accept: true });

        let mut bad = easy_child(&GENESIS, vec![], &proposer, &UtxoSet::new());
        bad.transactions[0] = Transaction::coinbase(BLOCK_REWARD * 2, proposer.keyhash());
        assert_eq!(node.handle_verify(&bad), MinerMessage::Verify { accept: false });
    }

    #[test]
    fn test_selfish_vote_is_always_no() {
        let (node, _rx) =
            MinerNode::new(KeyPair::generate(), Box::new(SelfishVerifier)).unwrap();
        let proposer = KeyPair::generate();

        let good = easy_child(&GENESIS, vec![], &proposer, &UtxoSet::new());
        assert_eq!(node.handle_verify(&good), MinerMessage::Verify { accept: false });
    }

    #[test]
    fn test_chain_adoption_and_counter_proposal() {
        let (node, _rx) = honest_node();
        let other = KeyPair::generate();

        // Cadeia mais longa e válida é adotada
        let block1 = easy_child(&GENESIS, vec![], &other, &UtxoSet::new());
        let utxo1 = UtxoSet::rebuild(&[GENESIS.clone(), block1.clone()]).unwrap();
        let block2 = easy_child(&block1, vec![], &other, &utxo1);
        let longer = vec![GENESIS.clone(), block1, block2];

        assert!(node.handle_chain(longer.clone()).is_none());
        assert_eq!(node.chain_len(), 3);

        // Retransmissão da mesma cadeia é um no-op
        assert!(node.handle_chain(longer.clone()).is_none());
        assert_eq!(node.chain_len(), 3);

        // Cadeia mais curta provoca contraproposta com a cadeia local
        let reply = node.handle_chain(vec![GENESIS.clone()]);
        assert_eq!(reply, Some(MinerMessage::Chain(longer)));
    }

    #[test]
    fn test_chain_adoption_refilters_pool() {
        let (node, _rx) = honest_node();
        let other = KeyPair::generate();

        // A transação depende de um UTXO que só existe na cadeia atual
        let block1 = easy_child(&GENESIS, vec![], &other, &UtxoSet::new());
        node.handle_chain(vec![GENESIS.clone(), block1.clone()]);

        let outpoint = OutPoint::new(block1.transactions[0].id().unwrap(), 0);
        let spend = Transaction::spend(
            &other,
            vec![outpoint],
            vec![TxOutput::coins(BLOCK_REWARD, other.keyhash())],
        )
        .unwrap();
        node.handle_transaction(spend);
        assert_eq!(node.pool_len(), 1);

        // Um fork mais longo que não contém aquele UTXO invalida o pool
        let fork1 = easy_child(&GENESIS, vec![data_tx("fork")], &other, &UtxoSet::new());
        let fork_utxo = UtxoSet::rebuild(&[GENESIS.clone(), fork1.clone()]).unwrap();
        let fork2 = easy_child(&fork1, vec![], &other, &fork_utxo);
        node.handle_chain(vec![GENESIS.clone(), fork1, fork2]);

        assert_eq!(node.chain_len(), 3);
        assert_eq!(node.pool_len(), 0);
    }

    #[test]
    fn test_verdict_cancels_running_worker() {
        let (node, _rx) = honest_node();
        let proposer = KeyPair::generate();

        // Alvo duro: o trabalhador não acha solução sozinho
        node.handle_mine(Hash256::with_leading_zero_bits(220));
        assert!(node.worker.lock().unwrap().as_ref().is_some_and(|w| !w.is_finished()));

        let foreign = easy_child(&GENESIS, vec![], &proposer, &UtxoSet::new());
        node.handle_verdict(true, foreign.clone()).unwrap();

        // Trabalhador terminou e a cadeia avançou para o bloco alheio
        assert!(node.worker.lock().unwrap().is_none());
        assert_eq!(node.chain_len(), 2);
        assert_eq!(node.chain_snapshot()[1], foreign);
    }

    #[test]
    fn test_keys_reply_round_trips_the_wallet() {
        let (node, _rx) = honest_node();

        let MinerMessage::Keys {
            private_key,
            public_key,
        } = node.handle_keys()
        else {
            panic!("resposta inesperada");
        };

        let public = shared::PublicKey::from_hex(&public_key).unwrap();
        assert_eq!(public.keyhash(), node.keyhash());
        assert!(shared::PrivateKey::from_hex(&private_key).is_ok());
    }
}
