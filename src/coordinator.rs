//! Coordenador central: aceita conexões de mineradores, conduz a
//! máquina de estados da rodada de mineração e apura os votos.
//!
//! A rodada atravessa quatro fases. Em repouso (ocioso) só o comando
//! `mine` a movimenta; a primeira solução recebida vira o candidato
//! ativo e as demais entram na fila por ordem de chegada; a votação
//! termina cedo assim que a maioria estrita fica decidida; o veredito
//! é transmitido a todos e a rodada volta ao repouso ou passa ao
//! próximo candidato da fila.

use crate::wire::{self, CoordinatorMessage, MinerMessage};
use edubit_core::{
    target_for, validate_chain, Block, ChainStats, Transaction, TxOutput, UtxoSet, GENESIS,
};
use shared::{Amount, BlockchainError, KeyHash, KeyPair, PrivateKey, PublicKey, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identificador de uma conexão de minerador
pub type MinerId = Uuid;

/// Desfecho de uma rodada de mineração
#[derive(Debug)]
pub enum RoundOutcome {
    /// Um candidato obteve maioria estrita e foi anexado
    Accepted(Block),
    /// A fila de candidatos esgotou sem consenso
    NoConsensus,
}

/// Bloco proposto e quem o propôs
struct Candidate {
    block: Block,
    proposer: MinerId,
}

/// Fases da rodada. O estado inteiro vive sob um único mutex, então
/// cada observador enxerga exatamente uma fase por vez.
enum RoundState {
    Idle,
    Collecting {
        done: Option<oneshot::Sender<RoundOutcome>>,
    },
    Voting {
        active: Candidate,
        queue: VecDeque<Candidate>,
        yes: HashSet<MinerId>,
        no: HashSet<MinerId>,
        /// Mineradores consultados sobre o candidato ativo que ainda
        /// não responderam
        awaiting: HashSet<MinerId>,
        done: Option<oneshot::Sender<RoundOutcome>>,
    },
}

/// Mapa de conexões e estado da rodada, sob o mesmo mutex
struct Shared {
    miners: HashMap<MinerId, UnboundedSender<CoordinatorMessage>>,
    round: RoundState,
    /// Votos de candidatos já descartados que ainda vão chegar; a
    /// ordem FIFO do TCP garante que eles chegam antes do voto do
    /// candidato ativo, então basta descontá-los na chegada.
    stale_votes: HashMap<MinerId, u32>,
}

/// Cadeia do coordenador: a verdade apresentada ao usuário
struct ChainState {
    chain: Vec<Block>,
    utxo: UtxoSet,
}

struct Inner {
    shared: Mutex<Shared>,
    chain: Mutex<ChainState>,
    keys: Mutex<HashMap<MinerId, (String, String)>>,
}

#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    /// Abre o listener e começa a aceitar mineradores
    ///
    /// # Errors
    ///
    /// Retorna erro se a porta não puder ser aberta
    pub async fn bind(port: u16) -> Result<(Self, SocketAddr)> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        let addr = listener.local_addr()?;

        let chain = vec![GENESIS.clone()];
        let utxo = UtxoSet::rebuild(&chain)?;
        let inner = Arc::new(Inner {
            shared: Mutex::new(Shared {
                miners: HashMap::new(),
                round: RoundState::Idle,
                stale_votes: HashMap::new(),
            }),
            chain: Mutex::new(ChainState { chain, utxo }),
            keys: Mutex::new(HashMap::new()),
        });

        tokio::spawn(accept_loop(Arc::clone(&inner), listener));
        info!("🌐 coordenador escutando em {addr}");

        Ok((Self { inner }, addr))
    }

    /// Número de mineradores conectados
    #[must_use]
    pub fn miner_count(&self) -> usize {
        self.inner.shared.lock().unwrap().miners.len()
    }

    /// Cópia da cadeia do coordenador
    #[must_use]
    pub fn chain_snapshot(&self) -> Vec<Block> {
        self.inner.chain.lock().unwrap().chain.clone()
    }

    /// Resumo da cadeia do coordenador
    #[must_use]
    pub fn stats(&self) -> ChainStats {
        let chain = self.inner.chain.lock().unwrap();
        ChainStats::collect(&chain.chain, &chain.utxo)
    }

    /// Saldo de um keyhash na visão de UTXO do coordenador
    #[must_use]
    pub fn balance(&self, keyhash: &KeyHash) -> Amount {
        self.inner.chain.lock().unwrap().utxo.balance(keyhash)
    }

    /// Monta um pagamento assinado a partir de uma das carteiras
    /// coletadas pelo comando `keys`: a primeira com saldo suficiente
    /// paga, o troco volta para ela. Tão didático quanto a própria
    /// entrega das chaves ao coordenador.
    ///
    /// # Errors
    ///
    /// Retorna erro se nenhuma carteira foi coletada, se nenhuma cobre
    /// o valor mais a taxa ou se a assinatura falhar
    pub fn build_payment(&self, to: KeyHash, amount: Amount, fee: Amount) -> Result<Transaction> {
        let wallets = self.inner.keys.lock().unwrap().clone();
        if wallets.is_empty() {
            return Err(BlockchainError::NetworkError(
                "nenhuma carteira conhecida; use o comando keys antes".to_string(),
            ));
        }

        let needed = amount.checked_add(fee).ok_or_else(|| {
            BlockchainError::InvalidTransaction("overflow no valor do pagamento".to_string())
        })?;

        let chain = self.inner.chain.lock().unwrap();
        for (private_key, public_key) in wallets.into_values() {
            let keypair = KeyPair {
                public_key: PublicKey::from_hex(&public_key)?,
                private_key: PrivateKey::from_hex(&private_key)?,
            };
            let from = keypair.keyhash();

            match chain.utxo.select_outpoints(&from, needed) {
                Ok((outpoints, total)) => {
                    let mut outputs = vec![TxOutput::coins(amount, to)];
                    let change = total - needed;
                    if change > 0 {
                        outputs.push(TxOutput::coins(change, from));
                    }
                    return Transaction::spend(&keypair, outpoints, outputs);
                }
                Err(BlockchainError::InsufficientFunds) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(BlockchainError::InsufficientFunds)
    }

    /// Encaminha uma transação construída pelo usuário a todos os
    /// mineradores; quem valida e guarda no pool são eles.
    pub fn submit_transaction(&self, tx: Transaction) {
        let shared = self.inner.shared.lock().unwrap();
        Inner::broadcast(&shared.miners, &CoordinatorMessage::Transaction(tx));
    }

    /// Conduz uma rodada completa de mineração e espera o desfecho.
    ///
    /// O alvo é travado em função do número de mineradores conectados
    /// no momento da abertura. Não há tempo limite de votação.
    ///
    /// # Errors
    ///
    /// Retorna erro se já houver rodada em andamento ou se não houver
    /// mineradores conectados
    pub async fn mine(&self) -> Result<RoundOutcome> {
        let outcome_rx = {
            let mut shared = self.inner.shared.lock().unwrap();
            if !matches!(shared.round, RoundState::Idle) {
                return Err(BlockchainError::NetworkError(
                    "já existe uma rodada em andamento".to_string(),
                ));
            }
            if shared.miners.is_empty() {
                return Err(BlockchainError::NetworkError(
                    "nenhum minerador conectado".to_string(),
                ));
            }

            let target = target_for(shared.miners.len());
            info!(
                "⛏️ rodada aberta com {} mineradores, alvo {target}",
                shared.miners.len()
            );

            let (done, outcome_rx) = oneshot::channel();
            shared.round = RoundState::Collecting { done: Some(done) };
            Inner::broadcast(&shared.miners, &CoordinatorMessage::Mine { target });
            outcome_rx
        };

        outcome_rx
            .await
            .map_err(|_| BlockchainError::NetworkError("rodada abortada".to_string()))
    }

    /// Comando de integridade: difunde a cadeia própria; contrapropostas
    /// estritamente mais longas e válidas são adotadas e redifundidas,
    /// o que realiza a eleição da cadeia válida mais longa sobre o
    /// conjunto devolvido mais a cadeia local.
    pub fn integrity(&self) {
        let chain = self.inner.chain.lock().unwrap().chain.clone();
        let shared = self.inner.shared.lock().unwrap();
        info!(
            "🔍 verificação de integridade: difundindo cadeia de altura {}",
            chain.len()
        );
        Inner::broadcast(&shared.miners, &CoordinatorMessage::Chain(chain));
    }

    /// Solicita o par de chaves de todos os mineradores
    pub fn request_keys(&self) {
        let shared = self.inner.shared.lock().unwrap();
        Inner::broadcast(&shared.miners, &CoordinatorMessage::Keys);
    }

    /// Chaves já entregues pelos mineradores, como `(privada, pública)`
    #[must_use]
    pub fn keys_snapshot(&self) -> HashMap<MinerId, (String, String)> {
        self.inner.keys.lock().unwrap().clone()
    }

    /// Pede o encerramento gracioso de todos os mineradores
    pub fn shutdown(&self) {
        let shared = self.inner.shared.lock().unwrap();
        Inner::broadcast(&shared.miners, &CoordinatorMessage::CloseConnection);
    }
}

async fn accept_loop(inner: Arc<Inner>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let id = Uuid::new_v4();
                info!("🔗 minerador {id} conectado de {peer}");
                tokio::spawn(connection(Arc::clone(&inner), id, stream));
            }
            Err(e) => {
                warn!("listener encerrado: {e}");
                break;
            }
        }
    }
}

/// Atende uma conexão: uma tarefa de leitura aqui e uma de escrita
/// dedicada, para que cada envio saia serializado no socket.
async fn connection(inner: Arc<Inner>, id: MinerId, stream: TcpStream) {
    let (mut reader, mut writer) = wire::split(stream);
    let (out_tx, mut out_rx) = unbounded_channel::<CoordinatorMessage>();

    let write_task = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if wire::send(&mut writer, &message).await.is_err() {
                break;
            }
        }
    });

    {
        let mut shared = inner.shared.lock().unwrap();
        // Recém-chegados recebem a cadeia corrente para entrar em sincronia
        let chain = inner.chain.lock().unwrap().chain.clone();
        let _ = out_tx.send(CoordinatorMessage::Chain(chain));
        shared.miners.insert(id, out_tx);
    }

    loop {
        match wire::recv::<MinerMessage>(&mut reader).await {
            Ok(None) => break,
            Ok(Some(message)) => inner.dispatch(id, message),
            Err(e) => {
                // Mensagem malformada ou falha de leitura: só esta
                // conexão é derrubada
                warn!("conexão {id}: {e}");
                break;
            }
        }
    }

    inner.disconnect(id);
    write_task.abort();
    info!("👋 minerador {id} desconectado");
}

impl Inner {
    fn broadcast(
        miners: &HashMap<MinerId, UnboundedSender<CoordinatorMessage>>,
        message: &CoordinatorMessage,
    ) {
        for sender in miners.values() {
            let _ = sender.send(message.clone());
        }
    }

    fn dispatch(&self, id: MinerId, message: MinerMessage) {
        match message {
            MinerMessage::Solution(block) => self.on_solution(id, block),
            MinerMessage::Verify { accept } => self.on_vote(id, accept),
            MinerMessage::Chain(blocks) => self.on_chain(blocks),
            MinerMessage::Keys {
                private_key,
                public_key,
            } => {
                info!("🔑 chaves recebidas do minerador {id}");
                self.keys
                    .lock()
                    .unwrap()
                    .insert(id, (private_key, public_key));
            }
        }
    }

    fn on_solution(&self, id: MinerId, block: Block) {
        let mut shared = self.shared.lock().unwrap();

        if matches!(shared.round, RoundState::Idle) {
            debug!("solução de {id} fora de rodada, ignorada");
            return;
        }

        if let RoundState::Voting { queue, .. } = &mut shared.round {
            debug!("solução de {id} enfileirada atrás do candidato ativo");
            queue.push_back(Candidate {
                block,
                proposer: id,
            });
            return;
        }

        // Fase de coleta: a primeira solução vira o candidato ativo
        let RoundState::Collecting { done } =
            std::mem::replace(&mut shared.round, RoundState::Idle)
        else {
            return;
        };
        info!("🧩 primeira solução da rodada, proposta por {id}");
        let candidate = Candidate {
            block,
            proposer: id,
        };
        Self::install_voting(&mut shared, candidate, VecDeque::new(), done);
        self.evaluate(&mut shared);
    }

    /// Instala a fase de votação para um candidato: o proponente conta
    /// como sim sem ida e volta, todos os demais conectados são
    /// consultados.
    fn install_voting(
        shared: &mut Shared,
        active: Candidate,
        queue: VecDeque<Candidate>,
        done: Option<oneshot::Sender<RoundOutcome>>,
    ) {
        let mut yes = HashSet::new();
        if shared.miners.contains_key(&active.proposer) {
            yes.insert(active.proposer);
        }

        let awaiting: HashSet<MinerId> = shared
            .miners
            .keys()
            .copied()
            .filter(|id| *id != active.proposer)
            .collect();

        for id in &awaiting {
            if let Some(sender) = shared.miners.get(id) {
                let _ = sender.send(CoordinatorMessage::Verify(active.block.clone()));
            }
        }

        shared.round = RoundState::Voting {
            active,
            queue,
            yes,
            no: HashSet::new(),
            awaiting,
            done,
        };
    }

    fn on_vote(&self, id: MinerId, accept: bool) {
        let mut shared = self.shared.lock().unwrap();

        // Voto de um candidato já descartado nesta conexão
        if let Some(pending) = shared.stale_votes.get_mut(&id) {
            if *pending > 0 {
                *pending -= 1;
                debug!("voto atrasado de {id} descartado");
                return;
            }
        }

        match &mut shared.round {
            RoundState::Voting {
                yes, no, awaiting, ..
            } => {
                if !awaiting.remove(&id) {
                    debug!("voto duplicado ou não solicitado de {id}, ignorado");
                    return;
                }
                if accept {
                    yes.insert(id);
                } else {
                    no.insert(id);
                }
                self.evaluate(&mut shared);
            }
            _ => debug!("voto de {id} fora de votação, ignorado"),
        }
    }

    /// Apura a votação corrente. Um mesmo passo pode encadear vários
    /// candidatos: a rejeição do ativo promove o próximo da fila, que
    /// pode por sua vez decidir de imediato.
    fn evaluate(&self, shared: &mut Shared) {
        loop {
            let decision = {
                let RoundState::Voting {
                    yes, no, awaiting, ..
                } = &mut shared.round
                else {
                    return;
                };

                // O denominador é o conjunto de mineradores conectados
                // no momento da apuração
                let connected = &shared.miners;
                yes.retain(|id| connected.contains_key(id));
                no.retain(|id| connected.contains_key(id));
                awaiting.retain(|id| connected.contains_key(id));

                let n = connected.len();
                let majority = n / 2;
                if yes.len() > majority {
                    Some(true)
                } else if no.len() >= n - majority {
                    // O candidato não alcança mais a maioria estrita
                    Some(false)
                } else if awaiting.is_empty() {
                    // Todos votaram e não houve maioria
                    Some(false)
                } else {
                    None
                }
            };

            let Some(accepted) = decision else { return };

            let RoundState::Voting {
                active,
                mut queue,
                awaiting,
                done,
                ..
            } = std::mem::replace(&mut shared.round, RoundState::Idle)
            else {
                return;
            };

            if accepted {
                info!(
                    "✅ candidato {} aceito por maioria estrita",
                    active.block.hash()
                );
                Self::broadcast(
                    &shared.miners,
                    &CoordinatorMessage::Verdict {
                        accept: true,
                        block: active.block.clone(),
                    },
                );
                self.apply_accepted(&active.block);
                // Votos que a maioria antecipada dispensou ainda chegam
                for id in awaiting {
                    *shared.stale_votes.entry(id).or_default() += 1;
                }
                // Candidatos ainda na fila são descartados quando um vence
                if !queue.is_empty() {
                    debug!("{} candidatos remanescentes descartados", queue.len());
                }
                if let Some(done) = done {
                    let _ = done.send(RoundOutcome::Accepted(active.block));
                }
                return;
            }

            info!("❌ candidato {} rejeitado", active.block.hash());
            Self::broadcast(
                &shared.miners,
                &CoordinatorMessage::Verdict {
                    accept: false,
                    block: active.block,
                },
            );

            // Quem ainda não votou mandará o voto deste candidato
            // descartado; marca para descontar na chegada
            for id in awaiting {
                *shared.stale_votes.entry(id).or_default() += 1;
            }

            match queue.pop_front() {
                Some(next) => {
                    info!("próximo candidato da fila entra em votação");
                    Self::install_voting(shared, next, queue, done);
                    // volta ao topo do laço para apurar o novo estado
                }
                None => {
                    info!("rodada encerrada sem consenso");
                    if let Some(done) = done {
                        let _ = done.send(RoundOutcome::NoConsensus);
                    }
                    return;
                }
            }
        }
    }

    /// Anexa um bloco aceito à cadeia do coordenador
    fn apply_accepted(&self, block: &Block) {
        let mut chain = self.chain.lock().unwrap();
        let tip_hash = chain.chain.last().map(Block::hash);

        if tip_hash == Some(block.header.parent_hash) {
            if let Err(e) = chain.utxo.apply_block(block) {
                warn!("falha ao aplicar o bloco aceito ao UTXO: {e}");
            }
            chain.chain.push(block.clone());
            let stats = ChainStats::collect(&chain.chain, &chain.utxo);
            info!(
                "📊 cadeia do coordenador: altura {}, {} transações, {} UTXOs",
                stats.height, stats.total_transactions, stats.total_utxos
            );
        } else if chain.chain.iter().any(|b| b.hash() == block.hash()) {
            debug!("bloco aceito já presente na cadeia");
        } else {
            // O comando de integridade ressincroniza este caso
            warn!(
                "bloco aceito {} não encadeia na ponta local",
                block.hash()
            );
        }
    }

    /// Cadeia devolvida por um minerador (contraproposta ou sincronia)
    fn on_chain(&self, candidate: Vec<Block>) {
        let adopted = {
            let mut chain = self.chain.lock().unwrap();
            if candidate.len() > chain.chain.len() {
                match validate_chain(&candidate) {
                    Ok(utxo) => {
                        info!(
                            "🔁 cadeia do coordenador substituída: altura {} -> {}",
                            chain.chain.len(),
                            candidate.len()
                        );
                        chain.chain = candidate.clone();
                        chain.utxo = utxo;
                        true
                    }
                    Err(e) => {
                        warn!("contraproposta de cadeia recusada: {e}");
                        false
                    }
                }
            } else {
                false
            }
        };

        if adopted {
            let shared = self.shared.lock().unwrap();
            Self::broadcast(&shared.miners, &CoordinatorMessage::Chain(candidate));
        }
    }

    fn disconnect(&self, id: MinerId) {
        let mut shared = self.shared.lock().unwrap();
        shared.miners.remove(&id);
        shared.stale_votes.remove(&id);

        if shared.miners.is_empty() {
            // Sem mineradores a rodada não tem como prosseguir
            let state = std::mem::replace(&mut shared.round, RoundState::Idle);
            match state {
                RoundState::Collecting { done: Some(done) }
                | RoundState::Voting {
                    done: Some(done), ..
                } => {
                    let _ = done.send(RoundOutcome::NoConsensus);
                }
                _ => {}
            }
            return;
        }

        // A saída de um votante pode decidir a votação em andamento
        if matches!(shared.round, RoundState::Voting { .. }) {
            self.evaluate(&mut shared);
        }
    }
}
