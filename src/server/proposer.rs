//! Paxos proposer role: drives one client mutation through prepare and
//! accept rounds until it is decided or the retry budget runs out.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::server::{
    Accepted, Command, Decree, DecreeId, PaxosNode, PaxosRpc, ProposalId,
    ProposalIdGen, ReplicaConfig, ReplicaId,
};
use crate::utils::{Bitmap, PaxstoreError};

use rand::Rng;

use tokio::sync::mpsc;
use tokio::time::{self, Duration, Instant};

/// Outcome of a single Paxos round.
#[derive(Debug, PartialEq, Eq)]
enum RoundOutcome {
    /// My own decree was decided.
    Decided,

    /// A previously accepted decree of someone else was decided in my
    /// place.
    Substituted,

    /// No majority in one of the phases.
    Failed,
}

/// Result of the prepare phase.
#[derive(Debug, Default)]
struct PrepareTally {
    /// Replicas that granted the promise.
    acks: Option<Bitmap>,

    /// Highest promised ID reported by a rejecting acceptor.
    max_seen: ProposalId,

    /// Highest-numbered accepted decree not yet learned here.
    highest: Option<Accepted>,

    /// Replicas still holding a decree I have already learned.
    stale: Vec<(ReplicaId, Accepted)>,
}

/// The proposer of one replica. Shared by every client connection served
/// by the replica; concurrent `propose` calls run independent rounds.
pub struct Proposer {
    /// My replica ID.
    me: ReplicaId,

    /// Cluster size.
    population: u8,

    /// Majority quorum size.
    quorum_cnt: u8,

    /// The local node; called directly, before any peer.
    node: Arc<PaxosNode>,

    /// RPC handles of all other replicas.
    peers: Vec<(ReplicaId, Arc<dyn PaxosRpc>)>,

    /// Map from peer ID -> sender side of its learn queue. Decisions reach
    /// each peer in the order I made them.
    tx_learns: HashMap<ReplicaId, mpsc::UnboundedSender<(ProposalId, Decree)>>,

    /// Proposal ID generator in my residue class.
    id_gen: ProposalIdGen,

    /// Sequence number for the next decree identity. Starts from the wall
    /// clock at construction, so a restarted replica does not reuse the
    /// decree IDs of its previous incarnation.
    next_seq: AtomicU64,

    /// Bound on each prepare/accept collection.
    quorum_timeout: Duration,

    /// Failed rounds allowed per proposal.
    max_retries: u32,

    /// Linear backoff unit.
    backoff: Duration,
}

impl Proposer {
    /// Creates a new proposer for `node` among `peers`, which must hold
    /// exactly the other replicas of the cluster. Spawns one learn messenger
    /// thread per peer.
    pub fn new(
        node: Arc<PaxosNode>,
        peers: Vec<(ReplicaId, Arc<dyn PaxosRpc>)>,
        config: &ReplicaConfig,
    ) -> Result<Self, PaxstoreError> {
        let me = node.id();
        if peers.len() >= u8::MAX as usize {
            return logged_err!(me; "too many peers {}", peers.len());
        }
        let population = peers.len() as u8 + 1;
        if me >= population
            || peers.iter().any(|(p, _)| *p == me || *p >= population)
        {
            return logged_err!(
                me;
                "invalid peer set for population {}",
                population
            );
        }
        if config.max_retries == 0 {
            return logged_err!(
                me;
                "invalid config.max_retries '{}'",
                config.max_retries
            );
        }
        if config.quorum_timeout_ms == 0 {
            return logged_err!(
                me;
                "invalid config.quorum_timeout_ms '{}'",
                config.quorum_timeout_ms
            );
        }

        let mut tx_learns = HashMap::new();
        for (peer, stub) in &peers {
            let (tx_learn, rx_learn) = mpsc::unbounded_channel();
            tokio::spawn(Self::learn_messenger_thread(
                me,
                *peer,
                stub.clone(),
                rx_learn,
            ));
            tx_learns.insert(*peer, tx_learn);
        }

        Ok(Proposer {
            me,
            population,
            quorum_cnt: population / 2 + 1,
            node,
            peers,
            tx_learns,
            id_gen: ProposalIdGen::new(me, population),
            next_seq: AtomicU64::new(Self::initial_seq()),
            quorum_timeout: Duration::from_millis(config.quorum_timeout_ms),
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.backoff_ms),
        })
    }

    /// First decree sequence number of this incarnation: wall-clock
    /// nanoseconds, or a random value if the clock is before the epoch.
    fn initial_seq() -> u64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => elapsed.as_nanos() as u64,
            Err(_) => rand::random::<u64>() >> 1,
        }
    }

    /// Runs consensus on a mutating command. Returns true once the command
    /// is decided and applied locally; false after `max_retries` failed
    /// rounds.
    pub async fn propose(&self, cmd: Command) -> bool {
        let decree = Decree {
            id: DecreeId {
                proposer: self.me,
                seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            },
            cmd,
        };
        pf_debug!(self.me; "proposing {}: {:?}", decree.id, decree.cmd);

        let mut failures = 0;
        while failures < self.max_retries {
            // someone else may have carried my decree through already
            if self.node.has_learned(&decree.id) {
                return true;
            }

            match self.run_round(&decree).await {
                RoundOutcome::Decided => return true,
                RoundOutcome::Substituted => continue,
                RoundOutcome::Failed => {
                    failures += 1;
                    if failures < self.max_retries {
                        self.back_off(failures).await;
                    }
                }
            }
        }

        if self.node.has_learned(&decree.id) {
            return true;
        }
        pf_warn!(self.me; "giving up on {} after {} failed rounds",
                          decree.id, failures);
        false
    }

    /// Sleeps `attempt * backoff` plus random jitter below `backoff`.
    async fn back_off(&self, attempt: u32) {
        let mut delay = self.backoff * attempt;
        let unit = self.backoff.as_millis() as u64;
        if unit > 0 {
            let jitter = rand::thread_rng().gen_range(0..unit);
            delay += Duration::from_millis(jitter);
        }
        pf_trace!(self.me; "backing off {} ms", delay.as_millis());
        time::sleep(delay).await;
    }

    /// One full prepare/accept round under a fresh proposal ID.
    async fn run_round(&self, decree: &Decree) -> RoundOutcome {
        let id = self.id_gen.next();
        pf_debug!(self.me; "round {} for {}", id, decree.id);

        // Phase 1
        let tally = self.prepare_phase(id).await;
        let promises = tally.acks.as_ref().map_or(0, |acks| acks.count());
        for (peer, acc) in tally.stale {
            // peer missed a decision I know of; resend it
            self.enqueue_learn(peer, acc.id, acc.decree);
        }
        if promises < self.quorum_cnt {
            pf_debug!(self.me; "round {} got {} promises, need {}",
                               id, promises, self.quorum_cnt);
            self.id_gen.observe(tally.max_seen);
            return RoundOutcome::Failed;
        }

        let chosen = match tally.highest {
            Some(acc) if acc.decree.id != decree.id => {
                pf_info!(self.me; "round {} substitutes {} accepted under {}",
                                  id, acc.decree.id, acc.id);
                acc.decree
            }
            _ => decree.clone(),
        };

        // Phase 2
        let (accepts, max_seen) = self.accept_phase(id, &chosen).await;
        if accepts < self.quorum_cnt {
            pf_debug!(self.me; "round {} got {} accepts, need {}",
                               id, accepts, self.quorum_cnt);
            self.id_gen.observe(max_seen);
            return RoundOutcome::Failed;
        }

        // decided: apply locally, then announce without waiting
        pf_debug!(self.me; "round {} decided {}", id, chosen.id);
        self.node.handle_learn(id, chosen.clone());
        for (peer, _) in &self.peers {
            self.enqueue_learn(*peer, id, chosen.clone());
        }

        if chosen.id == decree.id {
            RoundOutcome::Decided
        } else {
            RoundOutcome::Substituted
        }
    }

    /// Collects promises for proposal `id`.
    async fn prepare_phase(&self, id: ProposalId) -> PrepareTally {
        let mut acks = Bitmap::new(self.population, false);
        let mut tally = PrepareTally::default();
        let (node, quorum_cnt) = (&self.node, self.quorum_cnt);

        self.gather(
            self.node.handle_prepare(id),
            move |peer| async move { peer.prepare(id).await },
            |replica, resp| {
                if !resp.success {
                    tally.max_seen = tally.max_seen.max(resp.promised_id);
                    return false;
                }
                if acks.set(replica, true).is_err() {
                    return false;
                }
                if let Some(acc) = resp.accepted {
                    if node.has_learned(&acc.decree.id) {
                        // its round is closed here
                        if replica != node.id() {
                            tally.stale.push((replica, acc));
                        }
                    } else if tally
                        .highest
                        .as_ref()
                        .map_or(true, |h| acc.id > h.id)
                    {
                        tally.highest = Some(acc);
                    }
                }
                acks.count() >= quorum_cnt
            },
        )
        .await;

        tally.acks = Some(acks);
        tally
    }

    /// Collects accepts of `decree` under proposal `id`. Returns the number
    /// of acceptors that accepted and the highest promised ID reported by
    /// the rejecting ones.
    async fn accept_phase(
        &self,
        id: ProposalId,
        decree: &Decree,
    ) -> (u8, ProposalId) {
        let mut acks = Bitmap::new(self.population, false);
        let mut max_seen: ProposalId = 0;
        let quorum_cnt = self.quorum_cnt;
        let to_send = decree.clone();

        self.gather(
            self.node.handle_accept(id, decree.clone()),
            move |peer| {
                let decree = to_send.clone();
                async move { peer.accept(id, decree).await }
            },
            |replica, resp| {
                if !resp.success {
                    max_seen = max_seen.max(resp.promised_id);
                    return false;
                }
                if acks.set(replica, true).is_err() {
                    return false;
                }
                acks.count() >= quorum_cnt
            },
        )
        .await;

        (acks.count(), max_seen)
    }

    /// Counting barrier over one phase. `self_reply` is my own node's
    /// answer, fed first; then `call` is issued to every peer concurrently
    /// and each successful reply goes through `on_reply`, which returns
    /// true once enough has been gathered. Collection also ends when all
    /// peers have returned or the quorum timeout expires. Peer errors count
    /// as missing replies.
    async fn gather<R, F, Fut>(
        &self,
        self_reply: Result<R, PaxstoreError>,
        call: F,
        mut on_reply: impl FnMut(ReplicaId, R) -> bool,
    ) where
        R: Send + 'static,
        F: Fn(Arc<dyn PaxosRpc>) -> Fut,
        Fut: Future<Output = Result<R, PaxstoreError>> + Send + 'static,
    {
        match self_reply {
            Ok(reply) => {
                if on_reply(self.me, reply) {
                    return;
                }
            }
            Err(e) => pf_trace!(self.me; "self call failed: {}", e),
        }

        let (tx_reply, mut rx_reply) = mpsc::unbounded_channel();
        for (peer, stub) in &self.peers {
            let peer = *peer;
            let tx_reply = tx_reply.clone();
            let pending = call(stub.clone());
            tokio::spawn(async move {
                // receiver gone means the phase already finished
                let _ = tx_reply.send((peer, pending.await));
            });
        }
        drop(tx_reply);

        let deadline = Instant::now() + self.quorum_timeout;
        loop {
            match time::timeout_at(deadline, rx_reply.recv()).await {
                Ok(Some((peer, Ok(reply)))) => {
                    if on_reply(peer, reply) {
                        break;
                    }
                }
                Ok(Some((peer, Err(e)))) => {
                    pf_trace!(self.me; "peer {} unavailable: {}", peer, e);
                }
                Ok(None) => break, // every peer returned
                Err(_) => {
                    pf_debug!(self.me; "quorum timeout after {} ms",
                                       self.quorum_timeout.as_millis());
                    break;
                }
            }
        }
    }

    /// Queues a decision for announcement to `peer`.
    fn enqueue_learn(&self, peer: ReplicaId, id: ProposalId, decree: Decree) {
        if let Some(tx_learn) = self.tx_learns.get(&peer) {
            if tx_learn.send((id, decree)).is_err() {
                pf_error!(self.me; "learn messenger for {} has exited", peer);
            }
        }
    }

    /// Learn messenger thread function. Delivers queued decisions to one
    /// peer, one at a time; a failed delivery is dropped.
    async fn learn_messenger_thread(
        me: ReplicaId,
        peer: ReplicaId,
        stub: Arc<dyn PaxosRpc>,
        mut rx_learn: mpsc::UnboundedReceiver<(ProposalId, Decree)>,
    ) {
        pf_trace!(me; "learn_messenger thread for {} spawned", peer);

        while let Some((id, decree)) = rx_learn.recv().await {
            if let Err(e) = stub.learn(id, decree).await {
                pf_debug!(me; "learn to peer {} failed: {}", peer, e);
            }
        }

        pf_trace!(me; "learn_messenger thread for {} exited", peer);
    }
}
