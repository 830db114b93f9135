//! Replica process wiring: builds every module of one replica and runs it
//! until termination.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::server::{
    ExternalApi, FaultInjector, FaultSchedule, FaultSwitch, KvStore,
    PaxosNode, PaxosRpc, PeerServer, PeerStub, Proposer, ReplicaDirectory,
    ReplicaId,
};
use crate::utils::PaxstoreError;

use serde::Deserialize;

use tokio::sync::watch;
use tokio::time::Duration;

/// Configuration parameters struct.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReplicaConfig {
    /// Wall-clock bound on each prepare/accept collection in millisecs.
    pub quorum_timeout_ms: u64,

    /// Failed rounds allowed per proposal.
    pub max_retries: u32,

    /// Linear backoff unit between failed rounds in millisecs.
    pub backoff_ms: u64,

    /// Run the background fault injector?
    pub inject_faults: bool,

    /// Min duration of an acceptor active phase in millisecs.
    pub fault_active_min_ms: u64,
    /// Max duration of an acceptor active phase in millisecs.
    pub fault_active_max_ms: u64,

    /// Duration of an acceptor inactive phase in millisecs.
    pub fault_inactive_ms: u64,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        ReplicaConfig {
            quorum_timeout_ms: 5000,
            max_retries: 3,
            backoff_ms: 100,
            inject_faults: true,
            fault_active_min_ms: 5000,
            fault_active_max_ms: 15000,
            fault_inactive_ms: 3000,
        }
    }
}

impl ReplicaConfig {
    /// Composes a config from defaults overwritten by the TOML string
    /// `config_str`, then validates it.
    pub fn from_toml(config_str: Option<&str>) -> Result<Self, PaxstoreError> {
        let config = parsed_config!(config_str => ReplicaConfig;
                                    quorum_timeout_ms, max_retries,
                                    backoff_ms, inject_faults,
                                    fault_active_min_ms, fault_active_max_ms,
                                    fault_inactive_ms)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), PaxstoreError> {
        if self.quorum_timeout_ms == 0 {
            return Err(PaxstoreError(format!(
                "invalid config.quorum_timeout_ms '{}'",
                self.quorum_timeout_ms
            )));
        }
        if self.max_retries == 0 {
            return Err(PaxstoreError(format!(
                "invalid config.max_retries '{}'",
                self.max_retries
            )));
        }
        if self.inject_faults {
            self.fault_schedule()?;
        }
        Ok(())
    }

    /// Fault injector timing described by this config.
    pub fn fault_schedule(&self) -> Result<FaultSchedule, PaxstoreError> {
        FaultSchedule::new(
            Duration::from_millis(self.fault_active_min_ms),
            Duration::from_millis(self.fault_active_max_ms),
            Duration::from_millis(self.fault_inactive_ms),
        )
    }
}

/// One replica of the key-value service.
pub struct PaxosReplica {
    /// My replica ID.
    me: ReplicaId,

    /// Configuration parameters struct.
    config: ReplicaConfig,

    /// The local consensus participant.
    node: Arc<PaxosNode>,

    /// Store facade shared with the external API.
    store: Arc<KvStore>,

    /// Switch of my acceptor role.
    fault_switch: FaultSwitch,

    /// PeerServer module.
    peer_server: PeerServer,

    /// ExternalApi module.
    external_api: ExternalApi,

    /// FaultInjector module, if enabled.
    fault_injector: Option<FaultInjector>,
}

impl PaxosReplica {
    /// Creates replica `me` of the cluster described by `directory` and
    /// starts serving: peers on my directory port, clients on `api_addr`.
    /// The peer listener binds the same IP as `api_addr`.
    pub async fn new_and_setup(
        me: ReplicaId,
        directory: Arc<ReplicaDirectory>,
        api_addr: SocketAddr,
        config_str: Option<&str>,
    ) -> Result<Self, PaxstoreError> {
        let config = ReplicaConfig::from_toml(config_str)?;
        let my_info = match directory.get(me) {
            Some(info) => info.clone(),
            None => {
                return logged_err!(
                    me;
                    "replica ID {} not in directory of {}",
                    me,
                    directory.population()
                )
            }
        };
        let peer_addr = SocketAddr::new(api_addr.ip(), my_info.port());
        if peer_addr == api_addr {
            return logged_err!(me; "api_addr collides with peer address");
        }

        let fault_switch = FaultSwitch::new();
        let node = Arc::new(PaxosNode::new(me, Arc::new(fault_switch.clone())));

        let call_timeout = Duration::from_millis(config.quorum_timeout_ms);
        let peers: Vec<(ReplicaId, Arc<dyn PaxosRpc>)> = directory
            .peers_of(me)
            .map(|info| {
                let stub = PeerStub::new(me, info.clone(), call_timeout);
                (info.id(), Arc::new(stub) as Arc<dyn PaxosRpc>)
            })
            .collect();
        let proposer = Arc::new(Proposer::new(node.clone(), peers, &config)?);
        let store = Arc::new(KvStore::new(node.clone(), proposer));

        let mut peer_server = PeerServer::new(me);
        peer_server.setup(peer_addr, node.clone()).await?;

        let mut external_api = ExternalApi::new(me);
        external_api.setup(api_addr, store.clone()).await?;

        let fault_injector = if config.inject_faults {
            let mut injector = FaultInjector::new(
                me,
                fault_switch.clone(),
                config.fault_schedule()?,
            );
            injector.setup()?;
            Some(injector)
        } else {
            None
        };

        pf_info!(me; "replica {} of {} up, config {:?}",
                     my_info, directory.population(), config);
        Ok(PaxosReplica {
            me,
            config,
            node,
            store,
            fault_switch,
            peer_server,
            external_api,
            fault_injector,
        })
    }

    pub fn id(&self) -> ReplicaId {
        self.me
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    pub fn node(&self) -> &Arc<PaxosNode> {
        &self.node
    }

    pub fn store(&self) -> &Arc<KvStore> {
        &self.store
    }

    /// Switch of my acceptor role, for crashing it on purpose.
    pub fn fault_switch(&self) -> &FaultSwitch {
        &self.fault_switch
    }

    /// Serves until a termination signal arrives on `rx_term`, then stops
    /// all background modules.
    pub async fn run(
        &mut self,
        mut rx_term: watch::Receiver<bool>,
    ) -> Result<(), PaxstoreError> {
        while !*rx_term.borrow() {
            if rx_term.changed().await.is_err() {
                break; // sender gone, treat as termination
            }
        }
        pf_warn!(self.me; "server caught termination signal");
        self.stop().await
    }

    /// Stops all background modules.
    pub async fn stop(&mut self) -> Result<(), PaxstoreError> {
        if let Some(mut injector) = self.fault_injector.take() {
            injector.stop().await?;
        }
        self.external_api.stop().await?;
        self.peer_server.stop().await?;
        pf_info!(self.me; "replica stopped");
        Ok(())
    }
}
