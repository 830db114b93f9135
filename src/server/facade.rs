//! Consensus-backed key-value store facade: what client-facing handlers
//! call.

use std::sync::Arc;

use crate::server::{Command, CommandResult, PaxosNode, Proposer, ReplicaId};
use crate::utils::PaxstoreError;

/// Key-value operations of one replica. Reads are served from the local
/// state machine; writes go through Paxos first.
pub struct KvStore {
    /// My replica ID.
    me: ReplicaId,

    /// The local node holding the state machine.
    node: Arc<PaxosNode>,

    /// Proposer running consensus for writes.
    proposer: Arc<Proposer>,
}

impl KvStore {
    pub fn new(node: Arc<PaxosNode>, proposer: Arc<Proposer>) -> Self {
        KvStore {
            me: node.id(),
            node,
            proposer,
        }
    }

    /// Reads the local value of `key`. May be stale if this replica has not
    /// yet learned the latest decisions.
    pub fn get(&self, key: &str) -> Option<String> {
        self.node.read(key)
    }

    /// Replicates `key = value`.
    pub async fn put(&self, key: &str, value: &str) -> Result<(), PaxstoreError> {
        self.replicate(Command::Put {
            key: key.into(),
            value: value.into(),
        })
        .await
    }

    /// Replicates removal of `key`. Succeeds whether or not the key exists.
    pub async fn delete(&self, key: &str) -> Result<(), PaxstoreError> {
        self.replicate(Command::Delete { key: key.into() }).await
    }

    /// Executes a client command: reads locally, writes through consensus.
    pub async fn execute(
        &self,
        cmd: Command,
    ) -> Result<CommandResult, PaxstoreError> {
        match cmd {
            Command::Get { key } => Ok(CommandResult::Get {
                value: self.get(&key),
            }),
            Command::Put { .. } => {
                self.replicate(cmd).await?;
                Ok(CommandResult::Put)
            }
            Command::Delete { .. } => {
                self.replicate(cmd).await?;
                Ok(CommandResult::Delete)
            }
        }
    }

    async fn replicate(&self, cmd: Command) -> Result<(), PaxstoreError> {
        if cmd.key().is_empty() {
            return Err(PaxstoreError::msg("empty key"));
        }

        pf_debug!(self.me; "initiating consensus for {:?}", cmd);
        if self.proposer.propose(cmd).await {
            Ok(())
        } else {
            logged_err!(self.me; "failed to reach consensus")
        }
    }
}

#[cfg(test)]
mod facade_tests {
    use super::*;
    use crate::server::{FaultSwitch, PaxosRpc, ReplicaConfig};
    use tokio::time::{self, Duration};

    fn three_stores() -> (Vec<KvStore>, Vec<FaultSwitch>) {
        let config = ReplicaConfig {
            quorum_timeout_ms: 500,
            max_retries: 2,
            backoff_ms: 1,
            inject_faults: false,
            ..Default::default()
        };
        let switches: Vec<FaultSwitch> =
            (0..3).map(|_| FaultSwitch::new()).collect();
        let nodes: Vec<Arc<PaxosNode>> = switches
            .iter()
            .enumerate()
            .map(|(r, s)| Arc::new(PaxosNode::new(r as u8, Arc::new(s.clone()))))
            .collect();
        let stores = nodes
            .iter()
            .map(|node| {
                let peers = nodes
                    .iter()
                    .filter(|n| n.id() != node.id())
                    .map(|n| (n.id(), n.clone() as Arc<dyn PaxosRpc>))
                    .collect();
                let proposer =
                    Proposer::new(node.clone(), peers, &config).unwrap();
                KvStore::new(node.clone(), Arc::new(proposer))
            })
            .collect();
        (stores, switches)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn put_get_delete() -> Result<(), PaxstoreError> {
        let (stores, _) = three_stores();
        assert_eq!(stores[0].get("Jose"), None);
        stores[0].put("Jose", "180").await?;
        assert_eq!(stores[0].get("Jose"), Some("180".into()));
        stores[1].delete("Jose").await?;
        assert_eq!(stores[1].get("Jose"), None);
        // absent key
        stores[2].delete("nobody").await?;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reads_other_replicas() -> Result<(), PaxstoreError> {
        let (stores, _) = three_stores();
        stores[2].put("k", "v").await?;
        let mut seen = false;
        for _ in 0..200 {
            if stores.iter().all(|s| s.get("k").as_deref() == Some("v")) {
                seen = true;
                break;
            }
            time::sleep(Duration::from_millis(5)).await;
        }
        assert!(seen);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn empty_key_rejected() {
        let (stores, _) = three_stores();
        assert!(stores[0].put("", "v").await.is_err());
        assert!(stores[0].delete("").await.is_err());
        assert!(stores[0]
            .execute(Command::Put {
                key: "".into(),
                value: "v".into()
            })
            .await
            .is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn no_quorum_errors() -> Result<(), PaxstoreError> {
        let (stores, switches) = three_stores();
        switches[1].disable();
        switches[2].disable();
        assert_eq!(
            stores[0].put("k", "v").await,
            Err(PaxstoreError::msg("failed to reach consensus"))
        );
        assert_eq!(
            stores[0].execute(Command::Get { key: "k".into() }).await?,
            CommandResult::Get { value: None }
        );
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn execute_dispatch() -> Result<(), PaxstoreError> {
        let (stores, _) = three_stores();
        assert_eq!(
            stores[1]
                .execute(Command::Put {
                    key: "a".into(),
                    value: "1".into()
                })
                .await?,
            CommandResult::Put
        );
        assert_eq!(
            stores[1].execute(Command::Get { key: "a".into() }).await?,
            CommandResult::Get {
                value: Some("1".into())
            }
        );
        assert_eq!(
            stores[1].execute(Command::Delete { key: "a".into() }).await?,
            CommandResult::Delete
        );
        Ok(())
    }
}
