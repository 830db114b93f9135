//! Correctness testing client running a fixed workload against the service.

use std::net::SocketAddr;
use std::time::Instant;

use futures::future::join_all;

use log::{self, LevelFilter};

use serde::Deserialize;

use tokio::time::Duration;

use paxstore::{
    logged_err, parsed_config, pf_debug, pf_warn, ClientEndpoint, ClientId,
    PaxstoreError,
};

/// List of all tests, in the order they run.
const ALL_TESTS: [&str; 2] = ["workload", "concurrent"];

/// Mode parameters struct.
#[derive(Debug, PartialEq, Eq, Deserialize)]
pub struct ModeParamsTester {
    /// Name of individual test to run, or 'all' to run all tests.
    pub test_name: String,

    /// Whether to continue next test upon failed test.
    pub keep_going: bool,

    /// Do not suppress logger output.
    pub logger_on: bool,

    /// Number of clients in the concurrent test.
    pub num_clients: usize,

    /// Number of put/get/delete iterations per concurrent client.
    pub ops_per_client: usize,
}

impl Default for ModeParamsTester {
    fn default() -> Self {
        ModeParamsTester {
            test_name: "all".into(),
            keep_going: false,
            logger_on: false,
            num_clients: 10,
            ops_per_client: 20,
        }
    }
}

/// Counts of succeeded and failed operations.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
struct Tally {
    success: usize,
    failure: usize,
}

impl Tally {
    fn record(&mut self, ok: bool) {
        if ok {
            self.success += 1;
        } else {
            self.failure += 1;
        }
    }

    fn merge(&mut self, other: Tally) {
        self.success += other.success;
        self.failure += other.failure;
    }

    fn total(&self) -> usize {
        self.success + self.failure
    }
}

/// Correctness testing client struct.
pub struct ClientTester {
    /// Client ID. Concurrent clients take the IDs following it.
    id: ClientId,

    /// API addresses of all servers.
    servers: Vec<SocketAddr>,

    /// Connection and reply timeout.
    timeout: Duration,

    /// Endpoint of the sequential workload.
    endpoint: ClientEndpoint,

    /// Mode parameters struct.
    params: ModeParamsTester,
}

impl ClientTester {
    /// Creates a new testing client.
    pub fn new(
        id: ClientId,
        servers: Vec<SocketAddr>,
        timeout: Duration,
        params_str: Option<&str>,
    ) -> Result<Self, PaxstoreError> {
        let params = parsed_config!(params_str => ModeParamsTester;
                                    test_name, keep_going, logger_on,
                                    num_clients, ops_per_client)?;
        if params.num_clients == 0 {
            return logged_err!(id; "invalid params.num_clients 0");
        }

        // suppress all logger levels if not logger_on
        if !params.logger_on {
            log::set_max_level(LevelFilter::Error);
        }

        Ok(ClientTester {
            id,
            endpoint: ClientEndpoint::new(id, servers.clone(), timeout)?,
            servers,
            timeout,
            params,
        })
    }

    /// Issues a Put and records whether it succeeded.
    async fn check_put(
        endpoint: &mut ClientEndpoint,
        tally: &mut Tally,
        key: &str,
        value: &str,
    ) {
        let result = endpoint.put(key, value).await;
        if let Err(ref e) = result {
            pf_warn!(endpoint.id(); "PUT {}={} failed: {}", key, value, e);
        }
        tally.record(result.is_ok());
    }

    /// Issues a Get and records whether it returned the expected value.
    async fn check_get(
        endpoint: &mut ClientEndpoint,
        tally: &mut Tally,
        key: &str,
        expect: Option<&str>,
    ) {
        match endpoint.get(key).await {
            Ok(value) if value.as_deref() == expect => tally.record(true),
            Ok(value) => {
                pf_warn!(endpoint.id(); "GET {} mismatch: expect {:?}, got {:?}",
                                        key, expect, value);
                tally.record(false);
            }
            Err(e) => {
                pf_warn!(endpoint.id(); "GET {} failed: {}", key, e);
                tally.record(false);
            }
        }
    }

    /// Issues a Delete and records whether it succeeded.
    async fn check_delete(
        endpoint: &mut ClientEndpoint,
        tally: &mut Tally,
        key: &str,
    ) {
        let result = endpoint.delete(key).await;
        if let Err(ref e) = result {
            pf_warn!(endpoint.id(); "DELETE {} failed: {}", key, e);
        }
        tally.record(result.is_ok());
    }

    /// Populate, read, update, delete, then verify, all through one
    /// endpoint.
    async fn test_workload(&mut self) -> Result<Tally, PaxstoreError> {
        let mut tally = Tally::default();
        let ep = &mut self.endpoint;
        ep.connect().await?;

        // populate
        for i in 1..=10 {
            let (key, value) = (format!("key{}", i), format!("value{}", i));
            Self::check_put(ep, &mut tally, &key, &value).await;
        }
        // read
        for i in 1..=5 {
            let (key, value) = (format!("key{}", i), format!("value{}", i));
            Self::check_get(ep, &mut tally, &key, Some(&value)).await;
        }
        // update
        for i in 6..=10 {
            let key = format!("key{}", i);
            let value = format!("updated_value{}", i);
            Self::check_put(ep, &mut tally, &key, &value).await;
        }
        // delete
        for i in 1..=5 {
            Self::check_delete(ep, &mut tally, &format!("key{}", i)).await;
        }
        // verify
        for i in 1..=5 {
            Self::check_get(ep, &mut tally, &format!("key{}", i), None).await;
        }
        for i in 6..=10 {
            let key = format!("key{}", i);
            let value = format!("updated_value{}", i);
            Self::check_get(ep, &mut tally, &key, Some(&value)).await;
        }

        ep.leave().await?;
        Ok(tally)
    }

    /// One concurrent client running put/get/delete over its own keys.
    async fn concurrent_client(
        id: ClientId,
        servers: Vec<SocketAddr>,
        timeout: Duration,
        num_ops: usize,
    ) -> Tally {
        let mut tally = Tally::default();
        let mut endpoint = match ClientEndpoint::new(id, servers, timeout) {
            Ok(endpoint) => endpoint,
            Err(_) => {
                tally.failure += num_ops * 3;
                return tally;
            }
        };
        if endpoint.connect().await.is_err() {
            tally.failure += num_ops * 3;
            return tally;
        }

        for j in 0..num_ops {
            let key = format!("client{}-key{}", id, j);
            let value = format!("client{}-value{}", id, j);
            Self::check_put(&mut endpoint, &mut tally, &key, &value).await;
            Self::check_get(&mut endpoint, &mut tally, &key, Some(&value))
                .await;
            Self::check_delete(&mut endpoint, &mut tally, &key).await;
        }

        if let Err(e) = endpoint.leave().await {
            pf_debug!(id; "error leaving: {}", e);
        }
        tally
    }

    /// Several clients on disjoint keys at the same time.
    async fn test_concurrent(&mut self) -> Result<Tally, PaxstoreError> {
        let start = Instant::now();
        let clients = (0..self.params.num_clients).map(|i| {
            Self::concurrent_client(
                self.id + 1 + i as ClientId,
                self.servers.clone(),
                self.timeout,
                self.params.ops_per_client,
            )
        });

        let mut tally = Tally::default();
        for client_tally in join_all(clients).await {
            tally.merge(client_tally);
        }

        let secs = start.elapsed().as_secs_f64();
        println!(
            "{:>16} | {} clients, {:.2} s, {:.2} ops/s",
            "",
            self.params.num_clients,
            secs,
            tally.total() as f64 / secs.max(f64::EPSILON)
        );
        Ok(tally)
    }

    /// Runs the individual correctness test.
    async fn do_test_by_name(
        &mut self,
        name: &str,
    ) -> Result<Tally, PaxstoreError> {
        let result = match name {
            "workload" => self.test_workload().await,
            "concurrent" => self.test_concurrent().await,
            _ => {
                return logged_err!(self.id; "unrecognized test name '{}'", name)
            }
        };

        match result {
            Ok(tally) if tally.failure == 0 => {
                println!(
                    "{:>16} | {:^6} | {} succeeded",
                    name, "PASS", tally.success
                );
                Ok(tally)
            }
            Ok(tally) => {
                println!(
                    "{:>16} | {:^6} | {} succeeded, {} failed",
                    name, "FAIL", tally.success, tally.failure
                );
                Ok(tally)
            }
            Err(e) => {
                println!("{:>16} | {:^6} | {}", name, "FAIL", e);
                Err(e)
            }
        }
    }

    /// Runs the specified correctness test(s) and prints the overall tally.
    pub async fn run(&mut self) -> Result<(), PaxstoreError> {
        let names: Vec<String> = match &self.params.test_name[..] {
            "all" => ALL_TESTS.iter().map(|n| n.to_string()).collect(),
            name => vec![name.into()],
        };

        let mut total = Tally::default();
        let mut failed_test = None;
        for name in names {
            match self.do_test_by_name(&name).await {
                Ok(tally) => {
                    total.merge(tally);
                    if tally.failure > 0 && failed_test.is_none() {
                        failed_test = Some(name);
                    }
                }
                Err(_) => {
                    if failed_test.is_none() {
                        failed_test = Some(name);
                    }
                }
            }
            if failed_test.is_some() && !self.params.keep_going {
                break;
            }
        }

        println!(
            "{:>16} | {} succeeded, {} failed",
            "TOTAL", total.success, total.failure
        );
        match failed_test {
            Some(name) => Err(PaxstoreError(format!("test '{}' failed", name))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tester_tests {
    use super::*;

    #[test]
    fn params_default() -> Result<(), PaxstoreError> {
        let params = parsed_config!(None => ModeParamsTester;
                                    test_name, keep_going, logger_on,
                                    num_clients, ops_per_client)?;
        assert_eq!(params, ModeParamsTester::default());
        Ok(())
    }

    #[test]
    fn params_override() -> Result<(), PaxstoreError> {
        let params_str = "test_name = 'concurrent'\nnum_clients = 3";
        let params = parsed_config!(Some(params_str) => ModeParamsTester;
                                    test_name, keep_going, logger_on,
                                    num_clients, ops_per_client)?;
        assert_eq!(params.test_name, "concurrent");
        assert_eq!(params.num_clients, 3);
        assert_eq!(params.ops_per_client, 20);
        Ok(())
    }

    #[test]
    fn params_invalid() {
        let servers = vec!["127.0.0.1:53990".parse().unwrap()];
        let timeout = Duration::from_millis(100);
        assert!(ClientTester::new(
            0,
            servers.clone(),
            timeout,
            Some("num_clients = 0")
        )
        .is_err());
        assert!(ClientTester::new(0, servers, timeout, Some("bogus = 1"))
            .is_err());
    }

    #[test]
    fn tally_counts() {
        let mut tally = Tally::default();
        tally.record(true);
        tally.record(false);
        tally.record(true);
        let mut total = Tally::default();
        total.merge(tally);
        total.merge(tally);
        assert_eq!(
            total,
            Tally {
                success: 4,
                failure: 2
            }
        );
        assert_eq!(total.total(), 6);
    }
}
