//! Paxstore server replica executable.

use std::net::{Ipv4Addr, SocketAddr};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use log::{self, LevelFilter};

use tokio::runtime::Builder;
use tokio::sync::watch;

use paxstore::{
    logger_init, pf_error, PaxosReplica, PaxstoreError, ReplicaDirectory,
    ReplicaId,
};

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// My replica ID, i.e., my index in the replicas list.
    #[arg(short, long)]
    id: ReplicaId,

    /// Peer-to-peer addresses 'host:port' of all replicas, in ID order
    /// (e.g., '-r host0:52800 -r host1:52801 -r host2:52802').
    #[arg(short, long)]
    replicas: Vec<String>,

    /// Local IP to use for binding the listening sockets.
    #[arg(short, long, default_value_t = Ipv4Addr::UNSPECIFIED)]
    bind_ip: Ipv4Addr,

    /// Client-facing API port.
    /// This port must be available at process launch.
    #[arg(short, long, default_value_t = 52700)]
    api_port: u16,

    /// Replica configuration TOML string.
    /// Every '+' is treated as newline.
    #[arg(long, default_value_t = String::from(""))]
    config: String,

    /// Number of tokio worker threads.
    #[arg(long, default_value_t = 4)]
    threads: usize,
}

impl CliArgs {
    /// Sanitize command line arguments, return `Ok(directory)` on success
    /// or `Err(PaxstoreError)` on any error.
    fn sanitize(&self) -> Result<ReplicaDirectory, PaxstoreError> {
        if self.api_port <= 1024 {
            return Err(PaxstoreError::msg(format!(
                "invalid api_port {}",
                self.api_port
            )));
        }
        if self.threads < 2 {
            return Err(PaxstoreError::msg(format!(
                "invalid number of threads {}",
                self.threads
            )));
        }
        if self.id as usize >= self.replicas.len() {
            return Err(PaxstoreError::msg(format!(
                "invalid id {} for {} replicas",
                self.id,
                self.replicas.len()
            )));
        }

        let directory = ReplicaDirectory::from_addrs(&self.replicas)?;
        for info in directory.iter() {
            if info.port() <= 1024 {
                return Err(PaxstoreError::msg(format!(
                    "invalid peer port {} of replica {}",
                    info.port(),
                    info.id()
                )));
            }
        }
        if let Some(me) = directory.get(self.id) {
            if me.port() == self.api_port {
                return Err(PaxstoreError::msg(format!(
                    "api_port == peer port {}",
                    self.api_port
                )));
            }
        }
        Ok(directory)
    }
}

/// Actual main function of paxstore server executable.
fn server_main() -> Result<(), PaxstoreError> {
    // read in and parse command line arguments
    let mut args = CliArgs::parse();
    let directory = Arc::new(args.sanitize()?);
    let me = args.id;

    // parse client-facing API address
    let api_addr: SocketAddr = format!("{}:{}", args.bind_ip, args.api_port)
        .parse()
        .map_err(|e| {
            PaxstoreError::msg(format!(
                "failed to parse api_addr: bind_ip {} port {}: {}",
                args.bind_ip, args.api_port, e
            ))
        })?;

    // parse optional config string if given
    let config_str = if args.config.is_empty() {
        None
    } else {
        args.config = args.config.replace('+', "\n");
        Some(&args.config[..])
    };

    // set up termination signals handler
    let (tx_term, rx_term) = watch::channel(false);
    ctrlc::set_handler(move || {
        if let Err(e) = tx_term.send(true) {
            pf_error!(me; "error sending to term channel: {}", e);
        }
    })?;

    let log_level = log::max_level();
    {
        // create tokio multi-threaded runtime
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .worker_threads(args.threads)
            .thread_name("tokio-worker-replica")
            .build()?;

        // enter tokio runtime, setup the replica, and serve until terminated
        runtime.block_on(async move {
            let mut replica =
                PaxosReplica::new_and_setup(me, directory, api_addr, config_str)
                    .await?;

            replica.run(rx_term).await?;

            // suppress logging before dropping the runtime to avoid spurious
            // error messages
            log::set_max_level(LevelFilter::Off);

            Ok::<(), PaxstoreError>(()) // give type hint for this async closure
        })?;
    } // drop the runtime here

    log::set_max_level(log_level);
    Ok(())
}

/// Main function of paxstore server executable.
fn main() -> ExitCode {
    logger_init();

    if let Err(ref e) = server_main() {
        pf_error!("s"; "server_main exited: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod arg_tests {
    use super::*;

    fn valid_args() -> CliArgs {
        CliArgs {
            id: 1,
            replicas: vec![
                "127.0.0.1:52800".into(),
                "127.0.0.1:52801".into(),
                "127.0.0.1:52802".into(),
            ],
            bind_ip: "127.0.0.1".parse().unwrap(),
            api_port: 52700,
            config: "".into(),
            threads: 2,
        }
    }

    #[test]
    fn sanitize_valid() -> Result<(), PaxstoreError> {
        let directory = valid_args().sanitize()?;
        assert_eq!(directory.population(), 3);
        assert_eq!(directory.quorum_cnt(), 2);
        Ok(())
    }

    #[test]
    fn sanitize_invalid_api_port() {
        let args = CliArgs {
            api_port: 1023,
            ..valid_args()
        };
        assert!(args.sanitize().is_err());
    }

    #[test]
    fn sanitize_invalid_peer_port() {
        let args = CliArgs {
            replicas: vec!["127.0.0.1:1000".into(), "127.0.0.1:52801".into()],
            ..valid_args()
        };
        assert!(args.sanitize().is_err());
    }

    #[test]
    fn sanitize_api_port_collides() {
        let args = CliArgs {
            api_port: 52801,
            ..valid_args()
        };
        assert!(args.sanitize().is_err());
    }

    #[test]
    fn sanitize_invalid_id() {
        let args = CliArgs {
            id: 3,
            ..valid_args()
        };
        assert!(args.sanitize().is_err());
    }

    #[test]
    fn sanitize_duplicate_replica() {
        let args = CliArgs {
            replicas: vec![
                "127.0.0.1:52800".into(),
                "127.0.0.1:52801".into(),
                "127.0.0.1:52800".into(),
            ],
            ..valid_args()
        };
        assert!(args.sanitize().is_err());
    }

    #[test]
    fn sanitize_invalid_threads() {
        let args = CliArgs {
            threads: 1,
            ..valid_args()
        };
        assert!(args.sanitize().is_err());
    }
}
