//! Paxstore client side executable.

use std::net::SocketAddr;
use std::process::ExitCode;

use clap::Parser;

use rand::Rng;

use tokio::runtime::Builder;
use tokio::time::Duration;

use paxstore::{
    logger_init, pf_error, pf_warn, ClientEndpoint, ClientId, PaxstoreError,
};

mod clients;

use crate::clients::{ClientMode, ClientRepl, ClientTester};

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Client-facing API addresses of the replicas
    /// (e.g., '-s host0:52700 -s host1:52701 -s host2:52702').
    #[arg(short, long)]
    servers: Vec<SocketAddr>,

    /// Client utility mode to run: repl|tester.
    #[arg(short, long)]
    utility: String,

    /// Mode-specific client parameters TOML string.
    /// Every '+' is treated as newline.
    #[arg(long, default_value_t = String::from(""))]
    params: String,

    /// Number of tokio worker threads.
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Connection and reply timeout duration in millisecs.
    #[arg(long, default_value_t = 60000)]
    timeout_ms: u64,
}

impl CliArgs {
    /// Sanitize command line arguments, return `Ok(mode)` on success or
    /// `Err(PaxstoreError)` on any error.
    fn sanitize(&self) -> Result<ClientMode, PaxstoreError> {
        if self.servers.is_empty() {
            Err(PaxstoreError::msg("no server addresses given"))
        } else if self.threads < 2 {
            Err(PaxstoreError::msg(format!(
                "invalid number of threads {}",
                self.threads
            )))
        } else if self.timeout_ms == 0 {
            Err(PaxstoreError::msg(format!(
                "invalid timeout duration {} ms",
                self.timeout_ms
            )))
        } else {
            ClientMode::parse_name(&self.utility).ok_or(PaxstoreError::msg(
                format!("utility mode '{}' unrecognized", self.utility),
            ))
        }
    }
}

/// Actual main function of paxstore client executable.
fn client_main() -> Result<(), PaxstoreError> {
    // read in and parse command line arguments
    let mut args = CliArgs::parse();
    let mode = args.sanitize()?;
    let timeout = Duration::from_millis(args.timeout_ms);
    let servers = args.servers.clone();

    // parse optional params string if given
    let params_str = if args.params.is_empty() {
        None
    } else {
        args.params = args.params.replace('+', "\n");
        Some(&args.params[..])
    };

    // leave room for the tester's concurrent clients to take following IDs
    let id: ClientId = rand::thread_rng().gen_range(0..(u64::MAX >> 16));

    // create tokio multi-threaded runtime
    let runtime = Builder::new_multi_thread()
        .enable_all()
        .worker_threads(args.threads)
        .thread_name("tokio-worker-client")
        .build()?;

    // enter tokio runtime, connect to the service, and do work
    runtime.block_on(async move {
        match mode {
            ClientMode::Repl => {
                // run interactive REPL loop
                let endpoint = ClientEndpoint::new(id, servers, timeout)?;
                let mut repl = ClientRepl::new(endpoint);
                repl.run().await?;
            }
            ClientMode::Tester => {
                // run correctness testing client
                let mut tester =
                    ClientTester::new(id, servers, timeout, params_str)?;
                tester.run().await?;
            }
        }

        Ok::<(), PaxstoreError>(()) // give type hint for this async closure
    })
}

/// Main function of paxstore client executable.
fn main() -> ExitCode {
    logger_init();

    if let Err(ref e) = client_main() {
        pf_error!("c"; "client_main exited: {}", e);
        ExitCode::FAILURE
    } else {
        pf_warn!("c"; "client_main exited successfully");
        ExitCode::SUCCESS
    }
}
