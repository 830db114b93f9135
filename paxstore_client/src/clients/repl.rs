//! Interactive REPL-style command-line interface client.

use std::io::{self, Write};
use std::str::SplitWhitespace;
use std::time::Instant;

use color_print::{cprint, cprintln};

use paxstore::{ClientEndpoint, Command, CommandResult, PaxstoreError};

/// Prompt string at the start of line.
const PROMPT: &str = ">>>>> ";

/// Recognizable command types.
enum ReplCommand {
    /// Normal replicated KV store command.
    Normal(Command),

    /// Reconnect to a (possibly different) server.
    Reconnect,

    /// Print help message.
    PrintHelp,

    /// Client exit.
    Exit,

    /// Nothing read.
    Nothing,
}

/// Interactive REPL-style client struct.
pub struct ClientRepl {
    /// Endpoint to the replicated store.
    endpoint: ClientEndpoint,

    /// User input buffer.
    input_buf: String,
}

impl ClientRepl {
    /// Creates a new REPL-style client.
    pub fn new(endpoint: ClientEndpoint) -> Self {
        ClientRepl {
            endpoint,
            input_buf: String::new(),
        }
    }

    /// Prints the prompt string.
    #[inline]
    fn print_prompt() -> Result<(), PaxstoreError> {
        cprint!("<bright-yellow>{}</>", PROMPT);
        io::stdout().flush()?;
        Ok(())
    }

    /// Prints (optionally) an error message and the help message.
    fn print_help(err: Option<&PaxstoreError>) {
        if let Some(e) = err {
            cprintln!("<bright-red>✗</> {}", e);
        }
        println!("HELP: Supported normal commands are:");
        println!("          get <key>");
        println!("          put <key> <value>");
        println!("          delete <key>");
        println!("          reconnect");
        println!("          help");
        println!("          exit");
        println!(
            "      Keys and values currently cannot contain any whitespaces"
        );
    }

    /// Expect to get the next segment string from parsed segs.
    #[inline]
    fn expect_next_seg<'s>(
        segs: &mut SplitWhitespace<'s>,
    ) -> Result<&'s str, PaxstoreError> {
        if let Some(seg) = segs.next() {
            Ok(seg)
        } else {
            let err = PaxstoreError::msg("not enough args");
            Self::print_help(Some(&err));
            Err(err)
        }
    }

    /// Parses one input line into a command.
    fn parse_command(line: &str) -> Result<ReplCommand, PaxstoreError> {
        // split input line by whitespaces, getting an iterator of segments
        let mut segs = line.split_whitespace();

        // get command type, match case-insensitively
        let cmd_type = match segs.next() {
            Some(seg) => seg,
            None => return Ok(ReplCommand::Nothing),
        };

        match &cmd_type.to_lowercase()[..] {
            "get" => {
                // keys are kept as-is, no case conversions
                let key = Self::expect_next_seg(&mut segs)?;
                Ok(ReplCommand::Normal(Command::Get { key: key.into() }))
            }

            "put" => {
                // keys and values are kept as-is, no case conversions
                let key = Self::expect_next_seg(&mut segs)?;
                let value = Self::expect_next_seg(&mut segs)?;
                Ok(ReplCommand::Normal(Command::Put {
                    key: key.into(),
                    value: value.into(),
                }))
            }

            "delete" => {
                let key = Self::expect_next_seg(&mut segs)?;
                Ok(ReplCommand::Normal(Command::Delete { key: key.into() }))
            }

            "reconnect" => Ok(ReplCommand::Reconnect),

            "help" => Ok(ReplCommand::PrintHelp),

            "exit" => Ok(ReplCommand::Exit),

            _ => {
                let err = PaxstoreError(format!(
                    "unrecognized command: {}",
                    cmd_type
                ));
                Self::print_help(Some(&err));
                Err(err)
            }
        }
    }

    /// Reads in user input and parses into a command.
    fn read_command(&mut self) -> Result<ReplCommand, PaxstoreError> {
        self.input_buf.clear();
        let nread = io::stdin().read_line(&mut self.input_buf)?;
        if nread == 0 {
            return Ok(ReplCommand::Exit);
        }
        Self::parse_command(self.input_buf.trim())
    }

    /// Prints command execution result.
    fn print_result(
        result: Result<CommandResult, PaxstoreError>,
        start: Instant,
    ) {
        let lat_ms = start.elapsed().as_secs_f64() * 1000.0;
        match result {
            Ok(CommandResult::Get { value: Some(value) }) => {
                cprintln!(
                    "<bright-green>✓</> {} <<took {:.2} ms>>",
                    value,
                    lat_ms
                );
            }
            Ok(CommandResult::Get { value: None }) => {
                cprintln!(
                    "<bright-green>✓</> key not found <<took {:.2} ms>>",
                    lat_ms
                );
            }
            Ok(result) => {
                cprintln!(
                    "<bright-green>✓</> {:?} <<took {:.2} ms>>",
                    result,
                    lat_ms
                );
            }
            Err(e) => {
                cprintln!("<bright-red>✗</> {} <<took {:.2} ms>>", e, lat_ms);
            }
        }
    }

    /// One iteration of the REPL loop.
    async fn iter(&mut self) -> Result<bool, PaxstoreError> {
        Self::print_prompt()?;

        let cmd = self.read_command()?;
        match cmd {
            ReplCommand::Exit => {
                println!("Exiting...");
                Ok(false)
            }

            ReplCommand::Nothing => Ok(true),

            ReplCommand::Reconnect => {
                println!("Reconnecting...");
                self.endpoint.leave().await?;
                let server = self.endpoint.connect().await?;
                cprintln!("<bright-blue>#</> connected to server {}", server);
                Ok(true)
            }

            ReplCommand::PrintHelp => {
                Self::print_help(None);
                Ok(true)
            }

            ReplCommand::Normal(cmd) => {
                let start = Instant::now();
                let result = self.endpoint.request(cmd).await;
                Self::print_result(result, start);
                Ok(true)
            }
        }
    }

    /// Runs the infinite REPL loop.
    pub async fn run(&mut self) -> Result<(), PaxstoreError> {
        let server = self.endpoint.connect().await?;
        cprintln!("<bright-blue>#</> connected to server {}", server);

        loop {
            if let Ok(false) = self.iter().await {
                self.endpoint.leave().await?;
                break;
            }
        }

        Ok(())
    }
}
