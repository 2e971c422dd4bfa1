//! AquaFlow command terminal
//!
//! Sends commands to a running `aquaflow-server` and prints the replies.

use std::io::{self, BufRead, Write};

use clap::Parser;

use aquaflow::{send_command, Command};

/// Command terminal for the AquaFlow meter.
#[derive(Debug, Parser)]
#[command(name = "aquaflow-client", version)]
struct Args {
    /// Command channel address.
    #[arg(long, default_value = "127.0.0.1:65432")]
    addr: String,

    /// Send one command and exit.
    #[arg(long)]
    command: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Some(command) = args.command {
        println!("{}", send_command(args.addr.as_str(), &command)?);
        return Ok(());
    }

    let known: Vec<&str> = Command::KNOWN.iter().filter_map(Command::wire).collect();
    println!("Command terminal (type 'exit' to quit)");
    println!("Commands: {}", known.join(", "));

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!(">> ");
        io::stdout().flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let line = line?.trim().to_lowercase();
        if line == "exit" {
            break;
        }
        if line.is_empty() {
            continue;
        }
        match send_command(args.addr.as_str(), &line) {
            Ok(response) => println!("{response}"),
            Err(e) => eprintln!("error: {e}"),
        }
    }
    Ok(())
}
