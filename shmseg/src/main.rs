//! # shmseg command-line tool
//!
//! Create, open, write, inspect and remove named shared memory segments
//! from the shell. Segments outlive the tool, so separate invocations (or
//! separate programs using the library) see each other's data.
//!
//! # Usage
//!
//! ```bash
//! # 64 zero bytes under "buf-a"
//! shmseg create buf-a 64
//!
//! # Put bytes at offset 0 and read them back
//! shmseg write buf-a 0 ff00ff
//! shmseg open buf-a --dump 4
//!
//! # Header facts as JSON, then unlink
//! shmseg inspect buf-a
//! shmseg remove buf-a
//! ```

#![deny(warnings)]

use clap::{Parser, Subcommand};
use common::config::{ConfigLoader, LogLevel};
use shmseg::{SharedMemory, ShmConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error};

/// Named cross-process shared memory segments
#[derive(Parser, Debug)]
#[command(name = "shmseg")]
#[command(version)]
#[command(about = "Create, open and remove named shared memory segments")]
#[command(long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create (or replace) a segment with a zeroed payload
    Create {
        /// Segment key
        key: String,
        /// Payload length in bytes
        length: usize,
        /// Fill the payload with this byte after creation
        #[arg(long, value_name = "BYTE")]
        fill: Option<u8>,
        /// Keep the segment mapped for this many milliseconds before exiting
        #[arg(long, value_name = "MS", default_value_t = 0)]
        hold_ms: u64,
    },
    /// Open an existing segment and print its header
    Open {
        /// Segment key
        key: String,
        /// Print the first N payload bytes as hex
        #[arg(long, value_name = "N", default_value_t = 0)]
        dump: usize,
    },
    /// Write hex-encoded bytes into a segment's payload
    Write {
        /// Segment key
        key: String,
        /// Payload offset
        offset: usize,
        /// Bytes to write, hex encoded
        hex: String,
    },
    /// Print header facts as JSON
    Inspect {
        /// Segment key
        key: String,
    },
    /// Unlink a segment; prints whether it existed
    Remove {
        /// Segment key
        key: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("shmseg failed: {}", e);
        eprintln!("error: {e}");
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ShmConfig::load(path)?,
        None => ShmConfig::default(),
    };
    config.validate()?;
    if args.verbose {
        config.logging.log_level = LogLevel::Debug;
    }
    if args.json {
        config.logging.json = true;
    }

    let shm = SharedMemory::new(&config);
    shmseg::init_tracing(&config.logging, Some(shm.diagnostics()));
    debug!(command = ?args.command, "shmseg starting");

    match args.command {
        Command::Create {
            key,
            length,
            fill,
            hold_ms,
        } => {
            let view = shm.create(&key, length)?;
            if let Some(byte) = fill {
                view.fill(byte);
            }
            println!("key={} len={} version={}", view.key(), view.len(), view.format_version());
            if hold_ms > 0 {
                std::thread::sleep(Duration::from_millis(hold_ms));
            }
        }
        Command::Open { key, dump } => {
            let view = shm.open(&key)?;
            println!("key={} len={} version={}", view.key(), view.len(), view.format_version());
            if dump > 0 {
                let mut bytes = vec![0u8; dump.min(view.len())];
                view.read_at(0, &mut bytes)?;
                println!("data={}", hex::encode(&bytes));
            }
        }
        Command::Write { key, offset, hex: data } => {
            let bytes = hex::decode(&data)?;
            let view = shm.open(&key)?;
            view.write_at(offset, &bytes)?;
            println!("wrote {} bytes at offset {offset}", bytes.len());
        }
        Command::Inspect { key } => {
            let info = shm.inspect(&key)?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Command::Remove { key } => {
            println!("{}", shm.remove(&key)?);
        }
    }
    Ok(())
}
