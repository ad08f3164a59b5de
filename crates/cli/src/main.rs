use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use siltdb::engine::{Engine, EngineError};

#[derive(Parser)]
#[command(name = "siltdb", about = "Log-structured merge-tree key-value store")]
struct Args {
    /// Data directory.
    #[arg(default_value = "demo")]
    dir: PathBuf,

    /// Erase the data directory before startup.
    #[arg(long)]
    reset: bool,
}

const HELP: &str = "
siltdb

Available commands:
  SET <key> <val> Insert a key-value pair
  DEL <key>       Remove a key
  GET <key>       Retrieve the value for a key
  EXIT            Terminate this session
";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if args.reset && args.dir.exists() {
        std::fs::remove_dir_all(&args.dir)?;
    }

    let mut engine = Engine::open(&args.dir)?;
    println!("{HELP}");

    let stdin = io::stdin();
    let mut out = io::stdout();
    let mut line = String::new();
    loop {
        write!(out, "> ")?;
        out.flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // stdin closed
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some((&command, rest)) = fields.split_first() else {
            continue;
        };

        match command.to_ascii_lowercase().as_str() {
            "set" => match rest {
                [key, val] => {
                    engine.set(key.as_bytes(), val.as_bytes())?;
                    println!("OK.");
                }
                _ => println!("Usage: SET <key> <value>"),
            },
            "del" => match rest {
                [key] => {
                    engine.delete(key.as_bytes())?;
                    println!("OK.");
                }
                _ => println!("Usage: DEL <key>"),
            },
            "get" => match rest {
                [key] => match engine.get(key.as_bytes()) {
                    Ok(val) => println!("{}", String::from_utf8_lossy(&val)),
                    Err(EngineError::KeyNotFound) => println!("Key not found."),
                    Err(e) => return Err(e.into()),
                },
                _ => println!("Usage: GET <key>"),
            },
            "exit" => break,
            other => println!("Unknown command \"{other}\""),
        }
    }

    engine.close()?;
    Ok(())
}
