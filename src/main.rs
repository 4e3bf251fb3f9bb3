//! Command-line front end for `dbdb`. This, the "create on first use"
//! behaviour baked into `Database::open`, and the dictionary-style
//! convenience wrapper methods on `Database` are the external
//! collaborators SPEC_FULL.md §1 keeps out of the core engine.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use dbdb::Database;

#[derive(Parser)]
#[command(name = "dbdb", about = "Embedded copy-on-write key/value store")]
struct Cli {
    /// Path to the database file (created if it does not exist)
    path: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the value stored under KEY
    Get { key: String },
    /// Store VALUE under KEY and commit
    Set { key: String, value: String },
    /// Remove KEY and commit
    Delete { key: String },
    /// List all keys in sorted order
    Keys,
    /// Print the number of keys
    Len,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> dbdb::Result<()> {
    let mut db = Database::open(&cli.path)?;
    match cli.command {
        Command::Get { key } => {
            let value = db.get_string(&key)?;
            println!("{value}");
        }
        Command::Set { key, value } => {
            db.set_str(&key, &value)?;
            db.commit()?;
        }
        Command::Delete { key } => {
            db.delete(&key)?;
            db.commit()?;
        }
        Command::Keys => {
            for key in db.keys()? {
                println!("{key}");
            }
        }
        Command::Len => {
            println!("{}", db.len()?);
        }
    }
    Ok(())
}
