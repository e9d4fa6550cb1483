//! nvwal CLI
//!
//! Command-line interface for inspecting and driving an nvwal region.
//! Every invocation opens the region, runs one command and shuts down.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use nvwal::{Config, Engine, Op, PersistMode};
use tracing_subscriber::{fmt, EnvFilter};

/// nvwal CLI
#[derive(Parser, Debug)]
#[command(name = "nvwal-cli")]
#[command(about = "Persistent-memory WAL storage engine")]
#[command(version)]
struct Args {
    /// Region file or DAX device
    #[arg(short, long, default_value = "./nvwal.img")]
    region: PathBuf,

    /// Region size in MB (used when creating the region)
    #[arg(short, long, default_value = "64")]
    size_mb: u64,

    /// Table directory capacity (used when formatting)
    #[arg(short, long, default_value = "64")]
    max_tables: u32,

    /// How flushes reach the persistence domain
    #[arg(short, long, value_enum, default_value = "msync")]
    persist: PersistArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PersistArg {
    /// Cache-line flush + msync (regular files)
    Msync,
    /// Cache-line flush only (DAX persistent memory)
    CacheLine,
}

impl From<PersistArg> for PersistMode {
    fn from(arg: PersistArg) -> Self {
        match arg {
            PersistArg::Msync => PersistMode::Msync,
            PersistArg::CacheLine => PersistMode::CacheLine,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create (or recover) the region and report what was found
    Init,

    /// Create an empty table
    CreateTable {
        /// Table id
        table: i32,
    },

    /// Log an insert of a row
    Put {
        /// Table id
        table: i32,

        /// Row key
        key: i64,

        /// Row payload
        payload: String,
    },

    /// Log a delete of a row
    Delete {
        /// Table id
        table: i32,

        /// Row key
        key: i64,
    },

    /// Commit everything appended to a table so far
    Commit {
        /// Table id
        table: i32,
    },

    /// Print a table's log (every table when omitted)
    Scan {
        /// Table id
        table: Option<i32>,
    },

    /// Print allocator and registry statistics
    Stats,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,nvwal=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("nvwal v{}", nvwal::VERSION);
    tracing::info!("Region: {}", args.region.display());

    let region_size = match Config::mib_to_bytes(args.size_mb) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    let config = Config::builder()
        .region_path(&args.region)
        .region_size(region_size)
        .max_tables(args.max_tables)
        .persist_mode(args.persist.into())
        .build();

    let engine = match Engine::open(config) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            std::process::exit(1);
        }
    };

    let outcome = run(&engine, args.command);
    let closed = engine.shutdown();

    if let Err(e) = outcome.and(closed) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(engine: &Engine, command: Commands) -> nvwal::Result<()> {
    match command {
        Commands::Init => {
            let report = engine.recovery_report()?;
            println!(
                "{} region: {} tables, {} bytes free",
                if report.formatted { "formatted" } else { "recovered" },
                report.tables.len(),
                engine.free_bytes()?
            );
            if report.replayed_free_list_update {
                println!("replayed an interrupted free-list update");
            }
            for table in &report.tables {
                println!(
                    "  table {}: {} entries, {} committed{}",
                    table.table_id,
                    table.entries,
                    table.committed,
                    if table.tail_rolled_forward { " (tail rolled forward)" } else { "" }
                );
            }
        }
        Commands::CreateTable { table } => {
            engine.create_table(table)?;
            println!("OK");
        }
        Commands::Put { table, key, payload } => {
            let offset = engine.put_row(table, key, payload.as_bytes())?;
            println!("OK (payload at offset {})", offset);
        }
        Commands::Delete { table, key } => {
            engine.delete_row(table, key)?;
            println!("OK");
        }
        Commands::Commit { table } => {
            engine.advance_commit(table)?;
            println!("OK");
        }
        Commands::Scan { table } => {
            let tables = match table {
                Some(id) => vec![id],
                None => engine.table_ids()?,
            };
            for id in tables {
                println!("table {}:", id);
                for row in engine.scan(id)? {
                    let row = row?;
                    let marker = if row.committed { "C" } else { " " };
                    match row.op {
                        Op::Insert => println!(
                            "  [{}] INSERT {} = {}",
                            marker,
                            row.key,
                            String::from_utf8_lossy(&row.payload)
                        ),
                        Op::Delete => println!("  [{}] DELETE {}", marker, row.key),
                    }
                }
            }
        }
        Commands::Stats => {
            let blocks = engine.free_blocks()?;
            println!("tables:       {} / {}", engine.table_ids()?.len(), engine.max_tables()?);
            println!("capacity:     {} bytes", engine.capacity()?);
            println!("free:         {} bytes", blocks.iter().map(|b| b.size).sum::<u64>());
            println!("free blocks:  {}", blocks.len());
            println!(
                "largest free: {} bytes",
                blocks.iter().map(|b| b.size).max().unwrap_or(0)
            );
        }
    }
    Ok(())
}
