//! Maintenance CLI for user dictionaries.
//!
//! Usage:
//!   shuru-userdb export --db data/user.userdb.redb --format json
//!   shuru-userdb backup --db data/user.userdb.redb --snapshot user.userdb.txt
//!   shuru-userdb merge --db data/user.userdb.redb --snapshot other.userdb.txt

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use libshuru_core::user_db::{
    read_snapshot, uniform_backup, uniform_restore, UserDbImporter, UserDbMerger, UserDbValue,
    DEFAULT_DEE_HALF_LIFE,
};
use libshuru_core::UserDict;

#[derive(Parser)]
#[command(name = "shuru-userdb")]
#[command(about = "Inspect, export, back up, merge and restore user dictionaries")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Export entries to JSON or CSV
    Export {
        /// Path to the user dictionary database
        #[arg(short, long)]
        db: PathBuf,

        /// Output format: json or csv
        #[arg(short, long, default_value = "json")]
        format: String,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Sort by commit count (descending)
        #[arg(long)]
        sort_by_commits: bool,
    },

    /// Print metadata and entry statistics
    Inspect {
        #[arg(short, long)]
        db: PathBuf,
    },

    /// Write a plain-text snapshot
    Backup {
        #[arg(short, long)]
        db: PathBuf,

        #[arg(short, long)]
        snapshot: PathBuf,
    },

    /// Restore a db from a snapshot
    Restore {
        #[arg(short, long)]
        db: PathBuf,

        #[arg(short, long)]
        snapshot: PathBuf,
    },

    /// Merge a snapshot from another machine into this db
    Merge {
        #[arg(short, long)]
        db: PathBuf,

        #[arg(short, long)]
        snapshot: PathBuf,

        /// Ticks for a foreign dee to halve
        #[arg(long, default_value_t = DEFAULT_DEE_HALF_LIFE)]
        half_life: u64,
    },

    /// Add a snapshot's commits into this db
    Import {
        #[arg(short, long)]
        db: PathBuf,

        #[arg(short, long)]
        snapshot: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    match args.command {
        Command::Export {
            db,
            format,
            output,
            sort_by_commits,
        } => {
            let dict = open(&db)?;
            let mut rows: Vec<(String, String, UserDbValue)> = dict
                .dump()
                .into_iter()
                .filter_map(|(key, value)| {
                    let (code, text) = key.split_once('\t')?;
                    Some((
                        code.trim_end_matches(' ').to_string(),
                        text.to_string(),
                        UserDbValue::parse(&value),
                    ))
                })
                .collect();
            if sort_by_commits {
                rows.sort_by(|a, b| b.2.commits.cmp(&a.2.commits));
            }
            let rendered = match format.as_str() {
                "json" => export_json(&rows)?,
                "csv" => export_csv(&rows),
                other => bail!("unsupported format: {other}. Use 'json' or 'csv'"),
            };
            match output {
                Some(path) => std::fs::write(path, rendered)?,
                None => print!("{rendered}"),
            }
        }
        Command::Inspect { db } => {
            let dict = open(&db)?;
            for (key, value) in dict.meta_dump() {
                println!("{key}\t{value}");
            }
            let rows = dict.dump();
            let total_commits: i64 = rows
                .iter()
                .map(|(_, v)| UserDbValue::parse(v).commits as i64)
                .sum();
            println!("entries\t{}", rows.len());
            println!("total_commits\t{total_commits}");
        }
        Command::Backup { db, snapshot } => {
            let dict = open(&db)?;
            let entries = uniform_backup(&dict, &snapshot)?;
            eprintln!("wrote {} entries to {}", entries, snapshot.display());
        }
        Command::Restore { db, snapshot } => {
            let dict = open(&db)?;
            let entries = uniform_restore(&dict, &snapshot, || {
                Err(libshuru_core::Error::SnapshotFormat(
                    "not recognized, and redb has no native text restore".into(),
                ))
            })
            .map_err(anyhow::Error::from)?;
            eprintln!("restored {} entries into {}", entries, db.display());
        }
        Command::Merge {
            db,
            snapshot,
            half_life,
        } => {
            let dict = open(&db)?;
            let mut merger = UserDbMerger::new(&dict, half_life);
            read_snapshot(&snapshot, &mut merger)
                .with_context(|| format!("reading {}", snapshot.display()))?;
            merger.close_merge().map_err(anyhow::Error::from)?;
            eprintln!(
                "merged {} entries from {}",
                merger.merged_entries(),
                snapshot.display()
            );
        }
        Command::Import { db, snapshot } => {
            let dict = open(&db)?;
            let mut importer = UserDbImporter::new(&dict);
            let entries = read_snapshot(&snapshot, &mut importer)
                .with_context(|| format!("reading {}", snapshot.display()))?;
            eprintln!("imported {} entries from {}", entries, snapshot.display());
        }
    }
    Ok(())
}

fn open(path: &PathBuf) -> Result<UserDict> {
    UserDict::open(path).with_context(|| format!("opening user dict {}", path.display()))
}

fn export_json(rows: &[(String, String, UserDbValue)]) -> Result<String> {
    let items: Vec<serde_json::Value> = rows
        .iter()
        .map(|(code, text, value)| {
            serde_json::json!({
                "code": code,
                "text": text,
                "commits": value.commits,
                "dee": value.dee,
                "tick": value.tick,
            })
        })
        .collect();
    Ok(serde_json::to_string_pretty(&items)? + "\n")
}

fn export_csv(rows: &[(String, String, UserDbValue)]) -> String {
    let mut out = String::from("code,text,commits,dee,tick\n");
    for (code, text, value) in rows {
        out.push_str(&format!(
            "{},{},{},{},{}\n",
            code, text, value.commits, value.dee, value.tick
        ));
    }
    out
}
