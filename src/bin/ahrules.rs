//! ahrules: check rules, dump their structured form and route events.

use ahrules::{rulelang, Error, Event, Result, RoomGraph, RoomGraphConfig};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "ahrules")]
#[command(version)]
#[command(about = "Rule language tools for abuse-report events", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse rules and print their canonical text
    Check {
        /// Rule texts
        #[arg(required = true)]
        rules: Vec<String>,
    },

    /// Print the structured JSON form of a rule
    Dump {
        /// Rule text
        rule: String,
    },

    /// Route JSON-lines events through a room graph
    Classify {
        /// Room graph config (text, .yaml/.yml or .json)
        #[arg(short, long)]
        graph: PathBuf,

        /// Source room the events come from
        #[arg(short, long)]
        src: String,

        /// Event file, one JSON object per line (default: stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Check { rules } => check(&rules),
        Commands::Dump { rule } => dump(&rule),
        Commands::Classify { graph, src, input } => classify(&graph, &src, input.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn check(rules: &[String]) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for text in rules {
        let rule = rulelang::parse(text)?;
        writeln!(out, "{}", rulelang::format(&rule))?;
    }
    Ok(())
}

fn dump(text: &str) -> Result<()> {
    let rule = rulelang::parse(text)?;
    println!("{}", serde_json::to_string_pretty(&rule)?);
    Ok(())
}

fn classify(graph_path: &Path, src: &str, input: Option<&Path>) -> Result<()> {
    let config = RoomGraphConfig::from_file(graph_path)?;
    let mut graph = RoomGraph::from_config(&config);
    if !graph.is_source(src) {
        log::warn!("No sessions read from room {:?}", src);
    }

    let reader: Box<dyn BufRead> = match input {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event: Event = serde_json::from_str(&line).map_err(|e| {
            Error::Config(format!("invalid event on line {}: {}", index + 1, e))
        })?;
        let rooms = graph.route(src, &event);
        writeln!(out, "{}", serde_json::to_string(&rooms)?)?;
    }

    graph.take_stats();
    Ok(())
}
