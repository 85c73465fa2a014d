use clap::{Parser, ValueEnum};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use bully_sim::cluster::{Cluster, ClusterReport};
use bully_sim::config::{ClusterConfig, ElectionConfig};
use bully_sim::election::Rank;
use bully_sim::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "bully-sim")]
#[command(version)]
#[command(about = "Simulate the Bully leader-election algorithm")]
struct Args {
    /// Number of nodes, ranked 1..=N
    #[arg(long, short = 'n', default_value = "3")]
    nodes: usize,

    /// Ranks that receive the initial WAKEUP (comma-separated)
    #[arg(long, value_delimiter = ',', default_value = "1")]
    wakeup: Vec<Rank>,

    /// Ranks that are registered but never answer (comma-separated)
    #[arg(long, value_delimiter = ',')]
    silent: Vec<Rank>,

    /// How long a node waits for ALIVE before self-electing
    #[arg(long, default_value = "2000")]
    election_timeout_ms: u64,

    /// Lower bound of the per-iteration latency jitter
    #[arg(long, default_value = "0")]
    jitter_min_ms: u64,

    /// Upper bound of the per-iteration latency jitter
    #[arg(long, default_value = "10")]
    jitter_max_ms: u64,

    /// Delay applied before every send
    #[arg(long, default_value = "0")]
    send_latency_ms: u64,

    /// Give up if the election has not converged by then
    /// (default: nodes * election timeout + 1s)
    #[arg(long)]
    deadline_ms: Option<u64>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

impl Args {
    fn cluster_config(&self) -> ClusterConfig {
        let election = ElectionConfig::default()
            .with_election_timeout_ms(self.election_timeout_ms)
            .with_jitter_ms(self.jitter_min_ms, self.jitter_max_ms)
            .with_send_latency_ms(self.send_latency_ms);

        ClusterConfig::new(self.nodes)
            .with_wakeup(self.wakeup.clone())
            .with_silent(self.silent.clone())
            .with_election(election)
    }

    fn deadline(&self) -> Duration {
        let ms = self.deadline_ms.unwrap_or_else(|| {
            (self.nodes as u64)
                .saturating_mul(self.election_timeout_ms)
                .saturating_add(1000)
        });
        Duration::from_millis(ms)
    }
}

fn print_table(report: &ClusterReport) {
    println!(
        "{:<6} {:<22} {:<8} {:<14} {:>6} {:>6} {:>8}",
        "RANK", "STATE", "LEADER", "RESOLUTION", "SENT", "RECV", "IGNORED"
    );
    for node in &report.nodes {
        let state = if node.silent {
            "silent".to_string()
        } else {
            node.state.to_string()
        };
        let leader = node
            .leader
            .map(|l| l.to_string())
            .unwrap_or_else(|| "-".to_string());
        let resolution = node
            .resolution
            .map(|r| r.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<6} {:<22} {:<8} {:<14} {:>6} {:>6} {:>8}",
            node.rank,
            state,
            leader,
            resolution,
            node.stats.sent.total(),
            node.stats.received.total(),
            node.stats.ignored
        );
    }
    println!();
    match report.leader {
        Some(leader) => println!("Elected leader: node {}", leader),
        None => println!("Nodes disagree on the leader"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = args.cluster_config();
    let deadline = args.deadline();
    let shutdown = install_shutdown_handler();

    let mut cluster = Cluster::start(config)?;

    tokio::select! {
        result = cluster.wait_for_convergence(deadline) => result?,
        _ = shutdown.cancelled() => {
            cluster.abort();
            return Err("simulation interrupted".into());
        }
    }

    let report = cluster.join().await?;
    match args.output {
        OutputFormat::Table => print_table(&report),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    Ok(())
}
