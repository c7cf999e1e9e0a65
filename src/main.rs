use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use portprobe::icmp;
use portprobe::ports::{self, ParsedPorts};
use portprobe::scanner::{self, INITIAL_RANGE, WIDE_RANGE};
use portprobe::sink;
use portprobe::{PortState, ResultSet, ScanConfig};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ScanKind {
    /// UDP then TCP connect scan of ports 0-1024.
    Initial,
    /// UDP then TCP connect scan of ports 0-49152.
    Wide,
    /// ICMP echo scan of the explicit port list.
    Icmp,
}

/// portprobe — probe one host with TCP/UDP connects and ICMP echo requests.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "portprobe",
    version,
    about = "Probe one host with TCP/UDP connects and ICMP echo requests.",
    long_about = None
)]
struct Cli {
    /// Target hostname or IP address. Prompted for on stdin if omitted.
    #[arg(long)]
    host: Option<String>,

    /// Ports for the ICMP scan, e.g. `80,443,3389` or `8000-8010`. Defaults to 80,443,3389.
    #[arg(long)]
    ports: Option<String>,

    /// Read the ICMP port list from a file (one port or range per line, `#` comments).
    #[arg(long = "ports-file", conflicts_with = "ports")]
    ports_file: Option<PathBuf>,

    /// TCP/UDP connect timeout in milliseconds.
    #[arg(long = "timeout-ms", default_value_t = 1000)]
    timeout_ms: u64,

    /// Max concurrent connect probes during range scans (1 = sequential).
    #[arg(long, default_value_t = 256)]
    concurrency: usize,

    /// Overall ICMP scan timeout in milliseconds.
    #[arg(long = "icmp-timeout-ms", default_value_t = 5000)]
    icmp_timeout_ms: u64,

    /// Scans to run; repeat to pick several. Runs all three if omitted.
    #[arg(long = "scan", value_enum)]
    scans: Vec<ScanKind>,

    /// Directory receiving the result files.
    #[arg(long = "output-dir", default_value = ".")]
    output_dir: PathBuf,

    /// Also write each result set as a JSON report.
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Debug logging (overridden by RUST_LOG).
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

impl Cli {
    fn wants(&self, kind: ScanKind) -> bool {
        self.scans.is_empty() || self.scans.contains(&kind)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    // Ask every question before the long scans start.
    let inputs = gather_inputs(&cli, &mut io::stdin().lock(), &mut io::stdout())?;
    let host = inputs.host;

    let config = ScanConfig::default()
        .with_connect_timeout(Duration::from_millis(cli.timeout_ms))
        .with_concurrency(cli.concurrency)
        .with_icmp_timeout(Duration::from_millis(cli.icmp_timeout_ms));

    info!("portprobe configuration:");
    info!("  host         : {host}");
    info!("  timeout_ms   : {}", cli.timeout_ms);
    info!("  concurrency  : {}", cli.concurrency);
    info!("  icmp_timeout : {}", cli.icmp_timeout_ms);
    info!("  output_dir   : {}", cli.output_dir.display());

    // Ctrl-C cancels whatever scan is running; results gathered so far are still written.
    let cancel = CancellationToken::new();
    let cancel_ctrlc = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        warn!("interrupted, cancelling scan");
        cancel_ctrlc.cancel();
    });

    if cli.wants(ScanKind::Initial) {
        info!("Starting initial scan on ports {}-{}...", INITIAL_RANGE.0, INITIAL_RANGE.1);
        let results = scanner::initial_scan(&host, &config, cancel.clone()).await;
        report(&cli, &host, "initial_scan_results", ResultSet::Connect(results));
    }

    if cli.wants(ScanKind::Wide) && !cancel.is_cancelled() {
        info!("Starting wide scan on ports {}-{}...", WIDE_RANGE.0, WIDE_RANGE.1);
        let results = scanner::wide_scan(&host, &config, cancel.clone()).await;
        report(&cli, &host, "wide_scan_results", ResultSet::Connect(results));
    }

    if let Some(parsed) = inputs.icmp_ports.as_ref() {
        if !cancel.is_cancelled() {
            run_icmp(&cli, &host, parsed, &config, cancel.clone()).await;
        }
    }

    Ok(())
}

const HOST_PROMPT: &str = "Enter target hostname (e.g., localhost or 192.168.1.1): ";
const PORTS_PROMPT: &str =
    "Enter ports to scan (comma-separated, e.g., '80,443,3389') or press Enter to scan default ports: ";

/// Target and ICMP port list, settled before any scan runs.
struct Inputs {
    host: String,
    /// `None` when the ICMP scan is not selected.
    icmp_ports: Option<ParsedPorts>,
}

fn gather_inputs<R: BufRead, W: Write>(cli: &Cli, input: &mut R, output: &mut W) -> Result<Inputs> {
    let prompted = cli.host.is_none();
    let host = match cli.host.as_deref() {
        Some(h) => h.trim().to_string(),
        None => prompt(input, output, HOST_PROMPT)?,
    };
    if host.is_empty() {
        bail!("no target host given");
    }

    let icmp_ports = if cli.wants(ScanKind::Icmp) {
        Some(icmp_ports(cli, prompted, input, output)?)
    } else {
        None
    };
    Ok(Inputs { host, icmp_ports })
}

fn icmp_ports<R: BufRead, W: Write>(
    cli: &Cli,
    prompted: bool,
    input: &mut R,
    output: &mut W,
) -> Result<ParsedPorts> {
    if let Some(path) = cli.ports_file.as_deref() {
        return ports::load_ports_from_path(path);
    }
    if cli.ports.is_none() && prompted {
        let answer = prompt(input, output, PORTS_PROMPT)?;
        return Ok(ports::ports_or_default(Some(&answer)));
    }
    Ok(ports::ports_or_default(cli.ports.as_deref()))
}

fn prompt<R: BufRead, W: Write>(input: &mut R, output: &mut W, question: &str) -> Result<String> {
    write!(output, "{question}")?;
    output.flush()?;
    let mut line = String::new();
    input.read_line(&mut line).context("failed to read from stdin")?;
    Ok(line.trim().to_string())
}

/// Run the ICMP scan and write its output. A fatal scan failure still writes
/// an empty result set so no stale file survives.
async fn run_icmp(
    cli: &Cli,
    host: &str,
    parsed: &ParsedPorts,
    config: &ScanConfig,
    cancel: CancellationToken,
) {
    for rejected in &parsed.rejected {
        warn!("{rejected}");
    }
    info!("Starting ICMP scan on ports {:?}...", parsed.ports);
    let results = match icmp::scan_icmp(host, &parsed.ports, config, cancel).await {
        Ok(scan) => scan.results,
        Err(e) => {
            error!("ICMP scan failed: {e}");
            Vec::new()
        }
    };
    report(cli, host, "icmp_scan_results", ResultSet::Icmp(results));
}

/// Print a summary and write the text (and optionally JSON) outputs.
/// A failing destination is logged and does not stop the others.
fn report(cli: &Cli, host: &str, stem: &str, results: ResultSet) {
    println!("{stem}: {} probed, {} open", results.len(), results.open_count());
    print_open(&results);

    let text_path = cli.output_dir.join(format!("{stem}.txt"));
    save(&text_path, sink::save_text(&text_path, &results));

    if cli.json {
        let json_path = cli.output_dir.join(format!("{stem}.json"));
        save(&json_path, sink::save_json(&json_path, host, &results));
    }
}

fn print_open(results: &ResultSet) {
    match results {
        ResultSet::Connect(v) => {
            for r in v.iter().filter(|r| r.state == PortState::Open) {
                let note = if r.is_authoritative() { "" } else { "  (best effort)" };
                println!("{r}{note}");
            }
        }
        ResultSet::Icmp(v) => {
            for r in v {
                println!("{r}");
            }
        }
    }
}

fn save(path: &Path, outcome: portprobe::Result<()>) {
    match outcome {
        Ok(()) => info!("results saved to {}", path.display()),
        Err(e) => error!("{e}"),
    }
}
