//! villas-shmem - describe and inspect VILLAS shmem interfaces
//!
//!   - describe: print the node configuration for an interface
//!   - monitor:  attach to a running interface and print its samples

use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use villas_shmem::{AttributeMode, Interface, InterfaceConfig, InterfaceOptions, ShmemTransport};

#[derive(Parser)]
#[command(name = "villas-shmem")]
#[command(about = "VILLAS shmem interface tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the VILLAS node configuration of an interface
    Describe {
        /// Channel carrying the simulator output (e.g. /villas0-out)
        #[arg(short, long)]
        read: String,

        /// Channel carrying the simulator input (e.g. /villas0-in)
        #[arg(short, long)]
        write: String,

        /// Exported attribute as NAME:IDX[:MODE[:GAIN]], repeatable
        #[arg(short, long = "export", value_parser = parse_export)]
        exports: Vec<ExportArg>,

        /// Queue length in samples
        #[arg(long, default_value_t = villas_shmem::interface::DEFAULT_QUEUE_LEN)]
        queue_len: usize,

        /// Values per sample
        #[arg(long, default_value_t = villas_shmem::interface::DEFAULT_SAMPLE_LEN)]
        sample_len: usize,

        /// Let the consumer poll instead of waiting
        #[arg(long)]
        polling: bool,

        /// Single-line JSON
        #[arg(long)]
        compact: bool,
    },

    /// Attach to a running interface and print received samples
    Monitor {
        /// Node configuration produced by `describe`
        config: PathBuf,

        /// Stop after this many samples
        #[arg(short, long)]
        count: Option<usize>,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, ValueEnum)]
enum ModeArg {
    Real,
    Complex,
    Polar,
}

impl From<ModeArg> for AttributeMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Real => AttributeMode::Real,
            ModeArg::Complex => AttributeMode::Complex,
            ModeArg::Polar => AttributeMode::Polar,
        }
    }
}

#[derive(Clone, Debug)]
struct ExportArg {
    attribute: String,
    idx: usize,
    mode: AttributeMode,
    gain: f64,
}

fn parse_export(s: &str) -> Result<ExportArg, String> {
    let mut parts = s.split(':');
    let attribute = parts.next().filter(|a| !a.is_empty()).ok_or("missing attribute name")?;
    let idx = parts
        .next()
        .ok_or("missing slot index")?
        .parse::<usize>()
        .map_err(|e| format!("invalid slot index: {}", e))?;
    let mode = match parts.next() {
        Some(m) => ModeArg::from_str(m, true)?.into(),
        None => AttributeMode::Real,
    };
    let gain = match parts.next() {
        Some(g) => g.parse::<f64>().map_err(|e| format!("invalid gain: {}", e))?,
        None => 1.0,
    };
    if parts.next().is_some() {
        return Err("expected NAME:IDX[:MODE[:GAIN]]".to_string());
    }

    Ok(ExportArg {
        attribute: attribute.to_string(),
        idx,
        mode,
        gain,
    })
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Describe {
            read,
            write,
            exports,
            queue_len,
            sample_len,
            polling,
            compact,
        } => {
            let options = InterfaceOptions {
                queue_len,
                sample_len,
                polling,
            };
            describe(&read, &write, &exports, options, compact)
        }
        Commands::Monitor { config, count } => monitor(&config, count),
    };

    if let Err(e) = result {
        eprintln!("{} {}", style("error:").red().bold(), e);
        std::process::exit(1);
    }
}

fn describe(
    read: &str,
    write: &str,
    exports: &[ExportArg],
    options: InterfaceOptions,
    compact: bool,
) -> Result<(), Box<dyn Error>> {
    let mut iface = Interface::new(read, write, options)?;
    for export in exports {
        iface.export_attribute(export.attribute.as_str(), export.idx, export.mode, export.gain)?;
    }

    let config = iface.describe()?;
    let json = if compact {
        config.to_json()?
    } else {
        config.to_json_pretty()?
    };
    println!("{}", json);
    Ok(())
}

fn load_config(path: &PathBuf) -> Result<InterfaceConfig, Box<dyn Error>> {
    let text = fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    Ok(InterfaceConfig::from_json(&text)?)
}

fn monitor(path: &PathBuf, count: Option<usize>) -> Result<(), Box<dyn Error>> {
    let config = load_config(path)?;
    let transport = ShmemTransport::connect(&config)?;

    println!(
        "{} {} ({} signals, {})",
        style("Monitoring").cyan().bold(),
        style(config.read_channel_name()).green(),
        config.exported_signals().len(),
        if config.polling() { "polling" } else { "blocking" }
    );

    let mut seen = 0usize;
    while count.map_or(true, |n| seen < n) {
        let Some(sample) = transport.recv()? else {
            std::thread::sleep(Duration::from_millis(1));
            continue;
        };
        seen += 1;

        println!("{} #{}", style("sample").yellow(), sample.sequence);
        for (pos, value) in sample.values.iter().enumerate() {
            let name = transport.signals().get(pos).map_or("-", String::as_str);
            println!("   [{:>3}] {:<32} {}", pos, style(name).dim(), value);
        }
    }
    Ok(())
}
