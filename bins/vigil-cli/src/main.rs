//! vigil-cli: offline watch-only tools over the Vigil wallet core.
//!
//! Derives receive and change addresses from an account xpub, estimates
//! transaction fees, and locates and decrypts label documents. Nothing here
//! talks to a device or the network.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info};
use vigil_core::address::encode_address;
use vigil_core::constants::{CHANGE_CHAIN, EXTERNAL_CHAIN, Network};
use vigil_core::crypto::ExtendedKey;
use vigil_wallet::fee::{self, change_output_size};
use vigil_wallet::{AccountMetadata, MasterKey, WalletConfig};

/// Vigil command-line tools.
#[derive(Parser)]
#[command(name = "vigil-cli")]
#[command(version, about = "Watch-only companion tools for hardware wallets")]
struct Cli {
    /// TOML configuration file (defaults and VIGIL_* variables apply without it).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Network override (mainnet or testnet).
    #[arg(long, global = true)]
    network: Option<String>,

    /// Log level (trace, debug, info, warn, error). Overrides the config.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log output format ("text" or "json").
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Derive addresses from an account xpub.
    Derive(DeriveArgs),
    /// Estimate size and fee of a transaction.
    Fee(FeeArgs),
    /// Show the account key and label file name for an account.
    LabelFile(LabelFileArgs),
    /// Decrypt a label document and print it as JSON.
    DecryptLabels(DecryptLabelsArgs),
}

#[derive(Args)]
struct DeriveArgs {
    /// Serialized account extended public key.
    #[arg(long)]
    xpub: String,

    /// Encode P2PKH instead of P2SH-wrapped segwit.
    #[arg(long)]
    legacy: bool,

    /// Derive from the change chain.
    #[arg(long)]
    change: bool,

    /// First address index.
    #[arg(long, default_value_t = 0)]
    start: u32,

    /// Number of addresses.
    #[arg(long, default_value_t = 5)]
    count: u32,
}

#[derive(Args)]
struct FeeArgs {
    /// Number of inputs.
    #[arg(long)]
    inputs: usize,

    /// Destination address; repeat for several outputs.
    #[arg(long = "output", required = true)]
    outputs: Vec<String>,

    /// Fee rate in satoshis per byte.
    #[arg(long, default_value_t = 1)]
    rate: u64,

    /// Spend from a legacy account.
    #[arg(long)]
    legacy: bool,

    /// Add a change output.
    #[arg(long)]
    change: bool,
}

#[derive(Args)]
struct LabelFileArgs {
    /// Hex-encoded 32-byte labeling master key from the device.
    #[arg(long)]
    master_key: String,

    /// Serialized account extended public key.
    #[arg(long)]
    xpub: String,
}

#[derive(Args)]
struct DecryptLabelsArgs {
    /// Hex-encoded 32-byte labeling master key from the device.
    #[arg(long)]
    master_key: String,

    /// Serialized account extended public key.
    #[arg(long)]
    xpub: String,

    /// Encrypted `.mtdt` file. Defaults to the account's file in the labels directory.
    #[arg(long)]
    file: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = WalletConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(network) = &cli.network {
        config.network = parse_network(network)?;
    }
    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    init_logging(level, &cli.log_format);
    debug!(network = ?config.network, data_dir = %config.data_dir.display(), "configuration loaded");

    match cli.command {
        Commands::Derive(args) => derive(&config, args),
        Commands::Fee(args) => estimate(args),
        Commands::LabelFile(args) => label_file(args),
        Commands::DecryptLabels(args) => decrypt_labels(&config, args),
    }
}

fn parse_network(s: &str) -> Result<Network> {
    match s.to_ascii_lowercase().as_str() {
        "mainnet" | "main" | "bitcoin" => Ok(Network::Mainnet),
        "testnet" | "test" => Ok(Network::Testnet),
        other => bail!("unknown network '{other}' (expected mainnet or testnet)"),
    }
}

fn derive(config: &WalletConfig, args: DeriveArgs) -> Result<()> {
    let (_, account) = ExtendedKey::from_xpub(&args.xpub).context("parsing xpub")?;
    let chain_index = if args.change { CHANGE_CHAIN } else { EXTERNAL_CHAIN };
    let chain = account
        .derive_child(chain_index)
        .context("deriving chain node")?;

    let end = args.start.checked_add(args.count).context("index range overflows")?;
    for index in args.start..end {
        let key = chain
            .derive_child(index)
            .with_context(|| format!("deriving address {index}"))?;
        println!(
            "{chain_index}/{index}\t{}",
            encode_address(&key, args.legacy, config.network)
        );
    }
    Ok(())
}

fn estimate(args: FeeArgs) -> Result<()> {
    let segwit = !args.legacy;
    let outputs = fee::output_types(args.outputs.iter().map(String::as_str))
        .context("classifying outputs")?;

    let mut size = fee::estimate_size(args.inputs, &outputs, segwit);
    if args.change {
        size += change_output_size(segwit);
    }
    let total = size.saturating_mul(args.rate);

    println!("Inputs:  {} ({})", args.inputs, if segwit { "segwit" } else { "legacy" });
    for (address, kind) in args.outputs.iter().zip(&outputs) {
        println!("Output:  {address} ({kind:?})");
    }
    if args.change {
        println!("Change:  yes");
    }
    println!("Size:    {size} bytes");
    println!("Fee:     {total} sat at {} sat/byte", args.rate);
    Ok(())
}

fn label_file(args: LabelFileArgs) -> Result<()> {
    let master = MasterKey::from_hex(args.master_key.trim()).context("parsing master key")?;
    let keys = master.label_keys(&args.xpub);
    println!("Account key: {}", master.account_key(&args.xpub));
    println!("Label file:  {}", keys.filename());
    Ok(())
}

fn decrypt_labels(config: &WalletConfig, args: DecryptLabelsArgs) -> Result<()> {
    let master = MasterKey::from_hex(args.master_key.trim()).context("parsing master key")?;
    let keys = master.label_keys(&args.xpub);
    let path = args
        .file
        .unwrap_or_else(|| config.labels_dir().join(keys.filename()));

    let sealed = read_file(&path)?;
    let plain = keys
        .decrypt(&sealed)
        .with_context(|| format!("decrypting {}", path.display()))?;
    let doc = AccountMetadata::from_json(&plain).context("parsing label document")?;
    info!(
        file = %path.display(),
        addresses = doc.address_labels.len(),
        transactions = doc.output_labels.len(),
        "label document decrypted"
    );

    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    if !path.exists() {
        bail!("label file not found: {}", path.display());
    }
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// `RUST_LOG`, when set, takes precedence over `level_str`.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_derive() {
        let cli = Cli::try_parse_from([
            "vigil-cli",
            "--network",
            "testnet",
            "derive",
            "--xpub",
            "xpub...",
            "--change",
            "--count",
            "3",
        ])
        .unwrap();
        assert_eq!(cli.network.as_deref(), Some("testnet"));
        match cli.command {
            Commands::Derive(args) => {
                assert!(args.change);
                assert!(!args.legacy);
                assert_eq!(args.start, 0);
                assert_eq!(args.count, 3);
            }
            _ => panic!("expected derive"),
        }
    }

    #[test]
    fn cli_fee_requires_outputs() {
        assert!(Cli::try_parse_from(["vigil-cli", "fee", "--inputs", "2"]).is_err());
        let cli = Cli::try_parse_from([
            "vigil-cli",
            "fee",
            "--inputs",
            "2",
            "--output",
            "1BvgsfsZQVtkLS69NvGF8rw6NZW2ShJQHr",
            "--output",
            "3DtkfKCSv3rZ7HYnWFEMTwpF3ZjWWPJAGd",
            "--rate",
            "4",
        ])
        .unwrap();
        match cli.command {
            Commands::Fee(args) => {
                assert_eq!(args.outputs.len(), 2);
                assert_eq!(args.rate, 4);
            }
            _ => panic!("expected fee"),
        }
    }

    #[test]
    fn network_names() {
        assert_eq!(parse_network("Mainnet").unwrap(), Network::Mainnet);
        assert_eq!(parse_network("test").unwrap(), Network::Testnet);
        assert!(parse_network("regtest").is_err());
    }
}
