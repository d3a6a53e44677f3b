use std::str::FromStr;

use clap::{Args, Parser, Subcommand};
use etherbone_host::etherbone_wire::DataWidth;
use etherbone_host::{MaskOp, NetworkTarget};

#[derive(Parser)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(color = clap::ColorChoice::Auto)]
#[command(styles = clap::builder::styling::Styles::styled()
    .header(clap::builder::styling::AnsiColor::Blue.on_default())
    .usage(clap::builder::styling::AnsiColor::Cyan.on_default())
    .literal(clap::builder::styling::AnsiColor::Yellow.on_default())
    .placeholder(clap::builder::styling::AnsiColor::Blue.on_default()))]
pub(crate) struct Cli {
    /// Device to talk to, proto/host[/port], for example udp/192.168.1.20
    #[arg(short, long, default_value = "udp/localhost", value_name = "proto/host[/port]")]
    pub(crate) target: NetworkTarget,

    /// Reply timeout in milliseconds, compile time default if not given
    #[arg(long)]
    pub(crate) timeout_ms: Option<u64>,

    /// Probe attempts when opening the device
    #[arg(long, default_value_t = 3)]
    pub(crate) attempts: u32,

    /// Retries of a failed access before giving up, 'none' for unbounded
    #[arg(short, long, default_value = "3")]
    pub(crate) retries: Retries,

    /// Do not consult SDB, assume all sizes and unknown byte order
    #[arg(long)]
    pub(crate) no_probe: bool,

    /// Bridge nesting limit for SDB walks
    #[arg(long, default_value_t = 16)]
    pub(crate) max_depth: usize,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Print every SDB record of the device
    Scan,

    /// Read a register
    Read {
        #[command(flatten)]
        reg: Register,

        /// Read this many consecutive registers
        #[arg(short('n'), long, default_value_t = 1)]
        count: u32,
    },

    /// Write a register
    Write {
        #[command(flatten)]
        reg: Register,

        #[arg(value_parser = parse_number)]
        value: u64,
    },

    /// Read a register, apply the mask and write the result back
    Rmw {
        #[command(flatten)]
        reg: Register,
    },

    /// Serve a simulated board over UDP
    Sim {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,

        #[arg(short, long, default_value_t = etherbone_host::etherbone_wire::DEFAULT_PORT)]
        port: u16,
    },
}

#[derive(Args)]
pub(crate) struct Register {
    /// Bus address, decimal or 0x prefixed hex
    #[arg(value_parser = parse_number)]
    pub(crate) address: u64,

    /// Access size in bits
    #[arg(short, long, default_value = "32", value_parser = parse_width)]
    pub(crate) width: DataWidth,

    /// Added to the address
    #[arg(long, default_value = "0", value_parser = parse_number)]
    pub(crate) offset: u64,

    #[arg(short, long, default_value = "0", value_parser = parse_number)]
    pub(crate) mask: u64,

    /// or / and
    #[arg(long, default_value = "or")]
    pub(crate) mask_op: MaskOp,

    /// Address the Etherbone config space instead of the bus
    #[arg(short, long)]
    pub(crate) config: bool,
}

fn parse_number(s: &str) -> Result<u64, String> {
    let s = s.replace('_', "");
    let r = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    r.map_err(|e| format!("'{s}': {e}"))
}

fn parse_width(s: &str) -> Result<DataWidth, String> {
    s.parse::<usize>()
        .ok()
        .filter(|bits| bits % 8 == 0)
        .and_then(|bits| DataWidth::from_bytes(bits / 8))
        .ok_or_else(|| format!("'{s}' is not one of 8, 16, 32, 64"))
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct Retries(pub(crate) Option<u32>);

impl FromStr for Retries {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("none") {
            return Ok(Retries(None));
        }
        s.parse()
            .map(|n| Retries(Some(n)))
            .map_err(|e| format!("'{s}': {e}"))
    }
}
