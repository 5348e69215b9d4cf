use std::net::IpAddr;
use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};
use log::{error, warn};
use serde_json::{Value, json};
use tokio::time;

use xdp_redirect::resolve::{self, FlowTuple};
use xdp_redirect::{PinnedTargetTable, TargetTable};
use xdp_redirect_common::{
    DEFAULT_TABLE_CAPACITY, KeyMode, MAP_REDIRECT_CONTROL, MAP_REDIRECT_COUNTERS,
    MAP_REDIRECT_TARGETS, RedirectKey, RedirectTarget,
};

mod ebpf_loader;

use ebpf_loader::{KeyModeArg, XdpMode};

#[derive(Parser)]
#[command(name = "xdp-redirect")]
#[command(about = "XDP fast-path redirect agent", long_about = None)]
struct Cli {
    /// Directory holding the pinned maps
    #[arg(long, global = true, value_name = "DIR", default_value = ebpf_loader::DEFAULT_PIN_DIR)]
    pin_dir: PathBuf,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the redirect program, attach it to an interface and wait for Ctrl+C
    Attach(AttachCommand),
    /// Manage entries of the pinned redirect table
    #[command(subcommand)]
    Table(TableCommand),
    /// Print redirect counters summed across CPUs
    Stats(StatsCommand),
}

#[derive(Args)]
struct AttachCommand {
    /// Interface whose receive path gets the program
    #[arg(long, value_name = "IFACE")]
    iface: String,
    /// XDP attach mode
    #[arg(long, value_enum, default_value_t = XdpMode::Driver)]
    xdp_mode: XdpMode,
    /// Frame fields that form the redirect key
    #[arg(long, value_enum, default_value_t = KeyModeArg::Interface)]
    key_mode: KeyModeArg,
    /// Maximum number of redirect table entries
    #[arg(long, value_name = "ENTRIES", default_value_t = DEFAULT_TABLE_CAPACITY)]
    capacity: u32,
}

#[derive(Subcommand)]
enum TableCommand {
    /// Insert or replace an entry
    Upsert {
        #[command(flatten)]
        key: KeyArgs,
        /// interface:<iface>, socket:<slot>, bounce or deny
        #[arg(long, value_name = "TARGET")]
        target: String,
    },
    /// Remove an entry; removing a missing entry succeeds
    Remove {
        #[command(flatten)]
        key: KeyArgs,
    },
    /// Show the target of one entry
    Lookup {
        #[command(flatten)]
        key: KeyArgs,
    },
    /// List all entries as JSON
    List,
    /// Remove every entry
    Clear,
}

/// Key fields; which ones apply depends on the key mode the program runs with.
#[derive(Args)]
struct KeyArgs {
    /// Ingress interface
    #[arg(long = "in", value_name = "IFACE")]
    ingress: String,
    /// Destination MAC (dest-mac key mode)
    #[arg(long, value_name = "MAC", conflicts_with = "proto")]
    dst_mac: Option<String>,
    /// Non-IP frame in flow key mode
    #[arg(long, action = ArgAction::SetTrue, conflicts_with_all = ["dst_mac", "proto"])]
    l2: bool,
    /// L4 protocol name or number (flow key mode)
    #[arg(long, requires_all = ["src", "dst"])]
    proto: Option<String>,
    #[arg(long, value_name = "ADDR")]
    src: Option<IpAddr>,
    #[arg(long, value_name = "PORT", default_value_t = 0)]
    src_port: u16,
    #[arg(long, value_name = "ADDR")]
    dst: Option<IpAddr>,
    #[arg(long, value_name = "PORT", default_value_t = 0)]
    dst_port: u16,
}

impl KeyArgs {
    /// Builds the key and checks it against the mode of the attached program.
    fn to_key(&self, program_mode: KeyMode) -> Result<RedirectKey> {
        let key = self.build_key()?;
        resolve::ensure_key_mode(&key, program_mode)?;
        Ok(key)
    }

    fn build_key(&self) -> Result<RedirectKey> {
        let ifindex = resolve::ifindex(&self.ingress)?;
        if let Some(mac) = &self.dst_mac {
            return Ok(RedirectKey::dest_mac(ifindex, resolve::parse_mac(mac)?));
        }
        if self.l2 {
            return Ok(RedirectKey::l2_flow(ifindex));
        }
        match (&self.proto, self.src, self.dst) {
            (Some(proto), Some(src), Some(dst)) => {
                let flow = FlowTuple {
                    proto: resolve::parse_proto(proto)?,
                    src,
                    src_port: self.src_port,
                    dst,
                    dst_port: self.dst_port,
                };
                resolve::flow_key(ifindex, &flow)
            }
            (None, None, None) => Ok(RedirectKey::interface(ifindex)),
            _ => bail!("flow keys need --proto, --src and --dst"),
        }
    }
}

#[derive(Args)]
struct StatsCommand {
    /// Zero the counters after printing them
    #[arg(long, action = ArgAction::SetTrue)]
    reset: bool,
    /// Keep printing every SECS seconds
    #[arg(long, value_name = "SECS")]
    watch: Option<u64>,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = run().await {
        error!("xdp-redirect error: {err:?}");
        exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Attach(cmd)) => {
            let opts = ebpf_loader::AttachOptions {
                iface: cmd.iface,
                pin_dir: cli.pin_dir,
                xdp_mode: cmd.xdp_mode,
                key_mode: cmd.key_mode.into(),
                table_capacity: cmd.capacity,
            };
            ebpf_loader::attach_program(opts).await?;
        }
        Some(Commands::Table(cmd)) => {
            let control_pin = ebpf_loader::pin_path(&cli.pin_dir, MAP_REDIRECT_CONTROL);
            let control = ebpf_loader::read_control_config(&control_pin)?;
            let pin = ebpf_loader::pin_path(&cli.pin_dir, MAP_REDIRECT_TARGETS);
            let mut table = PinnedTargetTable::open(&pin)?;
            if table.capacity() != control.table_capacity {
                warn!(
                    "{} has room for {} entries but the program was attached with {}",
                    pin.display(),
                    table.capacity(),
                    control.table_capacity
                );
            }
            run_table_command(&mut table, control.key_mode(), cmd)?;
        }
        Some(Commands::Stats(cmd)) => {
            let pin = ebpf_loader::pin_path(&cli.pin_dir, MAP_REDIRECT_COUNTERS);
            run_stats_command(&pin, cmd).await?;
        }
        None => {
            Cli::command().print_help().ok();
            println!();
        }
    }

    Ok(())
}

fn run_table_command<T: TargetTable>(
    table: &mut T,
    key_mode: KeyMode,
    cmd: TableCommand,
) -> Result<()> {
    match cmd {
        TableCommand::Upsert { key, target } => {
            let key = key.to_key(key_mode)?;
            let target = resolve::parse_target(&target, resolve::ifindex)?;
            table
                .upsert(key, target)
                .with_context(|| format!("failed to upsert {target}"))?;
            println!("{}", entry_json(&key, &target));
        }
        TableCommand::Remove { key } => {
            table.remove(&key.to_key(key_mode)?)?;
        }
        TableCommand::Lookup { key } => match table.lookup(&key.to_key(key_mode)?)? {
            Some(target) => println!("{target}"),
            None => {
                println!("absent");
            }
        },
        TableCommand::List => {
            let entries: Vec<Value> = table
                .entries()?
                .iter()
                .map(|(key, target)| entry_json(key, target))
                .collect();
            println!(
                "{}",
                json!({
                    "key_mode": resolve::key_mode_name(key_mode),
                    "capacity": table.capacity(),
                    "entries": entries,
                })
            );
        }
        TableCommand::Clear => table.clear()?,
    }
    Ok(())
}

fn entry_json(key: &RedirectKey, target: &RedirectTarget) -> Value {
    json!({ "key": format!("{key:?}"), "target": target.to_string() })
}

async fn run_stats_command(pin: &std::path::Path, cmd: StatsCommand) -> Result<()> {
    let Some(secs) = cmd.watch else {
        println!("{}", ebpf_loader::read_counters(pin)?.to_json());
        if cmd.reset {
            ebpf_loader::reset_counters(pin)?;
        }
        return Ok(());
    };

    let mut ticker = time::interval(Duration::from_secs(secs.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
                let report = ebpf_loader::read_counters(pin)?;
                println!("[{timestamp}] {}", report.to_json());
                if cmd.reset {
                    ebpf_loader::reset_counters(pin)?;
                }
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}
