use std::{
    convert::TryFrom,
    fs, io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow, ensure};
use aya::pin::PinError;
use aya::programs::xdp::XdpLinkId;
use aya::programs::{Xdp, XdpMode as XdpFlags};
use aya::{
    Ebpf, EbpfLoader, include_bytes_aligned,
    maps::{Array, Map, MapData, PerCpuArray, PerCpuValues},
    util::nr_cpus,
};
use aya_log::EbpfLogger;
use clap::ValueEnum;
use log::{info, warn};
use tokio::signal;

use xdp_redirect::CounterReport;
use xdp_redirect::license::validate_object_license;
use xdp_redirect_common::{
    CONTROL_SLOT_RUNTIME, ControlConfig, Counter, KeyMode, MAP_REDIRECT_CONTROL,
    MAP_REDIRECT_COUNTERS, MAP_REDIRECT_TARGETS, MAP_XSK_SOCKETS, XDP_PROGRAM,
};

const EBPF_BYTES: &[u8] = include_bytes_aligned!(concat!(env!("OUT_DIR"), "/xdp-redirect"));

pub const DEFAULT_PIN_DIR: &str = "/sys/fs/bpf/xdp_redirect";

pub fn pin_path(pin_dir: &Path, map_name: &str) -> PathBuf {
    pin_dir.join(map_name)
}

/// Sums the per-CPU slots of the pinned `redir_counters` map.
pub fn read_counters<P: AsRef<Path>>(pin_path: P) -> Result<CounterReport> {
    let counters = open_counters(pin_path.as_ref())?;
    let mut per_slot = Vec::with_capacity(Counter::ALL.len());
    for counter in Counter::ALL {
        let values: PerCpuValues<u64> = counters
            .get(&counter.slot(), 0)
            .with_context(|| format!("failed to read counter {}", counter.name()))?;
        per_slot.push((counter, values.to_vec()));
    }
    Ok(CounterReport::from_per_cpu(
        per_slot
            .iter()
            .map(|(counter, values)| (*counter, values.as_slice())),
    ))
}

/// Zeroes every slot on every CPU. Increments racing with the reset may be
/// lost, which the counters tolerate anyway.
pub fn reset_counters<P: AsRef<Path>>(pin_path: P) -> Result<()> {
    let mut counters = open_counters(pin_path.as_ref())?;
    let cpus = nr_cpus().map_err(|(msg, err)| anyhow!("{msg}: {err}"))?;
    for counter in Counter::ALL {
        let zeroes = PerCpuValues::try_from(vec![0u64; cpus])
            .context("failed to build per-cpu values")?;
        counters
            .set(counter.slot(), zeroes, 0)
            .with_context(|| format!("failed to reset counter {}", counter.name()))?;
    }
    Ok(())
}

/// Reads the control block the running program was attached with.
pub fn read_control_config<P: AsRef<Path>>(pin_path: P) -> Result<ControlConfig> {
    let pin = pin_path.as_ref();
    let map_data = MapData::from_pin(pin)
        .map_err(|e| anyhow!("failed to open pinned map {}: {}", pin.display(), e))?;
    let map_enum = Map::from_map_data(map_data).map_err(|e| anyhow!("invalid map type: {}", e))?;
    let control = Array::<_, ControlConfig>::try_from(map_enum)
        .map_err(|e| anyhow!("failed to convert to Array: {}", e))?;
    control
        .get(&CONTROL_SLOT_RUNTIME, 0)
        .context("failed to read control block")
}

fn open_counters(pin: &Path) -> Result<PerCpuArray<MapData, u64>> {
    let map_data =
        MapData::from_pin(pin).map_err(|e| anyhow!("failed to open pinned map: {}", e))?;
    let map_enum = Map::from_map_data(map_data).map_err(|e| anyhow!("invalid map type: {}", e))?;
    PerCpuArray::<_, u64>::try_from(map_enum)
        .map_err(|e| anyhow!("failed to convert to PerCpuArray: {}", e))
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum XdpMode {
    Skb,
    Driver,
    Hw,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum KeyModeArg {
    Interface,
    DestMac,
    Flow,
}

impl From<KeyModeArg> for KeyMode {
    fn from(arg: KeyModeArg) -> Self {
        match arg {
            KeyModeArg::Interface => KeyMode::Interface,
            KeyModeArg::DestMac => KeyMode::DestMac,
            KeyModeArg::Flow => KeyMode::Flow,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AttachOptions {
    pub iface: String,
    pub pin_dir: PathBuf,
    pub xdp_mode: XdpMode,
    pub key_mode: KeyMode,
    pub table_capacity: u32,
}

pub async fn attach_program(opts: AttachOptions) -> Result<()> {
    validate_attach_options(&opts)?;
    validate_object_license(EBPF_BYTES).context("refusing to attach")?;

    fs::create_dir_all(&opts.pin_dir)
        .with_context(|| format!("failed to create {}", opts.pin_dir.display()))?;

    let mut loader = EbpfLoader::new();
    #[allow(deprecated)]
    {
        // `set_max_entries` is currently the only stable API across our Aya pin.
        loader.set_max_entries(MAP_REDIRECT_TARGETS, opts.table_capacity);
    }

    let mut bpf = loader
        .load(EBPF_BYTES)
        .context("failed to load eBPF object")?;

    if let Err(err) = EbpfLogger::init(&mut bpf) {
        warn!("eBPF logger unavailable: {err}");
    }

    write_control_config(
        &mut bpf,
        ControlConfig::new(opts.key_mode, opts.table_capacity),
    )?;

    for map_name in [
        MAP_REDIRECT_TARGETS,
        MAP_REDIRECT_COUNTERS,
        MAP_REDIRECT_CONTROL,
        MAP_XSK_SOCKETS,
    ] {
        pin_map(&mut bpf, map_name, &pin_path(&opts.pin_dir, map_name))?;
    }

    let link = attach_xdp(&mut bpf, &opts.iface, opts.xdp_mode)?;

    info!(
        "attached {XDP_PROGRAM} to {} ({:?} mode, {:?} keys, {} table entries); press Ctrl+C to detach",
        opts.iface, opts.xdp_mode, opts.key_mode, opts.table_capacity
    );

    signal::ctrl_c()
        .await
        .context("failed to wait for shutdown signal")?;

    info!("detaching {XDP_PROGRAM} from {}", opts.iface);
    detach(&mut bpf, link)
}

fn validate_attach_options(opts: &AttachOptions) -> Result<()> {
    ensure!(!opts.iface.is_empty(), "interface name must not be empty");
    ensure!(
        opts.table_capacity > 0,
        "table capacity must be greater than zero"
    );
    Ok(())
}

fn write_control_config(bpf: &mut Ebpf, cfg: ControlConfig) -> Result<()> {
    let map = bpf
        .map_mut(MAP_REDIRECT_CONTROL)
        .with_context(|| format!("map {MAP_REDIRECT_CONTROL} not found"))?;
    let mut array =
        Array::<_, ControlConfig>::try_from(map).context("control map has unexpected type")?;
    array
        .set(CONTROL_SLOT_RUNTIME, cfg, 0)
        .with_context(|| "failed to write control block")?;
    Ok(())
}

/// Pins `map_name` at `path`, replacing a pin left behind by an earlier run so
/// the control plane always reaches the maps of the attached program.
fn pin_map(bpf: &mut Ebpf, map_name: &str, path: &Path) -> Result<()> {
    let map = bpf
        .map_mut(map_name)
        .with_context(|| format!("map {map_name} not found"))?;
    match map.pin(path) {
        Ok(()) => Ok(()),
        Err(PinError::SyscallError(err)) if err.io_error.kind() == io::ErrorKind::AlreadyExists => {
            warn!("replacing stale pin {}", path.display());
            fs::remove_file(path)
                .with_context(|| format!("failed to remove stale pin {}", path.display()))?;
            map.pin(path)
                .map_err(|err| anyhow!("failed to pin map {map_name} at {}: {err}", path.display()))
        }
        Err(err) => Err(anyhow!(
            "failed to pin map {map_name} at {}: {err}",
            path.display()
        )),
    }
}

fn attach_xdp(bpf: &mut Ebpf, iface: &str, mode: XdpMode) -> Result<XdpLinkId> {
    let flags = xdp_flags(mode);
    let program: &mut Xdp = bpf
        .program_mut(XDP_PROGRAM)
        .with_context(|| format!("program {XDP_PROGRAM} not found"))?
        .try_into()
        .context("xdp program has wrong type")?;
    program
        .load()
        .context("failed to load xdp program (verifier rejected it?)")?;
    program
        .attach(iface, flags)
        .with_context(|| format!("failed to attach xdp on {iface}"))
}

fn detach(bpf: &mut Ebpf, link: XdpLinkId) -> Result<()> {
    let program: &mut Xdp = bpf
        .program_mut(XDP_PROGRAM)
        .with_context(|| format!("program {XDP_PROGRAM} not found"))?
        .try_into()
        .context("xdp program has wrong type")?;
    program.detach(link).context("failed to detach xdp program")
}

fn xdp_flags(mode: XdpMode) -> XdpFlags {
    match mode {
        XdpMode::Skb => XdpFlags::Skb,
        XdpMode::Driver => XdpFlags::Driver,
        XdpMode::Hw => XdpFlags::Hardware,
    }
}
