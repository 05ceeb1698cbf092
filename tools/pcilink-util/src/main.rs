#![forbid(unsafe_code)]

mod ssh;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use pcilink::{
    Backend, HostConfig, LinkCapabilities, LinkSpeed, LinkStatus, LocalBackend, PciDevice,
    RemoteBackend,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::ssh::SshSession;

#[derive(Debug, Args)]
struct RemoteArgs {
    /// Remote host to connect to.
    #[arg(short = 'H', long, env = "PCILINK_REMOTE_HOST")]
    host: Option<String>,

    /// Remote user to connect as.
    #[arg(short, long, env = "PCILINK_REMOTE_USER")]
    user: Option<String>,

    /// SSH key used for authentication.
    #[arg(short, long, env = "PCILINK_REMOTE_KEY")]
    key: Option<PathBuf>,
}

#[derive(Debug, Parser)]
#[command(name = "pcilink")]
#[command(about = "Inspect and control PCI Express links, locally or over ssh")]
struct Cli {
    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,

    /// The device to act on (`0000:01:00.0` or `01:00.0`).
    #[arg(short, long)]
    device: Option<String>,

    #[command(flatten)]
    remote: RemoteArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Enumerate and list all PCI(e) devices.
    List {
        /// Print every decoded link register field.
        #[arg(short = 'D', long)]
        detailed: bool,
    },
    /// Dump device information.
    Info {
        /// Print every decoded link register field.
        #[arg(short = 'D', long)]
        detailed: bool,
    },
    /// Print the current link speed.
    GetSpeed,
    /// Set the target link speed (1 = 2.5 GT/s ... 7 = 128 GT/s) and retrain.
    SetSpeed {
        #[arg(value_parser = clap::value_parser!(u8).range(1..=7))]
        speed: u8,
    },
    /// Reset the device.
    Reset,
    /// Remove the device and rescan the bus.
    ReEnum,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .init();
}

/// Local backend unless host, user and key are all given.
fn backend(remote: RemoteArgs) -> Arc<dyn Backend> {
    let config = HostConfig::from_env();
    match (remote.host, remote.user, remote.key) {
        (Some(host), Some(user), Some(key)) => {
            info!(host = %host, user = %user, "using remote host");
            Arc::new(RemoteBackend::new(SshSession::new(host, user, key), config))
        }
        _ => Arc::new(LocalBackend::new(config)),
    }
}

fn run(cli: Cli) -> Result<bool> {
    let backend = backend(cli.remote);

    if let Commands::List { detailed } = cli.command {
        for dev in pcilink::enumerate(backend) {
            print_info(&dev, detailed);
        }
        return Ok(true);
    }

    let slot = cli
        .device
        .as_deref()
        .context("--device is required for this command")?;
    let Some(mut dev) = pcilink::get(slot, backend) else {
        error!("invalid PCIe device {slot}");
        return Ok(false);
    };

    let ok = match cli.command {
        Commands::List { .. } => true,
        Commands::Info { detailed } => {
            print_info(&dev, detailed);
            true
        }
        Commands::GetSpeed => {
            println!("Current device speed: {}", dev.link_speed());
            true
        }
        Commands::SetSpeed { speed } => {
            let requested = LinkSpeed::from_code(speed);
            let max = dev.max_speed();
            if requested > max {
                error!("device supports a maximum speed of {max}");
                false
            } else {
                dev.set_speed(requested)
            }
        }
        Commands::Reset => {
            dev.reset();
            true
        }
        Commands::ReEnum => dev.recycle(),
    };
    Ok(ok)
}

fn print_info(dev: &PciDevice, detailed: bool) {
    println!("{dev}");
    if detailed {
        if let Some(caps) = dev.link_capabilities() {
            println!(" => Link Capabilities:");
            print_link_capabilities(&caps);
        }
        if let Some(status) = dev.link_status() {
            println!(" => Link Status:");
            print_link_status(&status);
        }
        return;
    }

    let max_speed = dev.max_speed();
    if !max_speed.is_unknown() {
        println!(" => Max Link Speed: {max_speed}");
    }
    let max_width = dev.max_width();
    if !max_width.is_unknown() {
        println!(" => Max Link Width: {max_width}");
    }
    let speed = dev.link_speed();
    if !speed.is_unknown() {
        println!(" => Current Speed: {speed}");
    }
    let width = dev.link_width();
    if !width.is_unknown() {
        println!(" => Current Width: {width}");
    }
}

fn print_link_status(status: &LinkStatus) {
    println!("   => Speed:            {}", status.speed());
    println!("   => Width:            {}", status.width());
    println!("   => Is Training:      {}", status.link_training);
    println!("   => Using Slot Clock: {}", status.slot_clock);
    println!("   => DLL Active:       {}", status.dll_active);
}

fn print_link_capabilities(caps: &LinkCapabilities) {
    println!("   => Max Speed:          {}", caps.speed());
    println!("   => Max Width:          {}", caps.width());
    println!("   => Port Number:        {}", caps.port_number);
    println!("   => Active State PM:    {}", caps.active_state_pm);
    println!("   => L0s Exit Latency:   {}", caps.l0s_exit_latency);
    println!("   => L1 Exit Latency:    {}", caps.l1_exit_latency);
    println!("   => Clock PM:           {}", caps.clock_pm);
    println!("   => SPDE Reporting:     {}", caps.spde_reporting);
    println!("   => DLLA Reporting:     {}", caps.dlla_reporting);
    println!("   => LBWN Reporting:     {}", caps.lbwn_reporting);
    println!("   => ASPM Opt Compliant: {}", caps.aspmop_compliant);
}
