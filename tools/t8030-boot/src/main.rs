//! t8030-boot - build a T8030 boot environment
//!
//! Commands:
//! - `t8030-boot boot --config machine.toml` - Lay out the boot blobs, reset
//!   the machine and print the resulting memory map
//! - `t8030-boot registers` - List the implementation-defined core registers

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use t8030_boot_layout::{BootRegionKind, T8030_KERNEL_PATCHES};
use t8030_cpu::{RegisterBank, MMIO_REG_STRIDE, T8030_CORE_REGISTERS};
use t8030_machine::{Machine, MachineConfig};

#[derive(Parser)]
#[command(name = "t8030-boot")]
#[command(version)]
#[command(about = "T8030 boot environment builder", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the machine and prime the boot core
    Boot(BootOpts),

    /// List the core implementation registers
    Registers,
}

#[derive(clap::Args, Debug)]
struct BootOpts {
    /// Machine configuration (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Kernel image, overrides the configuration
    #[arg(long)]
    kernel: Option<PathBuf>,

    /// Device tree, overrides the configuration
    #[arg(long)]
    device_tree: Option<PathBuf>,

    /// Trust cache, overrides the configuration
    #[arg(long)]
    trust_cache: Option<PathBuf>,

    /// Ramdisk image
    #[arg(long)]
    ramdisk: Option<PathBuf>,

    /// Kernel command line
    #[arg(long)]
    cmdline: Option<String>,

    /// Boot framebuffer (on/off)
    #[arg(long)]
    framebuffer: Option<String>,

    /// Number of cores (1-6)
    #[arg(long)]
    cpus: Option<usize>,

    /// Guest RAM size, decimal or 0x-prefixed hex
    #[arg(long)]
    ram_size: Option<String>,

    /// Write the fixed-up device tree to this path
    #[arg(long)]
    dump_device_tree: Option<PathBuf>,
}

fn parse_hex_or_dec(s: &str) -> Result<u64> {
    if let Some(hex) = s.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).context("Invalid hex number")
    } else {
        s.parse::<u64>().context("Invalid decimal number")
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Boot(args) => boot(args)?,
        Commands::Registers => show_registers(),
    }

    Ok(())
}

fn machine_config(args: &BootOpts) -> Result<MachineConfig> {
    let mut config = match &args.config {
        Some(path) => MachineConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => MachineConfig::default(),
    };

    if let Some(kernel) = &args.kernel {
        config.kernel = kernel.clone();
    }
    if let Some(device_tree) = &args.device_tree {
        config.device_tree = device_tree.clone();
    }
    if let Some(trust_cache) = &args.trust_cache {
        config.trust_cache = trust_cache.clone();
    }
    if let Some(ramdisk) = &args.ramdisk {
        config.ramdisk = Some(ramdisk.clone());
    }
    if let Some(cmdline) = &args.cmdline {
        config.cmdline = cmdline.clone();
    }
    if let Some(framebuffer) = &args.framebuffer {
        config.framebuffer = framebuffer.clone();
    }
    if let Some(cpus) = args.cpus {
        config.cpus = cpus;
    }
    if let Some(ram_size) = &args.ram_size {
        config.ram_size = parse_hex_or_dec(ram_size)?;
    }

    config.validate().context("Invalid machine configuration")?;
    Ok(config)
}

fn boot(args: BootOpts) -> Result<()> {
    let config = machine_config(&args)?;

    log::info!("Configuration:");
    log::info!("  Kernel:      {}", config.kernel.display());
    log::info!("  Device tree: {}", config.device_tree.display());
    log::info!("  Trust cache: {}", config.trust_cache.display());
    log::info!("  Cores:       {}", config.cpus);
    log::info!("  RAM:         {:#x}", config.ram_size);

    let machine = Machine::from_config(config, Box::new(std::io::stdout()))
        .context("Failed to build machine")?;
    machine.reset();

    if let Some(path) = &args.dump_device_tree {
        std::fs::write(path, machine.device_tree().to_bytes())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        log::info!("Device tree written to {}", path.display());
    }

    print_summary(&machine);
    Ok(())
}

fn print_summary(machine: &Machine) {
    let layout = machine.layout();

    println!("\n{}", "T8030 boot layout".bold().green());
    println!(
        "  {:<18} {:#x} -> {:#x}",
        "Kernel slide".cyan(),
        layout.slide.virt_base,
        layout.slide.phys_base
    );
    for kind in [
        BootRegionKind::RawKernelImage,
        BootRegionKind::TrustCache,
        BootRegionKind::KernelSections,
        BootRegionKind::DeviceTreeBlob,
        BootRegionKind::Ramdisk,
        BootRegionKind::BootArgs,
        BootRegionKind::ExtraScratchData,
    ] {
        match layout.region(kind) {
            Some(region) => println!(
                "  {:<18} {:#012x} - {:#012x} ({:#x})",
                kind.to_string().cyan(),
                region.base,
                region.end(),
                region.size
            ),
            None => println!("  {:<18} {}", kind.to_string().cyan(), "absent".dimmed()),
        }
    }

    println!("\n{}", "Memory".bold());
    println!("  DRAM:        {:#x} + {:#x}", layout.dram_base, layout.dram_size);
    println!("  Blob usage:  {:#x}", layout.used_ram_for_blobs);
    println!("  Top of data: {:#x}", layout.top_of_kernel_data_pa);
    println!("  SoC base:    {:#x}", machine.soc_base());
    println!("  Console:     {:#x}", machine.uart_base());

    let entry = machine.boot_core().entry_state();
    println!("\n{}", "Boot core".bold());
    println!("  pc = {:#x}", entry.pc);
    println!("  x0 = {:#x}", entry.x0);
    println!(
        "\n{} {} kernel patches applied",
        "✅".green(),
        T8030_KERNEL_PATCHES.len()
    );
}

fn show_registers() {
    println!("{}", "T8030 core implementation registers".bold().green());
    let bank = RegisterBank::new(T8030_CORE_REGISTERS);
    for (index, def) in bank.definitions().iter().enumerate() {
        println!(
            "  {:#06x}  {:<18} {:<22} reset {:#x}",
            index as u64 * MMIO_REG_STRIDE,
            def.name,
            def.key.to_string(),
            bank.read_index(index).unwrap_or(def.reset)
        );
    }
}
