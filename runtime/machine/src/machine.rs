//! Machine construction and reset

use std::io::{ErrorKind, Write};
use std::sync::Arc;

use t8030_boot_layout::{
    BootArgs, BootLayout, Collaborators, ImageInspector, KernelLoader, LayoutBuilder,
    RawFileLoader, BOOT_ARGS_SIZE,
};
use t8030_cpu::{create_cores, t8030_clusters, Cluster, CpuCore, IMPL_WINDOW_SIZE};
use t8030_devicetree::{DeviceTree, DeviceTreeError};
use t8030_guest_memory::{GuestAddressSpace, GuestMemory};

use crate::host::{HostFileLoader, MachOLoader};
use crate::uart::{S3cUart, S3C_UART_SIZE};
use crate::{MachineConfig, MachineError, Result};

/// Hook run after every core has been reset
pub type ResetHandler = Box<dyn Fn(&[Arc<CpuCore>]) + Send + Sync>;

static MACHO_LOADER: MachOLoader = MachOLoader;
static HOST_FILE_LOADER: HostFileLoader = HostFileLoader;

/// Image and file loaders used to build the boot layout
#[derive(Clone, Copy)]
pub struct BootLoaders<'a> {
    pub inspector: &'a dyn ImageInspector,
    pub raw_loader: &'a dyn RawFileLoader,
    pub kernel_loader: &'a dyn KernelLoader,
}

impl BootLoaders<'static> {
    /// Mach-O kernel loading and memory-mapped host files
    pub fn host() -> Self {
        Self {
            inspector: &MACHO_LOADER,
            raw_loader: &HOST_FILE_LOADER,
            kernel_loader: &MACHO_LOADER,
        }
    }
}

/// An assembled T8030 guest, ready for its first reset
pub struct Machine {
    config: MachineConfig,
    memory: GuestAddressSpace,
    device_tree: DeviceTree,
    layout: BootLayout,
    cores: Vec<Arc<CpuCore>>,
    clusters: [Cluster; 2],
    soc_base: u64,
    uart_base: u64,
    firmware_loaded: bool,
    reset_handlers: Vec<ResetHandler>,
}

impl Machine {
    /// Build the machine described by `config`
    ///
    /// # Arguments
    /// * `config` - Validated machine configuration
    /// * `loaders` - Kernel and raw-file loaders
    /// * `console` - Sink receiving bytes written to the boot UART
    ///
    /// # Errors
    /// Any failure aborts construction: configuration, device tree lookups,
    /// CPU setup, layout placement or guest memory mapping.
    pub fn new(
        config: MachineConfig,
        loaders: BootLoaders<'_>,
        console: Box<dyn Write + Send>,
    ) -> Result<Self> {
        config.validate()?;
        let mut memory = GuestAddressSpace::new();

        let mut device_tree = load_device_tree(&config)?;
        let soc_base = soc_base(&device_tree)?;
        log::info!("SoC base {:#x}", soc_base);

        // CPU setup
        let cores = create_cores(config.cpus)?;
        for core in &cores {
            memory.map_mmio(
                &format!("cpu{}-impl-reg", core.id()),
                core.mmio_base(),
                IMPL_WINDOW_SIZE,
                core.window(),
            )?;
        }
        let clusters = t8030_clusters();
        for cluster in &clusters {
            memory.map_mmio(
                &format!("cpm{}-impl-reg", cluster.id()),
                cluster.mmio_base(),
                IMPL_WINDOW_SIZE,
                cluster.window(),
            )?;
        }
        log::info!("Created {} cores and {} clusters", cores.len(), clusters.len());

        // Memory setup
        let sources = config.boot_sources();
        let layout_config = config.layout_config();
        let mut collab = Collaborators {
            inspector: loaders.inspector,
            raw_loader: loaders.raw_loader,
            kernel_loader: loaders.kernel_loader,
            device_tree: &mut device_tree,
        };
        let layout = LayoutBuilder::new(&sources, &layout_config).build(&mut collab, &mut memory)?;

        // Console
        let (uart_offset, uart_size) = boot_console(&device_tree)?;
        let uart_base = soc_base
            .checked_add(uart_offset)
            .ok_or_else(|| MachineError::Config("UART base overflows".into()))?;
        memory.map_mmio("uart0", uart_base, uart_size, Arc::new(S3cUart::new(console)))?;
        log::info!("Boot console at {:#x}", uart_base);

        let mut machine = Self {
            config,
            memory,
            device_tree,
            layout,
            cores,
            clusters,
            soc_base,
            uart_base,
            firmware_loaded: true,
            reset_handlers: Vec::new(),
        };

        let entry = machine.layout.kernel_entry_pa;
        let boot_args = machine.layout.boot_args_pa;
        machine.register_reset(Box::new(move |cores: &[Arc<CpuCore>]| {
            if let Some(boot_core) = cores.first() {
                boot_core.set_entry(entry, boot_args);
            }
        }));

        Ok(machine)
    }

    /// Build the machine with the host loaders
    pub fn from_config(config: MachineConfig, console: Box<dyn Write + Send>) -> Result<Self> {
        Self::new(config, BootLoaders::host(), console)
    }

    /// Add a handler run, in registration order, at every reset
    pub fn register_reset(&mut self, handler: ResetHandler) {
        self.reset_handlers.push(handler);
    }

    /// Reset every core, then run the reset handlers
    pub fn reset(&self) {
        for core in &self.cores {
            core.reset();
        }
        for handler in &self.reset_handlers {
            handler(&self.cores);
        }

        let entry = self.boot_core().entry_state();
        log::info!("Reset: core 0 pc {:#x} x0 {:#x}", entry.pc, entry.x0);
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn memory(&self) -> &GuestAddressSpace {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut GuestAddressSpace {
        &mut self.memory
    }

    pub fn layout(&self) -> &BootLayout {
        &self.layout
    }

    /// Device tree as handed to the kernel
    pub fn device_tree(&self) -> &DeviceTree {
        &self.device_tree
    }

    pub fn cores(&self) -> &[Arc<CpuCore>] {
        &self.cores
    }

    /// The core started by the reset handler
    pub fn boot_core(&self) -> &Arc<CpuCore> {
        &self.cores[0]
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    pub fn soc_base(&self) -> u64 {
        self.soc_base
    }

    pub fn uart_base(&self) -> u64 {
        self.uart_base
    }

    pub fn firmware_loaded(&self) -> bool {
        self.firmware_loaded
    }

    /// Decode the boot arguments back out of guest memory
    pub fn boot_args(&self) -> Result<BootArgs> {
        let mut buf = [0u8; BOOT_ARGS_SIZE];
        self.memory.read(self.layout.boot_args_pa, &mut buf)?;
        BootArgs::decode(&buf)
            .ok_or_else(|| MachineError::MissingResource("boot arguments".into()))
    }
}

fn load_device_tree(config: &MachineConfig) -> Result<DeviceTree> {
    let path = &config.device_tree;
    let data = std::fs::read(path).map_err(|source| {
        if source.kind() == ErrorKind::NotFound {
            MachineError::MissingResource(path.display().to_string())
        } else {
            MachineError::Io {
                path: path.clone(),
                source,
            }
        }
    })?;
    let tree = DeviceTree::parse(&data)?;
    log::info!("Loaded device tree {} ({:#x} bytes)", path.display(), data.len());
    Ok(tree)
}

/// SoC physical base from `arm-io/ranges[1]`
fn soc_base(tree: &DeviceTree) -> Result<u64> {
    let ranges = tree
        .node("arm-io")
        .ok()
        .and_then(|node| node.property("ranges"))
        .ok_or_else(|| MachineError::MissingResource("arm-io ranges".into()))?;
    let base = ranges.u64_at(1).ok_or_else(|| DeviceTreeError::InvalidProperty {
        property: "ranges".into(),
        reason: format!("{} bytes, need at least 16", ranges.len()),
    })?;
    Ok(base)
}

/// Offset and size of the boot console UART below the SoC base
fn boot_console(tree: &DeviceTree) -> Result<(u64, u64)> {
    let uart = tree
        .node("arm-io/uart0")
        .map_err(|_| MachineError::MissingResource("arm-io/uart0".into()))?;
    if uart.property("boot-console").is_none() {
        return Err(MachineError::MissingResource(
            "arm-io/uart0 boot-console".into(),
        ));
    }
    let reg = uart
        .property("reg")
        .ok_or_else(|| MachineError::MissingResource("arm-io/uart0 reg".into()))?;
    let offset = reg
        .u64_at(0)
        .ok_or_else(|| MachineError::MissingResource("arm-io/uart0 reg".into()))?;
    let size = reg
        .u64_at(1)
        .filter(|&size| size != 0)
        .unwrap_or(S3C_UART_SIZE);
    Ok((offset, size))
}
