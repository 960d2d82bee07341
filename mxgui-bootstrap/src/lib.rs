//! mxgui-bootstrap library interface
//!
//! Brings up MXGUI host appliances for a fleet of mixing consoles: probes
//! every inventory mixer, backs up the live ones, writes the gui_hosts
//! fragments for each appliance image and imports it into the hypervisor.
//!
//! Everything a run needs is carried by [`RunContext`]; the binary builds
//! the production context, tests build one around fakes.

pub mod error;
pub mod pipeline;
pub mod services;

pub use crate::error::{BootstrapError, BootstrapResult};
pub use crate::pipeline::BootstrapPipeline;

use mxgui_common::{BootstrapConfig, Inventory, RunReport};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::services::{CommandRunner, FtpConnector, ProcessRunner, TransferConnector};

/// State shared by every phase of one run
#[derive(Clone)]
pub struct RunContext {
    pub config: BootstrapConfig,
    pub inventory: Arc<Inventory>,
    /// Hypervisor command boundary
    pub runner: Arc<dyn CommandRunner>,
    /// Backup transfer boundary
    pub connector: Arc<dyn TransferConnector>,
    /// Cancels in-flight probes and transfers and skips provisioning
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new(
        config: BootstrapConfig,
        inventory: Inventory,
        runner: Arc<dyn CommandRunner>,
        connector: Arc<dyn TransferConnector>,
    ) -> Self {
        Self {
            config,
            inventory: Arc::new(inventory),
            runner,
            connector,
            cancel: CancellationToken::new(),
        }
    }

    /// Context talking to the real hypervisor tool and FTP servers
    pub fn production(config: BootstrapConfig, inventory: Inventory) -> Self {
        let connector = Arc::new(FtpConnector::from_config(&config.transfer));
        Self::new(config, inventory, Arc::new(ProcessRunner::new()), connector)
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Load the inventory file named by `config`
pub fn load_inventory(config: &BootstrapConfig) -> BootstrapResult<Inventory> {
    Ok(Inventory::load(&config.inventory_path())?)
}

/// Run the whole bootstrap with `ctx`
pub async fn run(ctx: RunContext) -> BootstrapResult<RunReport> {
    BootstrapPipeline::new(ctx).run().await
}
