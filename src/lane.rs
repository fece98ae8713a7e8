//! Wiring of the lane's components from a [`LaneConfig`].

use std::sync::Arc;

use crate::advisory::{CodeAdvisor, NoAdvisor};
use crate::build::BuildOrchestrator;
use crate::config::LaneConfig;
use crate::device::{DeviceLocator, PortEnumerator, SystemPorts};
use crate::flash::FlashOrchestrator;
use crate::process::{ProcessRunner, ToolRunner};
use crate::toolchain::ToolchainManager;

/// One process's toolchain, build and flash components.
pub struct Lane {
    config: LaneConfig,
    toolchain: Arc<ToolchainManager>,
    builds: BuildOrchestrator,
    flashes: FlashOrchestrator,
    advisor: Box<dyn CodeAdvisor>,
}

impl Lane {
    /// Lane driving real processes and serial ports.
    pub fn from_config(config: LaneConfig) -> Self {
        let runner = Arc::new(ProcessRunner::new(config.timeouts.termination_grace()));
        Self::new(config, runner, Box::new(SystemPorts))
    }

    pub fn new(config: LaneConfig, runner: Arc<dyn ToolRunner>, ports: Box<dyn PortEnumerator>) -> Self {
        let toolchain = Arc::new(ToolchainManager::new(
            config.toolchain.clone(),
            config.timeouts,
            Arc::clone(&runner),
        ));
        let builds = BuildOrchestrator::new(
            config.build_root.clone(),
            config.toolchain.clone(),
            config.timeouts,
            Arc::clone(&toolchain),
            Arc::clone(&runner),
        );
        let flashes = FlashOrchestrator::new(
            config.build_root.clone(),
            config.flasher.clone(),
            config.timeouts,
            DeviceLocator::new(&config.devices, ports),
            runner,
        );
        Self {
            config,
            toolchain,
            builds,
            flashes,
            advisor: Box::new(NoAdvisor),
        }
    }

    /// Replace the code reviewer.
    pub fn with_advisor(mut self, advisor: Box<dyn CodeAdvisor>) -> Self {
        self.advisor = advisor;
        self
    }

    pub fn config(&self) -> &LaneConfig {
        &self.config
    }

    pub fn toolchain(&self) -> &Arc<ToolchainManager> {
        &self.toolchain
    }

    pub fn builds(&self) -> &BuildOrchestrator {
        &self.builds
    }

    pub fn flashes(&self) -> &FlashOrchestrator {
        &self.flashes
    }

    pub fn advisor(&self) -> &dyn CodeAdvisor {
        self.advisor.as_ref()
    }
}
