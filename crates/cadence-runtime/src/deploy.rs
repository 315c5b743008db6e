//! In-process deployment
//!
//! A parent program declares the deployment tables with
//! [`declare_deployment`]; [`LocalDeployer::deploy`] starts children in the
//! current process and publishes their addresses to the parent.

use tracing::info;

use cadence_core::{tuple, CadenceResult, Schema};

use crate::{Instance, InstanceOptions, Program, ProgramBuilder};

/// Number of children requested
pub const NODE_COUNT: &str = "node_count";
/// `[index] => [address]` of each child
pub const NODE: &str = "node";
/// Holds `[true]` once every child is running
pub const NODE_READY: &str = "node_ready";

/// Declare the tables a deploying parent reads.
pub fn declare_deployment(builder: &mut ProgramBuilder) -> CadenceResult<()> {
    builder
        .table(NODE_COUNT, Schema::keys(["num"]))?
        .table(NODE, Schema::new(["index"], ["address"]))?
        .table(NODE_READY, Schema::keys(["ready"]))?;
    Ok(())
}

/// Runs child instances in the current process
#[derive(Default)]
pub struct LocalDeployer {
    children: Vec<Instance>,
}

impl LocalDeployer {
    pub fn new() -> Self {
        LocalDeployer::default()
    }

    /// Start one child in the background and return its address.
    pub async fn spawn(&mut self, program: Program, options: InstanceOptions) -> CadenceResult<String> {
        let mut child = Instance::bind(program, options).await?;
        child.run_bg();
        let addr = child.local_addr().to_string();
        self.children.push(child);
        Ok(addr)
    }

    /// Start `count` children and publish them into `parent`.
    pub async fn deploy(
        &mut self,
        parent: &Instance,
        program: &Program,
        count: usize,
        options: InstanceOptions,
    ) -> CadenceResult<Vec<String>> {
        let mut addrs = Vec::with_capacity(count);
        for _ in 0..count {
            addrs.push(self.spawn(program.clone(), options.clone()).await?);
        }

        let published = addrs.clone();
        parent.async_do(move |engine| {
            engine.insert_next(NODE_COUNT, tuple![published.len() as i64])?;
            for (index, addr) in published.iter().enumerate() {
                engine.insert_next(NODE, tuple![index as i64, addr])?;
            }
            engine.insert_next(NODE_READY, tuple![true])
        })?;

        info!(parent = %parent.local_addr(), children = count, "deployed");
        Ok(addrs)
    }

    pub fn children(&self) -> &[Instance] {
        &self.children
    }

    pub fn addresses(&self) -> Vec<String> {
        self.children
            .iter()
            .map(|c| c.local_addr().to_string())
            .collect()
    }

    /// Stop every child.
    pub async fn shutdown(&mut self) -> CadenceResult<()> {
        for mut child in self.children.drain(..) {
            child.stop().await?;
        }
        Ok(())
    }
}
