//! Router node — pure control flow.
//!
//! Evaluates each emission's template condition against context and emits
//! every truthy one; unconditioned emissions always fire. Routers never
//! mutate context and never call external services. Plain-text conditions
//! are rejected at load time, so by the time a router runs, every
//! condition it holds is a template.

use async_trait::async_trait;

use super::{evaluate_template_emissions, NodeHandler};
use crate::dispatcher::Activation;
use crate::errors::NodeError;
use crate::template::View;
use crate::types::NodeConfig;

pub(crate) struct RouterNode;

#[async_trait]
impl NodeHandler for RouterNode {
    async fn run(
        &self,
        activation: &mut Activation<'_>,
        config: &NodeConfig,
    ) -> Result<(), NodeError> {
        let view = View::new(activation.context());
        let signals = evaluate_template_emissions(&config.event_emissions, &view)?;
        activation.emit_all(signals);
        Ok(())
    }
}
