//! Agent Traits
//!
//! Common traits implemented by analysis agents.

use async_trait::async_trait;

use crate::contracts::AgentIdentity;

/// An analysis agent: validated input in, structured output out.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Input type for this agent
    type Input: Clone + Send + Sync;

    /// Output type for this agent
    type Output: Clone + Send + Sync;

    /// Error type for this agent
    type Error: std::error::Error + Send + Sync;

    /// Get the agent's identity.
    fn identity(&self) -> &AgentIdentity;

    /// Get the agent's version.
    fn version(&self) -> &str {
        &self.identity().version
    }

    /// Get the agent's ID.
    fn agent_id(&self) -> &str {
        &self.identity().id
    }

    /// Validate input according to contracts.
    fn validate_input(&self, input: &Self::Input) -> Result<(), Self::Error>;

    /// Execute the agent's core logic.
    async fn execute(&self, input: Self::Input) -> Result<Self::Output, Self::Error>;

    /// Full invocation cycle: validate, then execute.
    async fn invoke(&self, input: Self::Input) -> Result<Self::Output, Self::Error> {
        self.validate_input(&input)?;
        self.execute(input).await
    }
}
