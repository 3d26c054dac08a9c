pub mod coordinator;
pub mod feed;
pub mod provider;

pub use coordinator::{AgentCoordinator, CoordinatorConfig, CoordinatorError, JobPage};
pub use feed::{JobFeed, SubscriberId};
pub use provider::{AgentProvider, ProviderError, SimulatedProvider};
