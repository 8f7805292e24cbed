// Lifecycle Automation Engine
//
// Turns discrete organizational events (joined, left, moved, updated,
// invite accepted) into chains of side-effecting actions: template
// assignment, signature deployment, notifications, webhooks.

pub mod config;
pub mod deployment;
pub mod disclaimers;
pub mod error;
pub mod events;
pub mod executor;
pub mod matcher;
pub mod providers;
pub mod runner;
pub mod store;
pub mod webhook;


pub use config::EngineConfig;
pub use deployment::DeploymentPipeline;
pub use disclaimers::DisclaimerResolver;
pub use error::{EngineError, EngineResult};
pub use events::EventLog;
pub use executor::{ActionContext, ActionExecutor};
pub use matcher::WorkflowMatcher;
pub use providers::{MailProviderApi, ProviderAccess, ProviderAuth};
pub use providers::tokens::{TokenLifecycleManager, TokenRefresher, TokenSet};
pub use runner::WorkflowRunner;
pub use webhook::WebhookExecutor;
