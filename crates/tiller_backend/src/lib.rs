mod env;
mod error;
mod services;
mod sqlite_store;

pub use error::AdapterError;
pub use services::{CliAgentService, EventSink, RunTurnRequest, SendOutcome, WorkspaceAgentService};
pub use sqlite_store::SqliteStore;
