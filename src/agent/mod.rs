//! Agent role: connection actor, session store, and the tool-calling loop.

pub mod connection;
pub mod session_store;
pub mod turn;

pub use connection::{AgentConnection, AgentContext, ConnectionState};
pub use session_store::SessionStore;
pub use turn::{AgentLoop, TurnOutcome, UpdateSink};
