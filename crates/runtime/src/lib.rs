// rsm-runtime: lifecycle core for language runtime sessions
//
// Providers plug in through `SessionManager`; the UI layer talks to
// `RuntimeSessionService`.

pub mod config;
pub mod directory;
pub mod error;
pub mod event;
pub mod fake;
pub mod managers;
pub mod queue;
pub mod registry;
pub mod service;
pub mod session;
pub mod wait;

pub use config::{DEFAULT_LIFECYCLE_TIMEOUT_MS, SessionServiceConfig};
pub use directory::{SessionDirectory, TargetKey};
pub use error::{ConfigError, Error, Result};
pub use event::{Emitter, Subscription};
pub use managers::ManagerRegistry;
pub use queue::RequestQueue;
pub use registry::RuntimeRegistry;
pub use rsm_protocol as protocol;
pub use service::{RuntimeSessionService, RuntimeStateChange, SessionEnded, StartSessionRequest, WillStartSession};
pub use session::{RuntimeSession, SessionHandle, SessionManager};
pub use wait::{WaitError, wait_for_exit, wait_for_state, wait_for_state_change};
