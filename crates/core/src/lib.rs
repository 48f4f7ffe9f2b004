//! Decoy Core
//!
//! Test doubles and virtual time:
//! - Spies observe calls to an object's member without changing behaviour
//! - Stubs record calls and decide their outcome through a replacement policy
//! - A virtual clock replaces the ambient time source and its timers
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Sandbox (one per test)                                       │
//! │   ├── spy(obj, name) / stub(obj, name) ──► Registry          │
//! │   │         └── wrapper ─► Recorder ◄── Calls (queries)      │
//! │   │                  └─► Policy (stubs) ─► original          │
//! │   ├── clock(start) ──► VirtualClock ⇄ TimeSource             │
//! │   ├── alias("@foo")                                          │
//! │   └── test_finished() ──► restore_all()                      │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod alias;
pub mod clock;
pub mod config;
pub mod error;
pub mod interceptor;
pub mod member;
pub mod policy;
pub mod query;
pub mod recorder;
pub mod registry;
pub mod sandbox;
pub mod target;
pub mod time;

// Re-export commonly used types
pub use alias::{Alias, Aliases};
pub use clock::{ClockHandle, PendingTimer, VirtualClock};
pub use config::{DecoyConfig, MissingMember};
pub use error::{Error, Result, RestoreFailure, Thrown};
pub use interceptor::{Handle, OnCall, Spy, Stub};
pub use member::{CallResult, Invocation, Member};
pub use policy::Policy;
pub use query::{ArgMatcher, Calls, ValueKind};
pub use recorder::{CallLog, CallOutcome, CallRecord, Recorder};
pub use registry::Registry;
pub use sandbox::{Sandbox, ScopeListener};
pub use target::{Object, Target};
pub use time::{SystemTime, TimeProvider, TimeSource, TimerCallback, TimerId};

/// Decoy version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
