//! Convenient re-exports for consumers of the gate crate.
//!
//! ```
//! use warden_gate::prelude::*;
//! ```

pub use crate::{
    ApprovalChannel, BroadcastApprovalChannel, GateError, GateOutcome, GateResult, GateService,
    GateSettings, SocketListener, serve_gate, serve_supervisor,
};
