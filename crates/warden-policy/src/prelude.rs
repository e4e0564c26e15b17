//! Convenient re-exports for consumers of the policy crate.
//!
//! ```
//! use warden_policy::prelude::*;
//! ```

pub use crate::{
    ApprovalScope, EvaluatorConfig, GateRequest, HeuristicMode, HeuristicSettings, PathContext,
    PolicyDecision, PolicyError, PolicyEvaluator, PolicyResult, PolicyRule, RuleScope,
    RuleSource, RuleStore, ToolInput,
};
