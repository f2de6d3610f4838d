//! Error taxonomy for the simulator, matching the kinds named in the
//! governing spec's error-handling design: config errors and invariant
//! violations are fatal at the boundaries named below; oracle divergence
//! and transient agent errors degrade in place and are only ever
//! constructed by the caller that immediately logs and continues.

use crate::types::Fork;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("config error: {0}")]
    Config(String),

    #[error("invariant violation on {fork}: {detail}")]
    InvariantViolation { fork: Fork, detail: String },

    #[error("agent {agent_id} raised a transient error: {detail}")]
    TransientAgent { agent_id: String, detail: String },

    #[error("oracle divergence on {fork}: {field} produced a non-finite value, clamped to {clamped_to}")]
    OracleDivergence {
        fork: Fork,
        field: String,
        clamped_to: f64,
    },

    #[error("reunion timed out after {elapsed}s with {unconverged} node(s) unconverged")]
    ReunionTimeout { elapsed: f64, unconverged: usize },

    #[error("external IO error writing {path}: {source}")]
    ExternalIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl SimError {
    pub fn config(msg: impl Into<String>) -> Self {
        SimError::Config(msg.into())
    }

    /// Process exit code per the CLI surface: 0 success is handled by the
    /// caller, 1 for any fatal error, 2 specifically for reunion timeout.
    pub fn exit_code(&self) -> i32 {
        match self {
            SimError::ReunionTimeout { .. } => 2,
            _ => 1,
        }
    }
}

pub type SimResult<T> = Result<T, SimError>;
