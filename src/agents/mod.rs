//! Persona agents and the flows that drive them.
//!
//! - `parser`: the `Thought:` / `Action:` / `Action Input:` reply grammar
//! - `tools`: calendar tool catalog and dispatcher
//! - `persona`: persona profiles and their chat sessions
//! - `react`: the single-agent think/act/observe loop
//! - `listing`: direct schedule readout without a model call
//! - `oracle`: multi-agent opinions merged into one answer
//! - `orchestrator`: per-session routing and history

pub mod listing;
pub mod oracle;
pub mod orchestrator;
pub mod parser;
pub mod persona;
pub mod react;
pub mod tools;
