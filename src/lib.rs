pub mod agents;
pub mod calendar;
pub mod chat;
pub mod cli;
pub mod config;
pub mod conversation;
pub mod doctor;
pub mod error;
pub mod guardrail;
pub mod llm;
pub mod profiles;
pub mod provider;
pub mod runner;
pub mod server;
pub mod session;
pub mod streaming;
pub mod telemetry;
pub mod theme;
pub mod workflow;

#[cfg(test)]
mod tests;
