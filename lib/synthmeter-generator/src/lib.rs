//! Synthetic telemetry generation.
//!
//! This crate holds the event-generation and fan-out pipeline used by `synthmeter`: value samplers that synthesize
//! metric values under optional bound/violation semantics, an event builder that turns each catalog operation into
//! traffic samples, agent metrics and request/response metering events, and a single-producer driver that hands
//! those events to one sink worker per delivery channel.
//!
//! Every external collaborator (bulk storage, metric agent, metering and exchange reporters) is modeled as a trait in
//! [`sink`], so the pipeline can be exercised end-to-end against the in-memory implementations in [`sink::memory`].
#![deny(missing_docs)]

pub mod builder;
pub mod catalog;
pub mod driver;
pub mod event;
pub mod sampler;
pub mod sink;

/// A type-erased error.
///
/// Used at the boundary with external collaborators, where the concrete error type is owned by the client library.
pub type GenericError = anyhow::Error;
