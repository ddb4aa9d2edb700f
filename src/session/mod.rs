//! # Participant Sessions
//!
//! Server-side state for connected participants.
//!
//! ## Components
//! - **Participant**: per-connection pairing state and message quota, plus the
//!   handle and command queue other connections use to reach it
//! - **Registry**: the shared identifier-to-session directory
//! - **Worker**: the task that owns one connection from handshake to teardown
//!
//! ## Concurrency
//! The registry is the only structure shared between workers. A session is
//! mutated solely by its own worker; cross-session effects travel as
//! [`SessionCommand`]s over a bounded queue.

pub mod participant;
pub mod registry;
pub mod worker;

pub use participant::{ParticipantSession, Quota, SessionCommand, SessionHandle};
pub use registry::Registry;
pub use worker::run_session;
