//! Persistence boundary: audit snapshots handed off without blocking the core.

pub mod audit;

pub use audit::{AuditEvent, AuditRecord, AuditSink, ChannelAuditSink, NullAuditSink};
