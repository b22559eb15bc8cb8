pub mod assignment;
pub mod auto_assign;
pub mod candidates;
pub mod outbox;
pub mod pending;
pub mod scoring;
pub mod settings;
pub mod stats;
