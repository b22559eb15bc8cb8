pub mod assignment;
pub mod audit;
pub mod booking;
pub mod outbox;
pub mod provider;
pub mod request;
