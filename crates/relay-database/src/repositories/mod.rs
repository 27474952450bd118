//! sqlx implementations of the outbox and membership stores.

pub mod membership;
pub mod outbox;

pub use membership::MembershipRepository;
pub use outbox::OutboxRepository;
