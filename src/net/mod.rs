pub mod input;
pub mod outbox;
pub mod session;
pub mod view;
pub mod wire;
