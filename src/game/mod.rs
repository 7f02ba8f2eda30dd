pub mod entity;
pub mod registry;
pub mod scheduler;
pub mod spatial;
