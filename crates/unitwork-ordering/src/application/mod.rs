//! Application services for the Ordering context.

pub mod command_handlers;
pub mod message_handlers;
pub mod transactional;
