pub mod agent_callback;
pub mod auth;
pub mod conversations;
pub mod health;
pub mod messages;
