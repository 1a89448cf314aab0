pub mod control_message;
pub mod session;
