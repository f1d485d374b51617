pub mod console_handle;
pub mod console_session;
