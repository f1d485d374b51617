pub mod countdown;
pub mod viewer_session;
