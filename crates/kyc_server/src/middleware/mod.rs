pub mod jwt;
pub mod session_guard;
