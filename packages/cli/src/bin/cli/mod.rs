pub mod instance;
pub mod session;
