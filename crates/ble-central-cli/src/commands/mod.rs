pub mod common;
pub mod read;
pub mod scan;
pub mod services;
pub mod watch;
