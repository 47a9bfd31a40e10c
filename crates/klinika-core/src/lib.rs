pub mod config;
pub mod conflict;
pub mod error;
pub mod handler;
pub mod insight;
pub mod notifier;
pub mod runs;
pub mod sender;
pub mod threads;

pub use config::*;
pub use conflict::*;
pub use error::*;
pub use handler::*;
pub use insight::*;
pub use notifier::*;
pub use runs::*;
pub use sender::*;
pub use threads::*;

#[cfg(test)]
pub(crate) mod testutil;
