pub mod config;
pub mod dispatcher;
pub mod traits;
pub mod whatsapp;

pub use config::*;
pub use dispatcher::*;
pub use traits::*;
pub use whatsapp::*;
