pub mod control;
pub mod framework;
pub mod guest;
pub mod host;
pub mod prelude;
pub mod protocol;
pub mod runtime;

pub use framework::logging::init_logger;
pub use guest::Guest;
pub use host::Host;
