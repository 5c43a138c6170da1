pub mod envelope;
pub mod messages;

pub use envelope::*;
pub use messages::*;
