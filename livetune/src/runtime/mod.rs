pub mod process;
pub mod storage;
pub mod transport;

pub use process::*;
pub use storage::*;
pub use transport::*;
