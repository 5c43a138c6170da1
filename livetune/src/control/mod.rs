pub mod observers;
pub mod schema;
pub mod schema_watch;
pub mod value;

pub use observers::*;
pub use schema::*;
pub use schema_watch::*;
pub use value::*;
