pub mod collection;
pub mod error;
pub mod id;
pub mod operation;
pub mod record;

pub use collection::*;
pub use error::*;
pub use id::*;
pub use operation::*;
pub use record::*;
