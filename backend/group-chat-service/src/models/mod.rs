pub mod group;
pub mod message;
pub mod requests;

pub use group::*;
pub use message::*;
pub use requests::*;
