// src/models/mod.rs
pub mod actor;
pub mod driver;
pub mod messages;
pub mod passenger;
pub mod rating;
pub mod ride;

pub use actor::*;
pub use driver::*;
pub use messages::*;
pub use passenger::*;
pub use rating::*;
pub use ride::*;
