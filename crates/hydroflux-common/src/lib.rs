pub mod calendar;
pub mod error;
pub mod method;
pub mod timedomain;

pub use calendar::*;
pub use error::*;
pub use method::*;
pub use timedomain::*;
