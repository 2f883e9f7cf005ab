//! Safe SQL builder: identifiers from model descriptions only, values as parameters.

mod builder;
pub mod params;
pub use builder::*;
pub use params::*;
