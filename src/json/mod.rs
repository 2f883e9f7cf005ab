//! JSON output: lazily parsed values, structural merge, pretty printing, and push-down projection.

mod merge;
mod pretty;
mod projector;
mod value;

pub use merge::merge;
pub use pretty::pretty_print;
pub use projector::{id_key, missing_ids, JsonProjector, RowShape};
pub use value::JsonValue;
