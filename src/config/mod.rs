pub mod model;
pub mod settings;
pub mod validator;

pub use model::*;
pub use settings::*;
pub use validator::*;
