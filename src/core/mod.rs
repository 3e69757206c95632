pub mod error;
pub mod model;

pub use error::{ActionError, Result};
pub use model::{Actor, Model, ModelKey};
