//! Contract-request form model: schema, typed values, and the mergeable
//! form state shared by every pipeline stage.

pub mod schema;
pub mod state;
pub mod value;

pub use schema::*;
pub use state::*;
pub use value::*;
