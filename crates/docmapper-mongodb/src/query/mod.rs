//! Filter, projection and update construction

pub mod node;
pub mod operators;
pub mod projection;
pub mod transform;
pub mod update;

pub use node::Q;
pub use operators::{MatchMode, OperatorRegistry, QueryOperator};
pub use projection::{FieldSpec, LoweredProjection, Projection, Slice};
pub use transform::{resolve_key, resolve_path, transform_query, ResolvedKey};
pub use update::Update;
