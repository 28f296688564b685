pub mod props;
pub mod store;

pub use props::{PropKind, PropValue, PropertyBag};
pub use store::{
    EntityRecord, GraphCounts, GraphStore, Neighborhood, RelationRecord, StoreReport,
};
