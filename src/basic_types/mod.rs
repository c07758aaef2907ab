mod domain;
mod keyed_vec;
mod sparse_bitset;

pub use domain::ClosedInterval;
pub use domain::Domain;
pub use keyed_vec::KeyedVec;
pub use keyed_vec::StorageKey;
pub(crate) use sparse_bitset::SparseBitset;
