// crates/core/src/yielder/mod.rs
//
// The three yielder layers, each building on the last: plain file-list
// traversal, shuffled traversal, and shuffled-and-decoded batches.

pub mod basic;
pub mod parsed;
pub mod randomized;

pub use basic::BasicYielder;
pub use parsed::ParsedRandomizedYielder;
pub use randomized::RandomizedYielder;
