//! Small services the GPU layer consumes: path hashing for cache file names,
//! process-unique ids and polling file modification watches.

pub mod file_watch;
pub mod hash;
pub mod uuid;

pub use file_watch::{file_time, FileTime, FileWatch};
pub use hash::{hash64, path_hash};
pub use uuid::next_uuid;
