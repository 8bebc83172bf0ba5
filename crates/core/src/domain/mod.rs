pub mod comparison;
pub mod metadata;
pub mod stats;
pub mod sync;
