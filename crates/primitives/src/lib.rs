pub mod hash;
pub mod object;
pub mod progress;
pub mod repo;
