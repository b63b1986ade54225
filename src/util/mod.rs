pub mod cli;
pub mod context;
pub mod hash;
pub mod random;
