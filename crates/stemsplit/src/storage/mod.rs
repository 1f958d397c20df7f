pub mod filesystem;

pub use filesystem::JobStorage;
