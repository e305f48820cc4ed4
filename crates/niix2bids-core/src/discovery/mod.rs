pub mod filesystem;
pub mod loader;
pub mod probe;
