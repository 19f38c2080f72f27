// Configuration module
//
// - types: the application configuration structure and its forgiving deserializers
// - loader: configuration file loading and saving

pub mod loader;
pub mod types;

pub use types::AppConfig;
