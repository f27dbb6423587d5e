//! Reader and registry configuration

pub mod null_handling;
pub mod registry_config;
pub mod table_config;

pub use null_handling::*;
pub use registry_config::*;
pub use table_config::*;
