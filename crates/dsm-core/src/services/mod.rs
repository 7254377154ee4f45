pub mod config_loader;
pub mod engine;
pub mod ports;
pub mod registry;
pub mod service_manager;
pub mod supervisor;
pub mod tmux;
