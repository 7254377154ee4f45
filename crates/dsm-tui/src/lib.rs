pub mod app;
pub mod cli;
pub mod event;
pub mod keys;
pub mod ui;
