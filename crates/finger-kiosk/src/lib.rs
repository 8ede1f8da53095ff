pub mod cli;
pub mod config;
pub mod console;
pub mod controller;
pub mod flags;
pub mod operations;
pub mod panel;
pub mod screens;
