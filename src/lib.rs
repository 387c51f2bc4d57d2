pub mod ast;
pub mod catalog;
pub mod config;
pub mod db;
pub mod explain;
pub mod export;
pub mod service;
pub mod spec;
