//! General utility modules.

pub mod file;
pub mod httpclient;
