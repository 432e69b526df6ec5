// src/lib.rs

pub mod bag;
pub mod config;
pub mod frame;
pub mod logging;
pub mod msg;
pub mod table;
pub mod workflow;

#[cfg(test)]
pub(crate) mod test_util;
