#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod blueprint;
mod core;
mod engine;
mod error;
mod node;
mod storage;
mod utils;

pub use crate::blueprint::{Blueprint, BuildGraph, NodeDef};
pub use crate::core::{Completion, Mode};
pub use crate::engine::{Diagnostics, Entry, Journal, NodeExecution, Runner, Status};
pub use crate::error::*;
pub use crate::node::{Callback, Handle, Kind, Node, Recipe, Target};
pub use crate::storage::{FileSystem, Memory, Storage};
#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
