//! # PBFT Node
//!
//! Assembles a validator from the workspace crates:
//!
//! - [`pbft_consensus`]: the engine, its broadcaster and the commit path
//! - [`pbft_sync`]: catch-up for a node that fell behind, and the block service
//! - [`pbft_network`]: the transport every task shares
//!
//! [`Node`] wires one validator; [`Devnet`] runs several in-process over a
//! [`pbft_network::MemoryNetwork`]. Configuration comes from [`NodeConfig`],
//! logging from [`logging::init_logging`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;

mod devnet;
mod error;
mod node;

pub use config::{MempoolSettings, NodeConfig};
pub use devnet::Devnet;
pub use error::{NodeError, Result};
pub use logging::LogFormat;
pub use node::Node;
