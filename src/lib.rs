//! Twophase
//!
//! A two-phase collective I/O engine. A set of possibly overlapping,
//! strided per-rank file requests is decomposed into contiguous file
//! domains owned by aggregator ranks, which perform a small number of
//! large contiguous accesses and exchange the data with the requesting
//! ranks in bounded-size rounds.
#![cfg_attr(feature = "strict", deny(warnings))]
#![warn(missing_docs)]

pub mod access;
pub mod backend;
pub mod collective;
pub mod comm;
pub mod datatype;
pub mod domain;
pub mod error;
pub mod file;
pub mod hints;
pub mod independent;
pub mod router;
pub mod types;

pub use error::{Error, Result};
pub use file::ParallelFile;
