//! Streaming OpenStreetMap reader with handler dispatch, and a PBF writer.
//!
//! ```no_run
//! use osmio::{ApplyOptions, Reader, Stats};
//!
//! let mut reader = Reader::open("berlin.osm.pbf")?;
//! println!("generator: {}", reader.header().generator());
//!
//! let mut stats = Stats::default();
//! reader.apply(&mut stats, ApplyOptions::default())?;
//! reader.close()?;
//! println!("{}", stats);
//! # Ok::<(), osmio::Error>(())
//! ```

mod buffer;
mod entity;
mod error;
mod file;
mod handler;
mod header;
pub mod index;
pub mod osmpbf;
mod reader;
mod stats;
mod writer;

pub use crate::buffer::Buffer;
pub use crate::entity::*;
pub use crate::error::{Error, Result};
pub use crate::file::{File, FileFormat, FormatOptions, PbfCompression};
pub use crate::handler::{apply_buffer, dispatch, Handler};
pub use crate::header::Header;
pub use crate::index::{DenseMemArray, LocationHandler, LocationIndex, SparseMemArray};
pub use crate::reader::{ApplyOptions, Reader, Source};
pub use crate::stats::Stats;
pub use crate::writer::{Overwrite, Writer};
