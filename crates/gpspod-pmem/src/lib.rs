//! Flash access and track catalog for the GPS Track Pod.
//!
//! - [`PagedMemory`] reads the device flash through 512-byte block requests,
//!   fetching each block at most once.
//! - [`MemoryImage`] holds a full or partial copy of the flash.
//! - [`Catalog`] follows the PMEM record chain and decodes track samples.
//!
//! Everything above the image is written against [`ByteSource`], so a live
//! device and a dump file are interchangeable.

pub mod catalog;
pub mod error;
pub mod image;
pub mod paged;
pub mod reconstruct;
pub mod source;
pub mod track;

pub use catalog::{Catalog, CatalogConfig, Track, DEFAULT_MAX_TRACKS, LOG_AREA_OFFSET};
pub use error::{PmemError, Result};
pub use image::{MemoryImage, BLOCK_SIZE, FILESYSTEM_SIZE};
pub use paged::PagedMemory;
pub use reconstruct::{reconstruct, Reconstruction};
pub use source::ByteSource;
pub use track::{Lap, LapEvent, Sample, Timestamp, TrackFormat, TrackHeader, END_OF_CHAIN};
