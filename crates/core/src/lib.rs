//! Domain types and pure logic for the sdgen image-generation client.
//!
//! Nothing in this crate performs I/O: job requests and lifecycle types
//! live in [`job`], and the 24-bit BMP encoder plus header parser live in
//! [`raster`].

pub mod error;
pub mod job;
pub mod raster;
