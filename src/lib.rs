//! apspatch: APS patches for cartridge ROM images.
//!
//! The crate provides:
//! - The APS format codec (`aps`): header, records, encoder, decoder, naming
//! - File-oriented helpers (`io`)
//! - Directory batch operations (`batch`)
//! - An optional CLI (`cli` feature)
//!
//! # Quick Start
//!
//! ```no_run
//! use apspatch::aps::decoder::{self, ApplyOptions};
//! use apspatch::aps::encoder;
//!
//! let original = vec![0u8; 1024];
//! let mut modified = original.clone();
//! modified[100..104].copy_from_slice(&[0xFF; 4]);
//!
//! let mut patch = Vec::new();
//! encoder::encode_all(&mut patch, &original, &modified).unwrap();
//! let patched = decoder::apply_all(&original, &patch, &ApplyOptions::default()).unwrap();
//! assert_eq!(patched, modified);
//! ```

pub mod aps;
pub mod batch;
pub mod io;

#[cfg(feature = "cli")]
pub mod cli;
