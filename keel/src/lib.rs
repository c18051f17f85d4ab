//! Core primitives for the keel deterministic wallet engine.
//!
//! This crate provides the hash functions, HMAC helpers and Base58Check
//! encoding shared by the wallet crates.
//!
//! # Features
//!
//! - `std` (default): Enable standard library support
//! - `alloc`: Enable heap allocation without full std (for `no_std` environments)

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs, rust_2018_idioms)]
#![forbid(unsafe_code)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
mod encoding;
mod error;
pub mod hash;

#[cfg(feature = "alloc")]
pub use encoding::{base58check_decode, base58check_encode};
pub use error::Error;

/// A convenient Result type alias for keel core operations.
pub type Result<T> = core::result::Result<T, Error>;
