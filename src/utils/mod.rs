// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 etlflow contributors

//! Utility modules

pub mod colors;
mod hash;

pub use colors::*;
pub use hash::{hash_bytes, hash_string};
