// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error type shared by every bus, pool, and feature-host operation.

use std::fmt;

/// Errors returned by featurebus operations.
///
/// Conditions the bus treats as routine (unknown message type, redundant
/// subscribe, unsubscribe of an absent receiver) are not errors; they are
/// reported through `Option`/`bool` return values instead.
///
/// # Example
///
/// ```rust
/// use featurebus::{Bus, Error, Letter};
///
/// fn finish(bus: &Bus, letter: Letter) {
///     match bus.receiver_done(letter) {
///         Ok(recycled) => println!("released (recycled: {})", recycled),
///         Err(Error::UnknownLetter { id }) => println!("letter {} already settled", id),
///         Err(e) => println!("other error: {}", e),
///     }
/// }
/// ```
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Dispatch Errors
    // ========================================================================
    /// `receiver_done` was called for a letter that is not in flight
    /// (already recycled, or released more times than it was delivered).
    UnknownLetter { id: u64 },
    /// The operation is not allowed while a dispatch batch is running.
    DispatchActive,

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration value is invalid (unparsable number, zero threshold, ...).
    InvalidConfig(String),
    /// Configuration file not found at specified path.
    ConfigFileNotFound(String),
    /// I/O error with underlying cause.
    IoError(std::io::Error),

    // ========================================================================
    // Feature Host Errors
    // ========================================================================
    /// A feature with the same name is already registered.
    FeatureAlreadyRegistered(String),
    /// No loaded feature has the given name.
    FeatureNotFound(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnknownLetter { id } => write!(f, "Letter {} is not in flight", id),
            Error::DispatchActive => write!(f, "Operation not allowed while dispatch is active"),
            Error::InvalidConfig(msg) => write!(f, "Invalid config: {}", msg),
            Error::ConfigFileNotFound(path) => write!(f, "Config file not found: {}", path),
            Error::IoError(e) => write!(f, "I/O error: {}", e),
            Error::FeatureAlreadyRegistered(name) => {
                write!(f, "Feature already registered: {}", name)
            }
            Error::FeatureNotFound(name) => write!(f, "Feature not found: {}", name),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(e)
    }
}

/// Result alias for featurebus operations.
pub type Result<T> = std::result::Result<T, Error>;
