#![deny(clippy::all)]
#![deny(warnings)]

//! # EBB Command Protocol
//!
//! Parsing for the ASCII line protocol spoken by EBB-class plotter
//! controllers. A command is a short alphabetic code followed by
//! comma-separated signed decimal arguments, terminated by CR:
//!
//! ```text
//! SM,1000,200,-150<CR>
//! QM<CR>
//! ```
//!
//! ## Key Components
//!
//! - **[`parser`]**: a `nom`-based line parser producing typed commands.
//! - **[`commands`]**: the typed [`commands::Command`] enum for the motion
//!   command surface.
//!
//! The parser validates shape and numeric representability only; semantic
//! range checks (step budgets, rate limits) belong to the command
//! front-end, which also decides how errors are reported on the wire.

pub mod commands;
pub mod parser;

pub use commands::Command;
pub use parser::parse_line;

use thiserror::Error;

/// Errors produced while parsing a command line.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ParseError {
    /// The line was empty after stripping the terminator.
    #[error("empty command")]
    EmptyCommand,
    /// The command code is not part of the motion surface.
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    /// A required parameter was absent.
    #[error("{command} parameter {index} is required")]
    MissingParameter {
        command: &'static str,
        index: usize,
    },
    /// A parameter was not a well-formed decimal number.
    #[error("parameter {index} is not a number")]
    InvalidNumber { index: usize },
    /// A parameter does not fit the field it was supplied for.
    #[error("parameter {index} outside limit")]
    ParameterOutsideLimit { index: usize },
    /// More parameters were supplied than the command accepts.
    #[error("too many parameters")]
    TooManyParameters,
}
