#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
//! Asynchronous library to run external programs.
//!
//! The core concept of this library is to simplify the execution of
//! external programs, following these rules:
//!
//! 1. Programs are executed asynchronously, using the [tokio] async
//! runtime.
//!
//! 2. Programs receive their arguments as a vector of discrete
//! tokens. Nothing goes through a shell, so arguments never need
//! quoting and can never be reinterpreted.
//!
//! 3. A run can be bounded by a timeout, after which the program is
//! killed.
//!
//! 4. Long-lived programs can be spawned and their standard output
//! consumed line by line.

mod command;
mod error;
mod output;
mod stream;

#[doc(inline)]
pub use self::{
    command::{find_program, Command},
    error::{Error, Result},
    output::Output,
    stream::LineStream,
};
