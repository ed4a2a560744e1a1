//! Bring cluster components up and down by running external commands.
//!
//! A [`up_down::Manager`] pairs an "up" and a "down" command produced by a
//! [`up_down::CommandBuilder`] and makes sure a component it brought up is
//! torn down again, even if the caller forgets. [`helm_chart`] provides the
//! builder used to install and uninstall Helm releases.

#[macro_use]
extern crate tracing;

use std::process::ExitStatus;

use snafu::Snafu;

pub mod helm_chart;
pub mod up_down;
mod util;

/// An error running an external command.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("unable to spawn {}: {}", command, source))]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[snafu(display("{} exited with {}", command, status))]
    Exit { command: String, status: ExitStatus },
}

pub type Result<T> = std::result::Result<T, Error>;
