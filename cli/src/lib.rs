//! Guest harness CLI - build, pack and boot a guest test program.

pub mod commands;
pub mod output;
