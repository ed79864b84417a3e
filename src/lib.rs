//! Dotfiles - Idempotent bootstrap and role-based converge for a personal Linux machine
//!
//! A single `dotfiles` invocation installs baseline packages, clones or
//! updates the configuration repository, checks the secrets manager, collects
//! host facts and runs the selected roles against the user's home.

pub mod apply;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod facts;
pub mod process;
pub mod roles;
