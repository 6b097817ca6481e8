// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Install docker-compose services as ordinary commands.
//!
//! A __dip__ is a named application backed by a docker-compose service. When
//! installed, dip writes a small launcher executable onto the user's `PATH`
//! that calls `dip run <name>`, which in turn runs the service through
//! `docker-compose run`. All installed applications are kept in a registry
//! file.
//!
//! An application can optionally track a git remote. Before it is used, its
//! compose files are compared against the tracked remote branch, and stale
//! local configuration is either upgraded, waited out, or confirmed by the
//! user.

pub mod app;
pub mod compose;
pub mod config;
pub mod exe;
pub mod flow;
pub mod path;
pub mod repo;
pub mod settings;

pub use app::Dip;
pub use settings::Settings;
