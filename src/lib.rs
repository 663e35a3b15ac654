// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Command-line companion of the Village script platform.
//!
//! Village hosts small Node and Python programs called __scripts__. This
//! crate logs users in through the OAuth2 device authorization grant, keeps
//! their tokens fresh, and packages local projects into builds the platform
//! can run.

pub mod api;
pub mod auth;
pub mod config;
pub mod deploy;
pub mod path;
pub mod report;
pub mod store;
pub mod workspace;
