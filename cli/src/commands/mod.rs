// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the saga coordinator CLI

pub mod config;
pub mod inspect;
pub mod serve;

pub use self::config::ConfigCommand;
pub use self::inspect::InspectArgs;
pub use self::serve::ServeArgs;
