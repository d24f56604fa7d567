// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod auth;
pub mod cfg;
pub mod client;
pub mod daemon;
pub mod hba;
pub mod login;
pub mod models;
pub mod session;
pub mod state_machine;
pub mod utils;
