//! Authentication algorithms used during Login negotiation.

// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// CHAP (RFC 1994) challenge/response, including the mutual-authentication
/// extension.
pub mod chap;
