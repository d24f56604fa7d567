//! This module defines the structures for iSCSI Data-In and Data-Out PDUs.
//! It includes submodules for common definitions, requests, responses, and sense data.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Defines common structures and flags for iSCSI Data-In and Data-Out PDUs.
pub mod common;
/// Defines the structures for iSCSI SCSI Data-Out PDUs.
pub mod request;
/// Defines the structures for iSCSI SCSI Data-In PDUs.
pub mod response;
/// Defines the structures for SCSI Sense Data.
pub mod sense_data;
