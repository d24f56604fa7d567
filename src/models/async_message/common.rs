// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::fmt;

use anyhow::{Result, bail};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// iSCSI Asynchronous Event code (RFC 3720 §10.9.1, byte 36).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AsyncEvent {
    /// A SCSI asynchronous event is reported in the sense data.
    #[default]
    ScsiEvent = 0,
    /// The target requests a logout (within `Parameter3` seconds).
    LogoutRequest = 1,
    /// The target will drop this connection.
    ConnectionDrop = 2,
    /// The target will drop the whole session.
    SessionDrop = 3,
    /// The target requests renegotiation of session/connection parameters.
    ParameterRenegotiation = 4,
    /// Vendor-specific event; see `AsyncVCode`.
    VendorSpecific = 255,
}

impl AsyncEvent {
    #[inline]
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for AsyncEvent {
    type Error = anyhow::Error;

    fn try_from(v: u8) -> Result<Self> {
        Ok(match v {
            0 => Self::ScsiEvent,
            1 => Self::LogoutRequest,
            2 => Self::ConnectionDrop,
            3 => Self::SessionDrop,
            4 => Self::ParameterRenegotiation,
            255 => Self::VendorSpecific,
            other => bail!("unknown asynchronous event code {other}"),
        })
    }
}

impl fmt::Display for AsyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct RawAsyncEvent(u8);

impl Default for RawAsyncEvent {
    fn default() -> Self {
        Self(AsyncEvent::default().as_u8())
    }
}

impl RawAsyncEvent {
    #[inline]
    pub const fn raw(self) -> u8 {
        self.0
    }

    #[inline]
    pub fn decode(self) -> Result<AsyncEvent> {
        AsyncEvent::try_from(self.0)
    }

    #[inline]
    pub fn encode(&mut self, e: AsyncEvent) {
        self.0 = e.as_u8();
    }
}

impl fmt::Debug for RawAsyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.decode() {
            Ok(e) => write!(f, "RawAsyncEvent({e:?})"),
            Err(_) => write!(f, "RawAsyncEvent(invalid(0x{:02x}))", self.0),
        }
    }
}
