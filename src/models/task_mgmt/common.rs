// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::fmt;

use anyhow::{Result, bail};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// SCSI Task Management Function Code (RFC 3720 §10.5.1, byte 1 low 7 bits).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskMgmtFunction {
    AbortTask = 1,
    AbortTaskSet = 2,
    ClearAca = 3,
    ClearTaskSet = 4,
    #[default]
    LogicalUnitReset = 5,
    TargetWarmReset = 6,
    TargetColdReset = 7,
    TaskReassign = 8,
}

impl TaskMgmtFunction {
    #[inline]
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for TaskMgmtFunction {
    type Error = anyhow::Error;

    fn try_from(v: u8) -> Result<Self> {
        Ok(match v {
            1 => Self::AbortTask,
            2 => Self::AbortTaskSet,
            3 => Self::ClearAca,
            4 => Self::ClearTaskSet,
            5 => Self::LogicalUnitReset,
            6 => Self::TargetWarmReset,
            7 => Self::TargetColdReset,
            8 => Self::TaskReassign,
            other => bail!("unknown task management function {other}"),
        })
    }
}

impl fmt::Display for TaskMgmtFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Wire-safe wrapper: byte 1 of the Task Management Request BHS, function
/// code in bits 0..6 with the high bit always set to 1 per RFC 3720.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct RawTaskMgmtFunction(u8);

const FUNCTION_SET_BIT: u8 = 0b1000_0000;

impl Default for RawTaskMgmtFunction {
    fn default() -> Self {
        Self(FUNCTION_SET_BIT | TaskMgmtFunction::default().as_u8())
    }
}

impl RawTaskMgmtFunction {
    #[inline]
    pub const fn raw(self) -> u8 {
        self.0
    }

    #[inline]
    pub fn decode(self) -> Result<TaskMgmtFunction> {
        TaskMgmtFunction::try_from(self.0 & !FUNCTION_SET_BIT)
    }

    #[inline]
    pub fn encode(&mut self, f: TaskMgmtFunction) {
        self.0 = FUNCTION_SET_BIT | f.as_u8();
    }
}

impl fmt::Debug for RawTaskMgmtFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.decode() {
            Ok(func) => write!(f, "RawTaskMgmtFunction({func:?})"),
            Err(_) => write!(f, "RawTaskMgmtFunction(invalid(0x{:02x}))", self.0),
        }
    }
}

/// Task Management Response Code (RFC 3720 §10.6.2, byte 2).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskMgmtResponseCode {
    #[default]
    FunctionComplete = 0x00,
    TaskNotExist = 0x01,
    LunNotExist = 0x02,
    TaskStillAllegiant = 0x03,
    TaskReassignNotSupported = 0x04,
    FunctionNotSupported = 0x05,
    AuthorizationFailed = 0x06,
    FunctionRejected = 0xFF,
}

impl TaskMgmtResponseCode {
    #[inline]
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for TaskMgmtResponseCode {
    type Error = anyhow::Error;

    fn try_from(v: u8) -> Result<Self> {
        Ok(match v {
            0x00 => Self::FunctionComplete,
            0x01 => Self::TaskNotExist,
            0x02 => Self::LunNotExist,
            0x03 => Self::TaskStillAllegiant,
            0x04 => Self::TaskReassignNotSupported,
            0x05 => Self::FunctionNotSupported,
            0x06 => Self::AuthorizationFailed,
            0xFF => Self::FunctionRejected,
            other => bail!("unknown task management response code {other:#04x}"),
        })
    }
}

#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct RawTaskMgmtResponseCode(u8);

impl Default for RawTaskMgmtResponseCode {
    fn default() -> Self {
        Self(TaskMgmtResponseCode::default().as_u8())
    }
}

impl RawTaskMgmtResponseCode {
    #[inline]
    pub const fn raw(self) -> u8 {
        self.0
    }

    #[inline]
    pub fn decode(self) -> Result<TaskMgmtResponseCode> {
        TaskMgmtResponseCode::try_from(self.0)
    }

    #[inline]
    pub fn encode(&mut self, r: TaskMgmtResponseCode) {
        self.0 = r.as_u8();
    }
}

impl fmt::Debug for RawTaskMgmtResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.decode() {
            Ok(code) => write!(f, "RawTaskMgmtResponseCode({code:?})"),
            Err(_) => write!(f, "RawTaskMgmtResponseCode(invalid(0x{:02x}))", self.0),
        }
    }
}
