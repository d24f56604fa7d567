// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, bail};
use zerocopy::{
    BigEndian, FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, U32, U64,
};

use crate::{
    client::pdu_connection::FromBytes,
    models::{
        common::{BasicHeaderSegment, HEADER_LEN, SendingData},
        data_fromat::ZeroCopyType,
        opcode::{BhsOpcode, Opcode, RawBhsOpcode},
        task_mgmt::common::{RawTaskMgmtFunction, TaskMgmtFunction},
    },
};

/// BHS for a SCSI Task Management Request (RFC 3720 §10.5).
#[repr(C)]
#[derive(Debug, Default, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct TaskManagementRequest {
    pub opcode: RawBhsOpcode,               // 0
    pub function: RawTaskMgmtFunction,      // 1
    reserved1: [u8; 2],                     // 2..4
    pub total_ahs_length: u8,               // 4
    pub data_segment_length: [u8; 3],       // 5..8
    pub lun: U64<BigEndian>,                // 8..16
    pub initiator_task_tag: u32,            // 16..20
    pub referenced_task_tag: U32<BigEndian>, // 20..24
    pub cmd_sn: U32<BigEndian>,              // 24..28
    pub exp_stat_sn: U32<BigEndian>,         // 28..32
    pub ref_cmd_sn: U32<BigEndian>,          // 32..36
    pub exp_data_sn: U32<BigEndian>,         // 36..40
    reserved2: U64<BigEndian>,              // 40..48
}

impl TaskManagementRequest {
    /// Value used for `ReferencedTaskTag` when the function does not refer
    /// to an outstanding task (e.g. LogicalUnitReset).
    pub const NO_REFERENCE: u32 = 0xFFFF_FFFF;

    pub fn to_bhs_bytes(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() != HEADER_LEN {
            bail!("buffer length must be {HEADER_LEN}, got {}", buf.len());
        }
        buf.copy_from_slice(self.as_bytes());
        Ok(())
    }

    pub fn from_bhs_bytes(buf: &mut [u8]) -> Result<&mut Self> {
        let hdr = <Self as zerocopy::FromBytes>::mut_from_bytes(buf).map_err(|e| {
            anyhow::anyhow!("failed convert buffer TaskManagementRequest: {e}")
        })?;
        if hdr.opcode.opcode_known() != Some(Opcode::ScsiTaskMgmtReq) {
            anyhow::bail!(
                "TaskManagementRequest: invalid opcode 0x{:02x}",
                hdr.opcode.opcode_raw()
            );
        }
        Ok(hdr)
    }
}

#[derive(Debug, Default)]
pub struct TaskManagementRequestBuilder {
    pub header: TaskManagementRequest,
}

impl TaskManagementRequestBuilder {
    pub fn new(function: TaskMgmtFunction) -> Self {
        let mut header = TaskManagementRequest {
            opcode: {
                let mut tmp = RawBhsOpcode::default();
                tmp.set_opcode_known(Opcode::ScsiTaskMgmtReq);
                tmp
            },
            referenced_task_tag: U32::new(TaskManagementRequest::NO_REFERENCE),
            ..Default::default()
        };
        header.function.encode(function);
        TaskManagementRequestBuilder { header }
    }

    pub fn lun(mut self, lun: u64) -> Self {
        self.header.lun.set(lun);
        self
    }

    pub fn initiator_task_tag(mut self, tag: u32) -> Self {
        self.header.initiator_task_tag = tag;
        self
    }

    pub fn referenced_task_tag(mut self, tag: u32) -> Self {
        self.header.referenced_task_tag.set(tag);
        self
    }

    pub fn cmd_sn(mut self, sn: u32) -> Self {
        self.header.cmd_sn.set(sn);
        self
    }

    pub fn exp_stat_sn(mut self, sn: u32) -> Self {
        self.header.exp_stat_sn.set(sn);
        self
    }

    pub fn ref_cmd_sn(mut self, sn: u32) -> Self {
        self.header.ref_cmd_sn.set(sn);
        self
    }

    pub fn exp_data_sn(mut self, sn: u32) -> Self {
        self.header.exp_data_sn.set(sn);
        self
    }
}

impl SendingData for TaskManagementRequest {
    fn get_final_bit(&self) -> bool {
        true
    }

    fn set_final_bit(&mut self) {}

    fn get_continue_bit(&self) -> bool {
        false
    }

    fn set_continue_bit(&mut self) {}
}

impl FromBytes for TaskManagementRequest {
    fn from_bhs_bytes(bytes: &mut [u8]) -> Result<&mut Self> {
        TaskManagementRequest::from_bhs_bytes(bytes)
    }
}

impl BasicHeaderSegment for TaskManagementRequest {
    #[inline]
    fn to_bhs_bytes(&self, buf: &mut [u8]) -> Result<()> {
        self.to_bhs_bytes(buf)
    }

    #[inline]
    fn get_opcode(&self) -> Result<BhsOpcode> {
        BhsOpcode::try_from(self.opcode.raw())
    }

    #[inline]
    fn get_initiator_task_tag(&self) -> u32 {
        self.initiator_task_tag
    }

    #[inline]
    fn get_ahs_length_bytes(&self) -> usize {
        (self.total_ahs_length as usize) * 4
    }

    #[inline]
    fn set_ahs_length_bytes(&mut self, len: u8) {
        self.total_ahs_length = len >> 2;
    }

    #[inline]
    fn get_data_length_bytes(&self) -> usize {
        0
    }

    #[inline]
    fn set_data_length_bytes(&mut self, _len: u32) -> Result<()> {
        Ok(())
    }
}

impl ZeroCopyType for TaskManagementRequest {}
