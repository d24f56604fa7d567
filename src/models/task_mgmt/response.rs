// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, bail};
use zerocopy::{BigEndian, FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, U32, U64};

use crate::{
    client::pdu_connection::FromBytes,
    models::{
        common::{BasicHeaderSegment, HEADER_LEN, SendingData},
        data_fromat::ZeroCopyType,
        opcode::{BhsOpcode, Opcode, RawBhsOpcode},
        task_mgmt::common::RawTaskMgmtResponseCode,
    },
};

/// BHS for a SCSI Task Management Response (RFC 3720 §10.6).
#[repr(C)]
#[derive(Debug, Default, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct TaskManagementResponse {
    pub opcode: RawBhsOpcode,          // 0
    reserved1: [u8; 1],                // 1
    pub response: RawTaskMgmtResponseCode, // 2
    reserved2: [u8; 1],                // 3
    pub total_ahs_length: u8,          // 4
    pub data_segment_length: [u8; 3],  // 5..8
    reserved3: U64<BigEndian>,         // 8..16
    pub initiator_task_tag: u32,       // 16..20
    reserved4: U32<BigEndian>,         // 20..24
    pub stat_sn: U32<BigEndian>,       // 24..28
    pub exp_cmd_sn: U32<BigEndian>,    // 28..32
    pub max_cmd_sn: U32<BigEndian>,    // 32..36
    reserved5: U64<BigEndian>,         // 36..44
    reserved6: U32<BigEndian>,         // 44..48
}

impl TaskManagementResponse {
    pub fn to_bhs_bytes(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() != HEADER_LEN {
            bail!("buffer length must be {HEADER_LEN}, got {}", buf.len());
        }
        buf.copy_from_slice(self.as_bytes());
        Ok(())
    }

    pub fn from_bhs_bytes(buf: &mut [u8]) -> Result<&mut Self> {
        let hdr = <Self as zerocopy::FromBytes>::mut_from_bytes(buf).map_err(|e| {
            anyhow::anyhow!("failed convert buffer TaskManagementResponse: {e}")
        })?;
        if hdr.opcode.opcode_known() != Some(Opcode::ScsiTaskMgmtResp) {
            anyhow::bail!(
                "TaskManagementResponse: invalid opcode 0x{:02x}",
                hdr.opcode.opcode_raw()
            );
        }
        Ok(hdr)
    }
}

impl SendingData for TaskManagementResponse {
    fn get_final_bit(&self) -> bool {
        true
    }

    fn set_final_bit(&mut self) {}

    fn get_continue_bit(&self) -> bool {
        false
    }

    fn set_continue_bit(&mut self) {}
}

impl FromBytes for TaskManagementResponse {
    fn from_bhs_bytes(bytes: &mut [u8]) -> Result<&mut Self> {
        TaskManagementResponse::from_bhs_bytes(bytes)
    }
}

impl BasicHeaderSegment for TaskManagementResponse {
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

impl ZeroCopyType for TaskManagementResponse {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task_mgmt::common::TaskMgmtResponseCode;

    #[test]
    fn decodes_function_complete() {
        let mut resp = TaskManagementResponse::default();
        resp.opcode.set_opcode_known(Opcode::ScsiTaskMgmtResp);
        resp.response.encode(TaskMgmtResponseCode::FunctionComplete);
        assert_eq!(
            resp.response.decode().unwrap(),
            TaskMgmtResponseCode::FunctionComplete
        );
    }
}
