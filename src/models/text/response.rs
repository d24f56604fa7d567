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
        text::common::RawStageFlags,
    },
};

/// BHS for TextResponse PDU
#[repr(C)]
#[derive(Default, Debug, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct TextResponse {
    /// Byte 0: opcode (should be `Opcode::TextResp`).
    pub opcode: RawBhsOpcode,
    /// Byte 1: stage flags (F/C).
    pub flags: RawStageFlags,
    reserved1: [u8; 2],
    /// Byte 4
    pub total_ahs_length: u8,
    /// Bytes 5..7
    pub data_segment_length: [u8; 3],
    /// Bytes 8..15
    pub lun: U64<BigEndian>,
    /// Bytes 16..19
    pub initiator_task_tag: u32,
    /// Bytes 20..23
    pub target_transfer_tag: U32<BigEndian>,
    /// Bytes 24..27
    pub stat_sn: U32<BigEndian>,
    /// Bytes 28..31
    pub exp_cmd_sn: U32<BigEndian>,
    /// Bytes 32..35
    pub max_cmd_sn: U32<BigEndian>,
    reserved2: [u8; 12],
}

impl TextResponse {
    #[inline]
    pub fn to_bhs_bytes(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() != HEADER_LEN {
            bail!("buffer length must be {HEADER_LEN}, got {}", buf.len());
        }
        buf.copy_from_slice(self.as_bytes());
        Ok(())
    }

    pub fn from_bhs_bytes(buf: &mut [u8]) -> Result<&mut Self> {
        let hdr = <Self as zerocopy::FromBytes>::mut_from_bytes(buf)
            .map_err(|e| anyhow::anyhow!("failed convert buffer TextResponse: {e}"))?;
        if hdr.opcode.opcode_known() != Some(Opcode::TextResp) {
            anyhow::bail!(
                "TextResponse: invalid opcode 0x{:02x}",
                hdr.opcode.opcode_raw()
            );
        }
        Ok(hdr)
    }

    /// `true` when the target transfer tag is the reserved "none" value.
    #[inline]
    pub fn is_final_exchange(&self) -> bool {
        self.target_transfer_tag.get() == 0xFFFF_FFFF && self.get_final_bit()
    }
}

impl SendingData for TextResponse {
    fn get_final_bit(&self) -> bool {
        self.flags.get_final_bit()
    }

    fn set_final_bit(&mut self) {
        self.flags.set_final_bit();
        if self.get_continue_bit() {
            self.flags.set_continue_bit();
        }
    }

    fn get_continue_bit(&self) -> bool {
        self.flags.get_continue_bit()
    }

    fn set_continue_bit(&mut self) {
        self.flags.set_continue_bit();
        if self.get_final_bit() {
            self.flags.set_final_bit();
        }
    }
}

impl FromBytes for TextResponse {
    fn from_bhs_bytes(bytes: &mut [u8]) -> Result<&mut Self> {
        TextResponse::from_bhs_bytes(bytes)
    }
}

impl BasicHeaderSegment for TextResponse {
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
        u32::from_be_bytes([
            0,
            self.data_segment_length[0],
            self.data_segment_length[1],
            self.data_segment_length[2],
        ]) as usize
    }

    #[inline]
    fn set_data_length_bytes(&mut self, len: u32) -> Result<()> {
        self.data_segment_length = crate::models::common::encode_data_segment_length(len)?;
        Ok(())
    }
}

impl ZeroCopyType for TextResponse {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_opcode() {
        let mut buf = [0u8; HEADER_LEN];
        assert!(TextResponse::from_bhs_bytes(&mut buf).is_err());
    }

    #[test]
    fn round_trips_stat_sn() {
        let mut resp = TextResponse::default();
        resp.opcode.set_opcode_known(Opcode::TextResp);
        resp.stat_sn.set(42);
        let mut buf = [0u8; HEADER_LEN];
        resp.to_bhs_bytes(&mut buf).unwrap();
        let parsed = TextResponse::from_bhs_bytes(&mut buf).unwrap();
        assert_eq!(parsed.stat_sn.get(), 42);
    }
}
