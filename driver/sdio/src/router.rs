//! 包头与包路由
//!
//! 每个载荷前有 4 字节接口头：le16 总长度（含头）+ le16 类型标签。接收时在这里
//! 一次性把标签解码为 [`RxPacket`]，之后按变体分发给上层。

use mmc::SdioFunc;
use xfer::TransferBuffer;

use crate::card::CardContext;
use crate::ops::Upcall;
use crate::types::{
    PacketType, BLOCK_NUMBER_OFFSET, INTF_HEADER_LEN, MAX_EVENT_SIZE, MWIFIEX_EVENT_HEADER_LEN,
    SDIO_HEADER_OFFSET,
};

const LOG_TARGET: &str = "mwifiex::sdio::router";

/// 接口头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireHeader {
    /// 总长度（含头）
    pub len: u16,
    pub tag: u16,
}

impl WireHeader {
    pub const LEN: usize = INTF_HEADER_LEN;

    pub fn parse(data: &[u8]) -> Option<Self> {
        let hdr = data.get(..Self::LEN)?;
        Some(Self {
            len: u16::from_le_bytes([hdr[0], hdr[1]]),
            tag: u16::from_le_bytes([hdr[2], hdr[3]]),
        })
    }

    /// 写入 `out` 的前 4 字节；空间不足返回 false
    pub fn write(&self, out: &mut [u8]) -> bool {
        let Some(hdr) = out.get_mut(..Self::LEN) else {
            return false;
        };
        hdr[..2].copy_from_slice(&self.len.to_le_bytes());
        hdr[2..].copy_from_slice(&self.tag.to_le_bytes());
        true
    }
}

/// 以 `payload` 构造带接口头的发送缓冲；总长度超出 u16 返回 None
pub fn encode_packet(ty: PacketType, payload: &[u8]) -> Option<TransferBuffer> {
    let total = INTF_HEADER_LEN + payload.len();
    let len = u16::try_from(total).ok()?;
    let mut buf = TransferBuffer::alloc(total);
    let out = buf.put(total)?;
    WireHeader { len, tag: ty.tag() }.write(out);
    out[INTF_HEADER_LEN..].copy_from_slice(payload);
    Some(buf)
}

/// `encode_packet` 的逆过程：校验长度后返回头与载荷
pub fn decode_packet(data: &[u8]) -> Option<(WireHeader, &[u8])> {
    let hdr = WireHeader::parse(data)?;
    let len = hdr.len as usize;
    if len < INTF_HEADER_LEN || len > data.len() {
        return None;
    }
    Some((hdr, &data[INTF_HEADER_LEN..len]))
}

/// 按类型标签解码后的接收包
#[derive(Debug)]
pub enum RxPacket {
    /// 数据（已去头）
    Data(TransferBuffer),
    /// 固件侧聚合数据（保留原始布局，由 deaggregate 拆分）
    AggrData(TransferBuffer),
    /// 命令响应（已去头）
    CmdResp(TransferBuffer),
    /// 事件：cause 之后的事件体
    Event { cause: u32, body: TransferBuffer },
    FwLoader(TransferBuffer),
    Unknown { tag: u16, buf: TransferBuffer },
}

/// 接收包不合法的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxViolation {
    /// 头不完整或长度字段小于头长度
    BadHeader,
    /// 声明长度超过实际读到的字节
    Overrun { declared: usize, actual: usize },
    /// 事件过短或过长
    BadEvent(usize),
}

impl RxPacket {
    /// 解析接口头并按标签分类。`buf` 为刚从总线读到的原始包（可能含块对齐填充）。
    pub fn decode(mut buf: TransferBuffer) -> Result<Self, RxViolation> {
        let hdr = WireHeader::parse(buf.data()).ok_or(RxViolation::BadHeader)?;
        let declared = hdr.len as usize;
        if declared < INTF_HEADER_LEN {
            return Err(RxViolation::BadHeader);
        }
        if declared > buf.len() {
            return Err(RxViolation::Overrun {
                declared,
                actual: buf.len(),
            });
        }
        let ty = PacketType::from_wire(hdr.tag);
        if ty == Some(PacketType::AggrData) {
            return Ok(RxPacket::AggrData(buf));
        }
        buf.trim(declared);
        buf.pull(INTF_HEADER_LEN);
        Ok(match ty {
            Some(PacketType::Data) => RxPacket::Data(buf),
            Some(PacketType::Cmd) => RxPacket::CmdResp(buf),
            Some(PacketType::Event) => {
                let n = buf.len();
                if !(MWIFIEX_EVENT_HEADER_LEN..MAX_EVENT_SIZE).contains(&n) {
                    return Err(RxViolation::BadEvent(n));
                }
                let d = buf.data();
                let cause = u32::from_le_bytes([d[0], d[1], d[2], d[3]]);
                buf.pull(MWIFIEX_EVENT_HEADER_LEN);
                RxPacket::Event { cause, body: buf }
            }
            Some(PacketType::FwLoader) => RxPacket::FwLoader(buf),
            Some(PacketType::AggrData) | None => RxPacket::Unknown { tag: hdr.tag, buf },
        })
    }
}

impl<F: SdioFunc> CardContext<F> {
    /// 解码并分发一个接收包。协议违例只计数，不影响同批其他包。
    pub(crate) fn decode_rx_packet(&mut self, buf: TransferBuffer) {
        match RxPacket::decode(buf) {
            Ok(pkt) => self.route(pkt),
            Err(v) => {
                log::warn!(target: LOG_TARGET, "dropping rx packet: {:?}", v);
                self.stats.rx_dropped += 1;
            }
        }
    }

    fn route(&mut self, pkt: RxPacket) {
        match pkt {
            RxPacket::Data(buf) => {
                log::trace!(target: LOG_TARGET, "rx data len={}", buf.len());
                if self.cfg.rx_work {
                    let was_empty = self.rx_queue.is_empty();
                    self.rx_queue.push_tail(buf);
                    if was_empty {
                        self.upcall(Upcall::RxPending);
                    }
                } else {
                    self.upcall(Upcall::Data(buf));
                }
            }
            RxPacket::AggrData(buf) => {
                if self.cfg.sdio_rx_aggr {
                    self.deaggr_fw_pkt(buf);
                } else {
                    log::warn!(target: LOG_TARGET, "aggr data while fw rx aggregation is off");
                    self.stats.rx_dropped += 1;
                }
            }
            RxPacket::CmdResp(buf) => {
                if self.cmd_pending {
                    self.cmd_pending = false;
                    self.upcall(Upcall::CmdResp(buf));
                } else {
                    log::warn!(
                        target: LOG_TARGET,
                        "cmd response with no pending command, len={}",
                        buf.len()
                    );
                    self.stash_unsolicited(buf.data());
                    self.stats.unsolicited_cmd_resp += 1;
                }
            }
            RxPacket::Event { cause, body } => {
                log::debug!(target: LOG_TARGET, "rx event {:#x} len={}", cause, body.len());
                self.last_event_cause = cause;
                self.upcall(Upcall::Event { cause, buf: body });
            }
            RxPacket::FwLoader(buf) => self.upcall(Upcall::FwLoader(buf)),
            RxPacket::Unknown { tag, buf } => {
                log::warn!(
                    target: LOG_TARGET,
                    "unknown packet type {:#x}, len={}, dropped",
                    tag,
                    buf.len()
                );
                self.stats.unknown_type += 1;
            }
        }
    }

    /// 拆分固件侧聚合包：每个子包占 `block_num * rx_aggr_block_size` 字节，
    /// 块数在 BLOCK_NUMBER_OFFSET，子包接口头在 SDIO_HEADER_OFFSET。
    fn deaggr_fw_pkt(&mut self, buf: TransferBuffer) {
        let blk = self.cfg.rx_aggr_block_size;
        let mut data = buf.data();
        while data.len() >= SDIO_HEADER_OFFSET + INTF_HEADER_LEN && data.len() >= blk {
            let blk_size = blk * data[BLOCK_NUMBER_OFFSET] as usize;
            if blk_size == 0 || blk_size > data.len() {
                log::warn!(
                    target: LOG_TARGET,
                    "deaggr: bad blk_size {} (remaining {})",
                    blk_size,
                    data.len()
                );
                self.stats.rx_dropped += 1;
                break;
            }
            let inner = &data[SDIO_HEADER_OFFSET..];
            let pkt_len = u16::from_le_bytes([inner[0], inner[1]]) as usize;
            if pkt_len + SDIO_HEADER_OFFSET > blk_size || pkt_len < INTF_HEADER_LEN {
                log::warn!(
                    target: LOG_TARGET,
                    "deaggr: bad pkt_len {} in block of {}",
                    pkt_len,
                    blk_size
                );
                self.stats.rx_dropped += 1;
                break;
            }
            let mut sub = TransferBuffer::from_slice(&inner[..pkt_len]);
            sub.pull(INTF_HEADER_LEN);
            self.route(RxPacket::Data(sub));
            data = &data[blk_size..];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framing_round_trip() {
        let payload: alloc::vec::Vec<u8> = (0..=255u8).collect();
        for ty in [
            PacketType::Data,
            PacketType::Cmd,
            PacketType::Event,
            PacketType::FwLoader,
            PacketType::AggrData,
        ] {
            for n in [0usize, 1, 255, 256] {
                let buf = encode_packet(ty, &payload[..n]).unwrap();
                assert_eq!(buf.len(), n + INTF_HEADER_LEN);
                let (hdr, body) = decode_packet(buf.data()).unwrap();
                assert_eq!(hdr.len as usize, n + INTF_HEADER_LEN);
                assert_eq!(PacketType::from_wire(hdr.tag), Some(ty));
                assert_eq!(body, &payload[..n]);
            }
        }
    }

    #[test]
    fn header_is_little_endian() {
        let buf = encode_packet(PacketType::Event, &[0xaa]).unwrap();
        assert_eq!(buf.data(), &[0x05, 0x00, 0x03, 0x00, 0xaa]);
        assert!(decode_packet(&[0x09, 0x00, 0x00, 0x00, 0x01]).is_none());
        assert!(decode_packet(&[0x02, 0x00, 0x00, 0x00]).is_none());
    }

    #[test]
    fn decode_strips_padding_and_header() {
        let mut raw = alloc::vec![0u8; 64];
        WireHeader { len: 7, tag: 0 }.write(&mut raw);
        raw[4..7].copy_from_slice(&[1, 2, 3]);
        match RxPacket::decode(TransferBuffer::from_slice(&raw)) {
            Ok(RxPacket::Data(b)) => assert_eq!(b.data(), &[1, 2, 3]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn event_cause_is_split_off() {
        let buf = encode_packet(PacketType::Event, &[0x0b, 0, 0, 0, 0xde, 0xad]).unwrap();
        match RxPacket::decode(buf) {
            Ok(RxPacket::Event { cause, body }) => {
                assert_eq!(cause, 0x0b);
                assert_eq!(body.data(), &[0xde, 0xad]);
            }
            other => panic!("unexpected {:?}", other),
        }
        let short = encode_packet(PacketType::Event, &[1, 2]).unwrap();
        assert_eq!(RxPacket::decode(short).err(), Some(RxViolation::BadEvent(2)));
    }

    #[test]
    fn overrun_is_rejected() {
        let mut raw = [0u8; 8];
        WireHeader { len: 100, tag: 0 }.write(&mut raw);
        assert_eq!(
            RxPacket::decode(TransferBuffer::from_slice(&raw)).err(),
            Some(RxViolation::Overrun { declared: 100, actual: 8 })
        );
    }
}
