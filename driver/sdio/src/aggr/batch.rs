//! 聚合批次
//!
//! 一个批次从空开始，逐包折入，一次总线传输刷出后回到空。暂存方式在初始化时按
//! 总线是否支持 scatter-gather 选定一次：连续暂存缓冲，或直接引用各包自身的缓冲。

use alloc::collections::TryReserveError;
use alloc::vec::Vec;

use mmc::SdioFunc;
use xfer::TransferBuffer;

use crate::io::{read_data_sync, write_data_sync};
use crate::types::{PacketType, MWIFIEX_SDIO_IO_PORT_MASK, SDIO_MPA_ADDR_BASE};

/// 批次暂存方式
#[derive(Debug)]
pub enum Staging {
    /// 连续暂存缓冲，折入时拷贝
    Contiguous(Vec<u8>),
    /// 引用各包缓冲，刷出时走 scatter-gather
    Scatter,
}

impl Staging {
    /// 按总线能力选择暂存方式；连续缓冲分配失败返回错误
    pub fn try_alloc(size: usize, sg: bool) -> Result<Self, TryReserveError> {
        if sg {
            return Ok(Staging::Scatter);
        }
        let mut buf = Vec::new();
        buf.try_reserve_exact(size)?;
        buf.resize(size, 0);
        Ok(Staging::Contiguous(buf))
    }

    fn is_contiguous(&self) -> bool {
        matches!(self, Staging::Contiguous(_))
    }
}

/// 多端口地址：新模式编码端口数减一，旧模式编码端口位图
#[inline]
fn mp_addr(ioport: u32, start_port: u8, ports: u32, new_mode: bool) -> u32 {
    let field = if new_mode {
        (ports.count_ones().saturating_sub(1)) << 8
    } else {
        ports << 4
    };
    (ioport | SDIO_MPA_ADDR_BASE | field) + start_port as u32
}

/// 发送目的地
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxPort {
    Data(u8),
    /// 控制端口（旧模式）或命令通道（新模式）
    Cmd,
}

/// 一个待发包：已写好接口头并按块填充
#[derive(Debug)]
pub struct TxSlot {
    pub buf: TransferBuffer,
    pub ty: PacketType,
    pub port: TxPort,
    pub wire_len: usize,
}

impl TxSlot {
    pub fn wire(&self) -> &[u8] {
        self.buf.wire(self.wire_len)
    }
}

/// 发送批次
#[derive(Debug)]
pub struct TxBatch {
    staging: Staging,
    slots: Vec<TxSlot>,
    start_port: u8,
    /// 参与端口的相对位图
    ports: u32,
    buf_len: usize,
    buf_size: usize,
    pkt_limit: usize,
    enabled: bool,
}

impl TxBatch {
    pub fn new(staging: Staging, buf_size: usize, pkt_limit: usize) -> Self {
        Self {
            staging,
            slots: Vec::with_capacity(pkt_limit),
            start_port: 0,
            ports: 0,
            buf_len: 0,
            buf_size,
            pkt_limit,
            enabled: pkt_limit > 0 && buf_size > 0,
        }
    }

    /// 不聚合：所有包单独发送
    pub fn disabled() -> Self {
        Self {
            staging: Staging::Scatter,
            slots: Vec::new(),
            start_port: 0,
            ports: 0,
            buf_len: 0,
            buf_size: 0,
            pkt_limit: 0,
            enabled: false,
        }
    }

    #[inline]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        !self.slots.is_empty()
    }

    #[inline]
    pub fn pkt_cnt(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn buf_len(&self) -> usize {
        self.buf_len
    }

    #[inline]
    pub fn buf_size(&self) -> usize {
        self.buf_size
    }

    #[inline]
    pub fn start_port(&self) -> u8 {
        self.start_port
    }

    #[inline]
    pub fn ports(&self) -> u32 {
        self.ports
    }

    #[inline]
    pub fn is_scatter(&self) -> bool {
        !self.staging.is_contiguous()
    }

    /// 再折入 `len` 字节后仍在容量之内
    #[inline]
    pub fn has_room(&self, len: usize) -> bool {
        self.enabled && self.buf_len + len <= self.buf_size && self.slots.len() < self.pkt_limit
    }

    #[inline]
    pub fn limit_reached(&self) -> bool {
        self.slots.len() >= self.pkt_limit
    }

    /// 折入一个数据包。容量或包数不足时原样退回。
    ///
    /// 位图记录的是相对起始端口的位置；旧模式下写游标回绕时要跳过
    /// `[end_port, max_ports)` 与控制端口。
    pub fn fold(
        &mut self,
        slot: TxSlot,
        new_mode: bool,
        max_ports: u8,
        end_port: u8,
    ) -> Result<(), TxSlot> {
        let TxPort::Data(port) = slot.port else {
            return Err(slot);
        };
        if !self.has_room(slot.wire_len) {
            return Err(slot);
        }
        if let Staging::Contiguous(buf) = &mut self.staging {
            let wire = slot.wire();
            let Some(dst) = buf.get_mut(self.buf_len..self.buf_len + wire.len()) else {
                return Err(slot);
            };
            dst.copy_from_slice(wire);
        }
        let cnt = self.slots.len() as u32;
        if cnt == 0 {
            self.start_port = port;
        }
        self.ports |= if new_mode || self.start_port <= port {
            1 << cnt
        } else {
            1 << (cnt + 1 + (max_ports - end_port) as u32)
        };
        self.buf_len += slot.wire_len;
        self.slots.push(slot);
        Ok(())
    }

    /// 本批次的 CMD53 地址；只有一个包时就是该端口本身
    pub fn mport(&self, ioport: u32, new_mode: bool) -> u32 {
        if self.slots.len() == 1 {
            return ioport + self.start_port as u32;
        }
        mp_addr(ioport, self.start_port, self.ports, new_mode)
    }

    /// 以一次 CMD53 写出整个批次
    pub(crate) fn write<F: SdioFunc>(&self, func: &F, addr: u32, block: usize) -> Result<(), i32> {
        match (&self.staging, self.slots.as_slice()) {
            (_, [one]) => write_data_sync(func, block, addr, one.wire()),
            (Staging::Contiguous(buf), _) => write_data_sync(func, block, addr, &buf[..self.buf_len]),
            (Staging::Scatter, slots) => {
                let segs: Vec<&[u8]> = slots.iter().map(TxSlot::wire).collect();
                func.writesb_sg(addr & MWIFIEX_SDIO_IO_PORT_MASK, &segs)
            }
        }
    }

    /// 取走所有已折入的包并回到空批次
    pub fn take(&mut self) -> Vec<TxSlot> {
        self.start_port = 0;
        self.ports = 0;
        self.buf_len = 0;
        core::mem::take(&mut self.slots)
    }
}

/// 接收批次中的一个端口
#[derive(Debug)]
pub struct RxSlot {
    pub port: u8,
    /// 折入时登记的长度（按块对齐）
    pub len: usize,
    /// scatter 暂存时预先分配的目的缓冲
    pub buf: Option<TransferBuffer>,
}

/// 接收批次
#[derive(Debug)]
pub struct RxBatch {
    staging: Staging,
    slots: Vec<RxSlot>,
    start_port: u8,
    ports: u32,
    buf_len: usize,
    buf_size: usize,
    pkt_limit: usize,
    enabled: bool,
}

impl RxBatch {
    pub fn new(staging: Staging, buf_size: usize, pkt_limit: usize) -> Self {
        Self {
            staging,
            slots: Vec::with_capacity(pkt_limit),
            start_port: 0,
            ports: 0,
            buf_len: 0,
            buf_size,
            pkt_limit,
            enabled: pkt_limit > 0 && buf_size > 0,
        }
    }

    pub fn disabled() -> Self {
        Self {
            staging: Staging::Scatter,
            slots: Vec::new(),
            start_port: 0,
            ports: 0,
            buf_len: 0,
            buf_size: 0,
            pkt_limit: 0,
            enabled: false,
        }
    }

    #[inline]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        !self.slots.is_empty()
    }

    #[inline]
    pub fn pkt_cnt(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn buf_len(&self) -> usize {
        self.buf_len
    }

    #[inline]
    pub fn buf_size(&self) -> usize {
        self.buf_size
    }

    #[inline]
    pub fn start_port(&self) -> u8 {
        self.start_port
    }

    #[inline]
    pub fn ports(&self) -> u32 {
        self.ports
    }

    #[inline]
    pub fn is_scatter(&self) -> bool {
        !self.staging.is_contiguous()
    }

    #[inline]
    pub fn has_room(&self, len: usize) -> bool {
        self.enabled && self.buf_len + len <= self.buf_size && self.slots.len() < self.pkt_limit
    }

    #[inline]
    pub fn limit_reached(&self) -> bool {
        self.slots.len() >= self.pkt_limit
    }

    /// 登记一个待读端口。旧模式下读游标回绕时相对位整体右移一位（跳过控制端口）。
    ///
    /// 端口必须紧接在已登记端口之后：读游标在 `[first_port, max_ports)` 内循环，
    /// 不相邻的端口无法用起始端口加相对位表示。
    pub fn fold(
        &mut self,
        slot: RxSlot,
        new_mode: bool,
        first_port: u8,
        max_ports: u8,
    ) -> Result<(), RxSlot> {
        if !self.has_room(slot.len) {
            return Err(slot);
        }
        if let Some(next) = self.next_port(first_port, max_ports) {
            if slot.port != next {
                return Err(slot);
            }
        }
        if let Some(buf) = &slot.buf {
            if buf.capacity() < slot.len {
                return Err(slot);
            }
        } else if !self.staging.is_contiguous() {
            return Err(slot);
        }
        let cnt = self.slots.len() as u32;
        if cnt == 0 {
            self.start_port = slot.port;
        }
        self.ports |= if new_mode || self.start_port <= slot.port {
            1 << cnt
        } else {
            1 << (cnt + 1)
        };
        self.buf_len += slot.len;
        self.slots.push(slot);
        Ok(())
    }

    /// 批次非空时下一个可折入的端口
    fn next_port(&self, first_port: u8, max_ports: u8) -> Option<u8> {
        if self.slots.is_empty() {
            return None;
        }
        let next = self.start_port as usize + self.slots.len();
        let max = max_ports as usize;
        let next = if next >= max {
            first_port as usize + (next - max)
        } else {
            next
        };
        Some(next as u8)
    }

    pub fn mport(&self, ioport: u32, new_mode: bool) -> u32 {
        if self.slots.len() == 1 {
            return ioport + self.start_port as u32;
        }
        mp_addr(ioport, self.start_port, self.ports, new_mode)
    }

    /// 以一次 CMD53 读入整个批次
    pub(crate) fn read<F: SdioFunc>(&mut self, func: &F, addr: u32, block: usize) -> Result<(), i32> {
        match &mut self.staging {
            Staging::Contiguous(buf) => read_data_sync(func, block, addr, &mut buf[..self.buf_len]),
            Staging::Scatter => {
                let mut segs: Vec<&mut [u8]> = self
                    .slots
                    .iter_mut()
                    .filter_map(|s| {
                        let len = s.len;
                        s.buf.as_mut().map(|b| &mut b.room_mut()[..len])
                    })
                    .collect();
                func.readsb_sg(addr & MWIFIEX_SDIO_IO_PORT_MASK, &mut segs)
            }
        }
    }

    /// 取走批次并按登记长度切成各端口的缓冲
    pub fn split(&mut self) -> Vec<TransferBuffer> {
        let slots = self.take();
        let mut out = Vec::with_capacity(slots.len());
        let mut off = 0;
        for slot in slots {
            match (slot.buf, &self.staging) {
                (Some(mut buf), _) => {
                    buf.set_len(slot.len);
                    out.push(buf);
                }
                (None, Staging::Contiguous(stage)) => {
                    out.push(TransferBuffer::from_slice(&stage[off..off + slot.len]));
                }
                (None, Staging::Scatter) => {}
            }
            off += slot.len;
        }
        out
    }

    pub fn take(&mut self) -> Vec<RxSlot> {
        self.start_port = 0;
        self.ports = 0;
        self.buf_len = 0;
        core::mem::take(&mut self.slots)
    }

    /// 丢弃未完成的批次，返回丢弃的端口数
    pub fn reset(&mut self) -> usize {
        self.take().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_slot(port: u8, len: usize, block: usize) -> TxSlot {
        let mut buf = TransferBuffer::from_slice(&alloc::vec![port; len]);
        let wire_len = buf.pad_to_block(block);
        TxSlot {
            buf,
            ty: PacketType::Data,
            port: TxPort::Data(port),
            wire_len,
        }
    }

    /// 任意折入序列下，批次字节数与包数都不超过上限
    #[test]
    fn fold_respects_capacity() {
        let mut seed = 0x9e37_79b9u32;
        for sg in [false, true] {
            let staging = Staging::try_alloc(1024, sg).unwrap();
            let mut batch = TxBatch::new(staging, 1024, 5);
            for i in 0..500u32 {
                seed ^= seed << 13;
                seed ^= seed >> 17;
                seed ^= seed << 5;
                let len = 1 + (seed % 400) as usize;
                let slot = data_slot((i % 15 + 1) as u8, len, 64);
                let before = batch.buf_len();
                match batch.fold(slot, true, 16, 16) {
                    Ok(()) => assert!(batch.buf_len() > before),
                    Err(back) => assert_eq!(back.buf.len(), len),
                }
                assert!(batch.buf_len() <= 1024);
                assert!(batch.pkt_cnt() <= 5);
                if seed % 3 == 0 || batch.limit_reached() {
                    batch.take();
                }
            }
        }
    }

    #[test]
    fn contiguous_copy_keeps_padding() {
        let staging = Staging::try_alloc(512, false).unwrap();
        let mut batch = TxBatch::new(staging, 512, 4);
        batch.fold(data_slot(1, 10, 64), false, 16, 16).unwrap();
        batch.fold(data_slot(2, 70, 64), false, 16, 16).unwrap();
        assert_eq!(batch.buf_len(), 192);
        let Staging::Contiguous(buf) = &batch.staging else {
            panic!("expected contiguous staging");
        };
        assert!(buf[..10].iter().all(|&b| b == 1));
        assert!(buf[10..64].iter().all(|&b| b == 0));
        assert!(buf[64..134].iter().all(|&b| b == 2));
        assert_eq!(batch.ports(), 0b11);
        assert_eq!(batch.start_port(), 1);
    }

    #[test]
    fn legacy_wrap_skips_unused_ports() {
        let mut batch = TxBatch::new(Staging::Scatter, 4096, 8);
        batch.fold(data_slot(14, 8, 64), false, 16, 16).unwrap();
        batch.fold(data_slot(15, 8, 64), false, 16, 16).unwrap();
        batch.fold(data_slot(1, 8, 64), false, 16, 16).unwrap();
        assert_eq!(batch.ports(), 0b1011);
        assert_eq!(batch.mport(0x10000, false), (0x10000 | 0x1000 | (0b1011 << 4)) + 14);

        let mut rx = RxBatch::new(Staging::Scatter, 4096, 8);
        for port in [15u8, 1] {
            let buf = TransferBuffer::try_alloc(64).ok();
            rx.fold(RxSlot { port, len: 64, buf }, false, 1, 16).unwrap();
        }
        assert_eq!(rx.ports(), 0b101);
    }

    #[test]
    fn rx_refuses_non_adjacent_port() {
        let mut rx = RxBatch::new(Staging::Scatter, 4096, 8);
        let slot = |port| RxSlot {
            port,
            len: 64,
            buf: TransferBuffer::try_alloc(64).ok(),
        };
        rx.fold(slot(0), true, 0, 32).unwrap();
        let refused = rx.fold(slot(2), true, 0, 32).unwrap_err();
        assert_eq!(refused.port, 2);
        assert_eq!(rx.pkt_cnt(), 1);
        rx.fold(slot(1), true, 0, 32).unwrap();
        assert_eq!(rx.mport(0x10000, true), 0x10000 | 0x1000 | (1 << 8));

        // 新模式 32 端口回绕到 0
        rx.take();
        rx.fold(slot(31), true, 0, 32).unwrap();
        assert!(rx.fold(slot(1), true, 0, 32).is_err());
        rx.fold(slot(0), true, 0, 32).unwrap();
        assert_eq!(rx.pkt_cnt(), 2);
    }

    #[test]
    fn new_mode_address_encodes_count() {
        let mut batch = TxBatch::new(Staging::Scatter, 4096, 16);
        for port in 3..6 {
            batch.fold(data_slot(port, 8, 64), true, 32, 32).unwrap();
        }
        assert_eq!(batch.mport(0x10000, true), (0x10000 | 0x1000 | (2 << 8)) + 3);
        batch.take();
        batch.fold(data_slot(7, 8, 64), true, 32, 32).unwrap();
        assert_eq!(batch.mport(0x10000, true), 0x10000 + 7);
    }

    #[test]
    fn rx_split_by_slot_length() {
        let staging = Staging::try_alloc(1024, false).unwrap();
        let mut rx = RxBatch::new(staging, 1024, 8);
        rx.fold(RxSlot { port: 1, len: 64, buf: None }, false, 1, 16).unwrap();
        rx.fold(RxSlot { port: 2, len: 128, buf: None }, false, 1, 16).unwrap();
        if let Staging::Contiguous(buf) = &mut rx.staging {
            buf[..64].fill(0xa1);
            buf[64..192].fill(0xb2);
        }
        let bufs = rx.split();
        assert_eq!(bufs.len(), 2);
        assert_eq!(bufs[0].len(), 64);
        assert!(bufs[0].data().iter().all(|&b| b == 0xa1));
        assert_eq!(bufs[1].len(), 128);
        assert!(bufs[1].data().iter().all(|&b| b == 0xb2));
        assert!(!rx.is_open());
        assert_eq!(rx.buf_len(), 0);
    }
}
