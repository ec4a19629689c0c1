//! 每设备上下文 CardContext
//!
//! 一次 attach 对应一个 CardContext，持有寄存器布局、端口分配器、两个聚合批次、
//! 寄存器快照缓冲与接收队列。所有操作都以 `&mut CardContext` 进行，由
//! [`crate::SdioTransport`] 的锁串行化中断路径与提交路径。

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use mmc::SdioFunc;
use xfer::{BufQueue, TransferBuffer};

use crate::aggr::{RxBatch, TxBatch};
use crate::config::SdioConfig;
use crate::error::{SdioError, SdioResult};
use crate::ops::Upcall;
use crate::port::PortAllocator;
use crate::regs::{CardReg, SdioDevice};
use crate::types::{PacketType, MWIFIEX_UPLD_SIZE};

const LOG_TARGET: &str = "mwifiex::sdio";

/// 传输统计。协议违例与所有权/顺序异常只体现在这里，不作为错误上报。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    pub interrupts: u32,
    pub tx_aggr_batches: u32,
    pub tx_aggr_pkts: u32,
    pub tx_single: u32,
    /// 以失败状态归还的发送缓冲
    pub tx_failed: u32,
    pub rx_aggr_batches: u32,
    pub rx_aggr_pkts: u32,
    pub rx_single: u32,
    /// 因长度/类型非法被丢弃的接收包
    pub rx_dropped: u32,
    pub rx_alloc_fail: u32,
    /// 读失败后随批次丢弃的接收包
    pub rx_failed: u32,
    pub unsolicited_cmd_resp: u32,
    /// 读位图置位但长度为 0 的端口
    pub stale_port_bits: u32,
    /// 寄存器快照不一致或读取失败后被修正的次数
    pub snapshot_recovered: u32,
    pub unknown_type: u32,
    pub aborts: u32,
    pub fw_crc_retries: u32,
}

const MP_DBG_RING: usize = 10;

/// 一次多端口传输的记录
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MpTrace {
    pub start_port: u8,
    pub ports: u32,
    pub len: usize,
}

/// 最近若干次多端口读/写，出错时打印
#[derive(Debug, Clone, Default)]
pub struct MpDebugRing {
    wr: [MpTrace; MP_DBG_RING],
    wr_idx: usize,
    rd: [MpTrace; MP_DBG_RING],
    rd_idx: usize,
}

impl MpDebugRing {
    pub fn record_wr(&mut self, t: MpTrace) {
        self.wr[self.wr_idx] = t;
        self.wr_idx = (self.wr_idx + 1) % MP_DBG_RING;
    }

    pub fn record_rd(&mut self, t: MpTrace) {
        self.rd[self.rd_idx] = t;
        self.rd_idx = (self.rd_idx + 1) % MP_DBG_RING;
    }

    /// 最近一次写记录
    pub fn last_wr(&self) -> MpTrace {
        self.wr[(self.wr_idx + MP_DBG_RING - 1) % MP_DBG_RING]
    }

    pub fn last_rd(&self) -> MpTrace {
        self.rd[(self.rd_idx + MP_DBG_RING - 1) % MP_DBG_RING]
    }

    pub fn dump(&self) {
        for i in 0..MP_DBG_RING {
            let w = self.wr[(self.wr_idx + i) % MP_DBG_RING];
            let r = self.rd[(self.rd_idx + i) % MP_DBG_RING];
            log::debug!(
                target: LOG_TARGET,
                "mp_wr start={} ports={:#010x} len={} | mp_rd start={} ports={:#010x} len={}",
                w.start_port, w.ports, w.len, r.start_port, r.ports, r.len
            );
        }
    }
}

pub struct CardContext<F: SdioFunc> {
    pub(crate) func: F,
    pub(crate) dev: &'static SdioDevice,
    pub(crate) reg: &'static CardReg,
    pub(crate) cfg: SdioConfig,
    pub(crate) block_size: usize,
    /// CMD53 端口基址：旧模式读自 io_port 寄存器，新模式为 MEM_PORT
    pub(crate) ioport: u32,
    pub(crate) ports: PortAllocator,
    /// 每次中断读取的寄存器快照
    pub(crate) mp_regs: Vec<u8>,
    pub(crate) mpa_tx: TxBatch,
    pub(crate) mpa_rx: RxBatch,
    /// 数据发送在途（无可写端口）
    pub(crate) data_sent: bool,
    /// 命令发送在途
    pub(crate) cmd_sent: bool,
    /// 已发出命令、等待响应
    pub(crate) cmd_pending: bool,
    /// 无人等待的命令响应拷贝到这里
    pub(crate) upld_buf: Vec<u8>,
    pub(crate) upld_len: usize,
    pub(crate) rx_queue: BufQueue,
    pub(crate) upcalls: VecDeque<Upcall>,
    pub(crate) timer_armed: bool,
    pub(crate) removed: bool,
    pub(crate) winner: bool,
    pub(crate) fw_ready: bool,
    pub(crate) last_event_cause: u32,
    pub(crate) stats: Stats,
    pub(crate) dbg: MpDebugRing,
}

impl<F: SdioFunc> CardContext<F> {
    #[inline]
    pub fn device(&self) -> &'static SdioDevice {
        self.dev
    }

    #[inline]
    pub fn func(&self) -> &F {
        &self.func
    }

    #[inline]
    pub fn config(&self) -> &SdioConfig {
        &self.cfg
    }

    #[inline]
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    #[inline]
    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    #[inline]
    pub fn ioport(&self) -> u32 {
        self.ioport
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    #[inline]
    pub fn data_sent(&self) -> bool {
        self.data_sent
    }

    #[inline]
    pub fn cmd_sent(&self) -> bool {
        self.cmd_sent
    }

    #[inline]
    pub fn is_winner(&self) -> bool {
        self.winner
    }

    #[inline]
    pub fn fw_ready(&self) -> bool {
        self.fw_ready
    }

    #[inline]
    pub fn last_event_cause(&self) -> u32 {
        self.last_event_cause
    }

    #[inline]
    pub fn debug_ring(&self) -> &MpDebugRing {
        &self.dbg
    }

    /// 最近一次无人认领的命令响应
    pub fn unsolicited_resp(&self) -> &[u8] {
        &self.upld_buf[..self.upld_len]
    }

    #[inline]
    pub fn new_mode(&self) -> bool {
        self.dev.supports_sdio_new_mode
    }

    #[inline]
    pub fn is_removed(&self) -> bool {
        self.removed
    }

    #[inline]
    pub(crate) fn ensure_present(&self) -> SdioResult {
        if self.removed {
            Err(SdioError::DeviceRemoved)
        } else {
            Ok(())
        }
    }

    /// 下一条命令的响应将投递给上层（命令经其他路径下发时由上层登记）
    pub fn expect_cmd_response(&mut self) {
        self.cmd_pending = true;
    }

    #[inline]
    pub(crate) fn upcall(&mut self, u: Upcall) {
        self.upcalls.push_back(u);
    }

    /// 取走持锁期间排队的上行投递
    pub fn take_upcalls(&mut self) -> VecDeque<Upcall> {
        core::mem::take(&mut self.upcalls)
    }

    /// 发送缓冲结束，交回上层
    pub(crate) fn complete_tx(&mut self, buf: TransferBuffer, ty: PacketType, status: SdioResult) {
        if status.is_err() {
            self.stats.tx_failed += 1;
        }
        self.upcall(Upcall::TxComplete { buf, ty, status });
    }

    /// CMD52 读，失败映射为 Bus 错误
    pub(crate) fn read_reg(&self, addr: u8) -> SdioResult<u8> {
        self.func.readb(addr as u32).map_err(SdioError::Bus)
    }

    pub(crate) fn write_reg(&self, addr: u8, val: u8) -> SdioResult {
        self.func.writeb(addr as u32, val).map_err(SdioError::Bus)
    }

    /// 读-改-写：置位
    pub(crate) fn set_reg_bits(&self, addr: u8, bits: u8) -> SdioResult {
        let v = self.read_reg(addr)?;
        self.write_reg(addr, v | bits)
    }

    /// 保存无人认领的命令响应（最多 MWIFIEX_UPLD_SIZE 字节）
    pub(crate) fn stash_unsolicited(&mut self, data: &[u8]) {
        let n = data.len().min(MWIFIEX_UPLD_SIZE);
        self.upld_buf[..n].copy_from_slice(&data[..n]);
        self.upld_len = n;
    }

    /// 设备被拔出：之后所有操作立即失败
    pub fn surprise_removed(&mut self) {
        if self.removed {
            return;
        }
        log::warn!(target: LOG_TARGET, "{}: device removed", self.dev.name);
        self.removed = true;
        self.release_inflight();
    }

    /// 以失败状态归还所有在途发送缓冲，丢弃接收队列与未完成的接收批次
    pub(crate) fn release_inflight(&mut self) {
        for slot in self.mpa_tx.take() {
            self.complete_tx(slot.buf, slot.ty, Err(SdioError::DeviceRemoved));
        }
        self.mpa_rx.reset();
        let dropped = self.rx_queue.purge();
        if dropped > 0 {
            log::debug!(target: LOG_TARGET, "dropped {} queued rx packets", dropped);
        }
        if self.timer_armed {
            self.timer_armed = false;
            self.upcall(Upcall::StopTimer);
        }
        self.data_sent = false;
        self.cmd_sent = false;
        self.cmd_pending = false;
    }

    /// 从接收队列取一个数据包（rx_work 模式）
    pub fn dequeue_rx(&mut self) -> Option<TransferBuffer> {
        self.rx_queue.pop_head()
    }

    pub fn rx_queue_len(&self) -> usize {
        self.rx_queue.len()
    }

    /// 上层收窄写端口范围（固件硬件规格响应中给出）
    pub fn update_mp_end_port(&mut self, port: u8) -> bool {
        self.ports.update_mp_end_port(port)
    }
}
