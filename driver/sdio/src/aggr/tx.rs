//! 发送路径：host_to_card 与多端口写聚合

use mmc::SdioFunc;
use xfer::TransferBuffer;

use super::{decide_tx, tx_span_reached, AggrAction, TxInputs, TxPort, TxSlot};
use crate::card::{CardContext, MpTrace};
use crate::error::{SdioError, SdioResult};
use crate::io::{with_abort_retry, write_data_sync};
use crate::ops::Upcall;
use crate::router::WireHeader;
use crate::types::{PacketType, CMD_PORT_SLCT, CTRL_PORT, INTF_HEADER_LEN, MWIFIEX_UPLD_SIZE};

const LOG_TARGET: &str = "mwifiex::sdio::aggr";

/// 提交失败
#[derive(Debug)]
pub enum HostToCardError {
    /// 没有可写端口，缓冲原样交还，等下一次写端口中断后重交
    Busy(TransferBuffer),
    /// 传输失败，缓冲已经以失败状态经 `on_tx_complete` 交还
    Failed(SdioError),
}

impl HostToCardError {
    pub fn error(&self) -> SdioError {
        match self {
            HostToCardError::Busy(_) => SdioError::Busy,
            HostToCardError::Failed(e) => *e,
        }
    }
}

impl From<HostToCardError> for axerrno::AxError {
    fn from(e: HostToCardError) -> Self {
        e.error().into()
    }
}

impl<F: SdioFunc> CardContext<F> {
    /// 提交一个发送缓冲。
    ///
    /// `buf` 的前 4 字节预留给接口头，由这里填写；`next_pkt_len` 为上层队列中下一个
    /// 包的长度（没有则为 0），决定是否值得继续聚合。返回值只反映当前缓冲：因聚合
    /// 而提前刷出的其他缓冲各自通过 `on_tx_complete` 报告。
    pub fn host_to_card(
        &mut self,
        ty: PacketType,
        mut buf: TransferBuffer,
        next_pkt_len: usize,
    ) -> Result<(), HostToCardError> {
        if let Err(e) = self.ensure_present() {
            self.complete_tx(buf, ty, Err(e));
            return Err(HostToCardError::Failed(e));
        }
        let len = buf.len();
        let max = match ty {
            PacketType::Cmd => MWIFIEX_UPLD_SIZE,
            PacketType::Data => u16::MAX as usize,
            _ => 0,
        };
        if len < INTF_HEADER_LEN || len > max {
            log::warn!(target: LOG_TARGET, "tx {:?}: invalid length {}", ty, len);
            let e = SdioError::InvalidLength(len);
            self.complete_tx(buf, ty, Err(e));
            return Err(HostToCardError::Failed(e));
        }

        let port = if ty == PacketType::Cmd {
            TxPort::Cmd
        } else {
            match self.ports.allocate_write_port() {
                Some(p) => TxPort::Data(p),
                None => {
                    log::trace!(
                        target: LOG_TARGET,
                        "no write port, wr_bitmap={:#010x}",
                        self.ports.wr_bitmap()
                    );
                    self.data_sent = true;
                    return Err(HostToCardError::Busy(buf));
                }
            }
        };

        WireHeader {
            len: len as u16,
            tag: ty.tag(),
        }
        .write(buf.data_mut());
        let wire_len = buf.pad_to_block(self.block_size);
        let slot = TxSlot {
            buf,
            ty,
            port,
            wire_len,
        };

        let result = match port {
            TxPort::Cmd => {
                self.cmd_sent = true;
                self.cmd_pending = true;
                self.tx_single(slot)
            }
            TxPort::Data(p) => self.tx_aggregate(slot, p, next_pkt_len),
        };

        match (result, port) {
            (Err(_), TxPort::Cmd) => {
                self.cmd_sent = false;
                self.cmd_pending = false;
            }
            (Err(_), TxPort::Data(p)) => {
                self.data_sent = false;
                self.ports.restore_write_port(p);
            }
            (Ok(()), TxPort::Data(_)) => self.data_sent = !self.ports.write_port_free(),
            (Ok(()), TxPort::Cmd) => {}
        }
        self.sync_flush_timer();
        result.map_err(HostToCardError::Failed)
    }

    /// 写端口中断迟迟不来时由刷新定时器调用
    pub fn on_flush_timer(&mut self) -> SdioResult {
        self.timer_armed = false;
        self.ensure_present()?;
        if self.mpa_tx.is_open() {
            log::debug!(
                target: LOG_TARGET,
                "flush timer: {} pkts pending",
                self.mpa_tx.pkt_cnt()
            );
        }
        self.flush_tx()
    }

    fn tx_aggregate(&mut self, slot: TxSlot, port: u8, next_pkt_len: usize) -> SdioResult {
        let block = self.block_size;
        let next_wire = next_pkt_len.div_ceil(block) * block;
        let inputs = TxInputs {
            eligible: self.mpa_tx.enabled(),
            more_queued: next_pkt_len > 0,
            open: self.mpa_tx.is_open(),
            fits: self.mpa_tx.has_room(slot.wire_len),
            fits_with_next: self.mpa_tx.has_room(slot.wire_len + next_wire),
            next_port_free: self.ports.write_port_free(),
        };
        let action = decide_tx(&inputs);
        log::trace!(
            target: LOG_TARGET,
            "tx port {} len {} next {}: {:?}",
            port,
            slot.wire_len,
            next_pkt_len,
            action
        );

        if matches!(action, AggrAction::FlushThenFold | AggrAction::FlushThenSingle) {
            // 先前折入的包各自报告结果
            let _ = self.flush_tx();
        }
        if matches!(action, AggrAction::Single | AggrAction::FlushThenSingle) {
            return self.tx_single(slot);
        }

        let new_mode = self.new_mode();
        let (max_ports, end_port) = (self.ports.max_ports(), self.ports.mp_end_port());
        if let Err(slot) = self.mpa_tx.fold(slot, new_mode, max_ports, end_port) {
            return self.tx_single(slot);
        }
        let span = tx_span_reached(
            self.ports.curr_wr_port(),
            self.mpa_tx.start_port(),
            end_port,
            max_ports,
            self.ports.ctrl_reserved(),
            self.dev.mp_agg_pkt_limit,
        );
        if action == AggrAction::FoldAndFlush || self.mpa_tx.limit_reached() || span {
            return self.flush_tx();
        }
        Ok(())
    }

    /// 单包发送：数据走端口地址，命令走控制端口或命令通道
    fn tx_single(&mut self, slot: TxSlot) -> SdioResult {
        let addr = match slot.port {
            TxPort::Data(p) => self.ioport + p as u32,
            TxPort::Cmd if self.new_mode() => self.ioport | CMD_PORT_SLCT,
            TxPort::Cmd => self.ioport + CTRL_PORT as u32,
        };
        let block = self.block_size;
        let wire = slot.wire();
        let res = with_abort_retry(
            &self.func,
            self.cfg.max_write_retry,
            &mut self.stats,
            "tx write",
            |f| write_data_sync(f, block, addr, wire),
        );
        match res {
            Ok(()) => self.stats.tx_single += 1,
            Err(e) => log::error!(
                target: LOG_TARGET,
                "tx {:?} to {:#x} failed: {:?}",
                slot.ty,
                addr,
                e
            ),
        }
        self.complete_tx(slot.buf, slot.ty, res);
        res
    }

    /// 刷出发送批次；空批次不产生任何总线传输
    pub(crate) fn flush_tx(&mut self) -> SdioResult {
        if !self.mpa_tx.is_open() {
            self.sync_flush_timer();
            return Ok(());
        }
        let addr = self.mpa_tx.mport(self.ioport, self.new_mode());
        let trace = MpTrace {
            start_port: self.mpa_tx.start_port(),
            ports: self.mpa_tx.ports(),
            len: self.mpa_tx.buf_len(),
        };
        let block = self.block_size;
        let batch = &self.mpa_tx;
        let res = with_abort_retry(
            &self.func,
            self.cfg.max_write_retry,
            &mut self.stats,
            "mp tx",
            |f| batch.write(f, addr, block),
        );
        self.dbg.record_wr(trace);

        let slots = self.mpa_tx.take();
        match res {
            Ok(()) => {
                self.stats.tx_aggr_batches += 1;
                self.stats.tx_aggr_pkts += slots.len() as u32;
                log::trace!(
                    target: LOG_TARGET,
                    "mp tx {:#x}: {} pkts {} bytes",
                    addr,
                    slots.len(),
                    trace.len
                );
            }
            Err(e) => {
                log::error!(
                    target: LOG_TARGET,
                    "mp tx {:#x} failed: {:?}, releasing {} pkts",
                    addr,
                    e,
                    slots.len()
                );
                self.dbg.dump();
            }
        }
        for slot in slots {
            self.complete_tx(slot.buf, slot.ty, res);
        }
        self.sync_flush_timer();
        res
    }

    /// 批次打开时请求刷新定时器，关闭时撤销
    fn sync_flush_timer(&mut self) {
        match (self.mpa_tx.is_open(), self.timer_armed) {
            (true, false) => {
                self.timer_armed = true;
                self.upcall(Upcall::StartTimer(self.cfg.tx_flush_timeout_ms));
            }
            (false, true) => {
                self.timer_armed = false;
                self.upcall(Upcall::StopTimer);
            }
            _ => {}
        }
    }
}
