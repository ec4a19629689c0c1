//! 接收路径：多端口读聚合与拆包

use mmc::SdioFunc;
use xfer::TransferBuffer;

use super::{decide_rx, rx_span_reached, AggrAction, RxInputs, RxSlot};
use crate::card::{CardContext, MpTrace};
use crate::error::{SdioError, SdioResult};
use crate::io::{read_data_sync, with_abort_retry};
use crate::types::CTRL_PORT;

const LOG_TARGET: &str = "mwifiex::sdio::aggr";

impl<F: SdioFunc> CardContext<F> {
    /// 处理一个刚分配到的读端口，`rx_len` 已按块对齐。
    ///
    /// 按决策表选择折入当前批次、先刷出再折入，或单独读取。
    pub(crate) fn card_to_host_mp_aggr(&mut self, port: u8, rx_len: usize) -> SdioResult {
        let eligible = self.mpa_rx.enabled() && !(self.ports.ctrl_reserved() && port == CTRL_PORT);
        let inputs = RxInputs {
            eligible,
            more_pending: self.ports.has_pending_data(),
            open: self.mpa_rx.is_open(),
            fits: self.mpa_rx.has_room(rx_len),
        };
        let action = decide_rx(&inputs);
        log::trace!(target: LOG_TARGET, "rx port {} len {}: {:?}", port, rx_len, action);

        match action {
            AggrAction::Single => self.rx_single(port, rx_len, None),
            AggrAction::FlushThenSingle => {
                self.flush_rx()?;
                self.rx_single(port, rx_len, None)
            }
            AggrAction::FlushThenFold => {
                self.flush_rx()?;
                self.rx_fold(port, rx_len, false)
            }
            AggrAction::Fold => self.rx_fold(port, rx_len, false),
            AggrAction::FoldAndFlush => self.rx_fold(port, rx_len, true),
        }
    }

    fn rx_fold(&mut self, port: u8, rx_len: usize, flush: bool) -> SdioResult {
        let buf = if self.mpa_rx.is_scatter() {
            Some(self.alloc_rx(rx_len)?)
        } else {
            None
        };
        let slot = RxSlot {
            port,
            len: rx_len,
            buf,
        };
        let folded = self.mpa_rx.fold(
            slot,
            self.dev.supports_sdio_new_mode,
            self.reg.start_rd_port,
            self.ports.max_ports(),
        );
        if let Err(slot) = folded {
            // 超过聚合容量，或与批次不相邻
            self.flush_rx()?;
            return self.rx_single(slot.port, slot.len, slot.buf);
        }
        let span = rx_span_reached(
            self.ports.curr_rd_port(),
            self.mpa_rx.start_port(),
            self.ports.max_ports(),
            self.dev.mp_agg_pkt_limit,
        );
        if flush || self.mpa_rx.limit_reached() || span {
            return self.flush_rx();
        }
        Ok(())
    }

    fn alloc_rx(&mut self, len: usize) -> SdioResult<TransferBuffer> {
        TransferBuffer::try_alloc(len).map_err(|_| {
            log::error!(target: LOG_TARGET, "rx: cannot allocate {} bytes", len);
            self.stats.rx_alloc_fail += 1;
            SdioError::NoMemory
        })
    }

    /// 刷出接收批次：一次读入后按各端口登记的长度拆分，逐个交给路由。
    /// 只含一个端口的批次直接读入目的缓冲。
    pub(crate) fn flush_rx(&mut self) -> SdioResult {
        match self.mpa_rx.pkt_cnt() {
            0 => return Ok(()),
            1 => {
                let Some(slot) = self.mpa_rx.take().pop() else {
                    return Ok(());
                };
                return self.rx_single(slot.port, slot.len, slot.buf);
            }
            _ => {}
        }
        let addr = self.mpa_rx.mport(self.ioport, self.dev.supports_sdio_new_mode);
        let trace = MpTrace {
            start_port: self.mpa_rx.start_port(),
            ports: self.mpa_rx.ports(),
            len: self.mpa_rx.buf_len(),
        };
        let block = self.block_size;
        let batch = &mut self.mpa_rx;
        let res = with_abort_retry(
            &self.func,
            self.cfg.max_read_retry,
            &mut self.stats,
            "mp rx",
            |f| batch.read(f, addr, block),
        );
        self.dbg.record_rd(trace);
        if let Err(e) = res {
            let n = self.mpa_rx.reset();
            self.stats.rx_failed += n as u32;
            log::error!(
                target: LOG_TARGET,
                "mp rx {:#x} failed: {:?}, dropped {} pkts",
                addr,
                e,
                n
            );
            self.dbg.dump();
            return Err(e);
        }

        let bufs = self.mpa_rx.split();
        self.stats.rx_aggr_batches += 1;
        self.stats.rx_aggr_pkts += bufs.len() as u32;
        for buf in bufs {
            self.decode_rx_packet(buf);
        }
        Ok(())
    }

    /// 单端口读
    fn rx_single(&mut self, port: u8, rx_len: usize, buf: Option<TransferBuffer>) -> SdioResult {
        let mut buf = match buf {
            Some(buf) => buf,
            None => self.alloc_rx(rx_len)?,
        };
        let addr = self.ioport + port as u32;
        let block = self.block_size;
        let res = with_abort_retry(
            &self.func,
            self.cfg.max_read_retry,
            &mut self.stats,
            "rx read",
            |f| read_data_sync(f, block, addr, &mut buf.room_mut()[..rx_len]),
        );
        if let Err(e) = res {
            self.stats.rx_failed += 1;
            log::error!(target: LOG_TARGET, "rx port {} failed: {:?}", port, e);
            return Err(e);
        }
        buf.set_len(rx_len);
        self.stats.rx_single += 1;
        self.decode_rx_packet(buf);
        Ok(())
    }
}
