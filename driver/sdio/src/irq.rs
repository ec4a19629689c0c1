//! 中断派发
//!
//! 每次中断：一次 CMD53 读出整段寄存器快照，然后依次处理写端口释放、命令通道上行
//! （新寻址模式）与数据端口上行。快照读失败或内容越界时按上次已知的位图修正，
//! 不让中断路径失败。
//!
//! 状态位处理顺序：
//!
//! 1. DN_LD_CMD_PORT：命令已被卡取走（新模式）
//! 2. DN_LD：刷新写位图，旧模式下控制端口位同时表示命令已发出
//! 3. UP_LD_CMD_PORT：从命令通道读一个命令响应或事件（新模式）
//! 4. UP_LD：刷新读位图，循环分配读端口直到取不出为止，最后刷出未满的接收批次

use mmc::SdioFunc;
use xfer::TransferBuffer;

use crate::card::CardContext;
use crate::error::{SdioError, SdioResult};
use crate::io::{abort_transfer, read_data_sync, with_abort_retry};
use crate::retry::{with_retry, Attempt, RetryError};
use crate::router::WireHeader;
use crate::types::{
    int_status, PacketType, CMD_PORT_SLCT, CTRL_PORT_MASK, INTF_HEADER_LEN,
    MWIFIEX_RX_DATA_BUF_SIZE, MWIFIEX_SDIO_BYTE_MODE_MASK, REG_PORT,
};

const LOG_TARGET: &str = "mwifiex::sdio::irq";

impl<F: SdioFunc> CardContext<F> {
    /// 中断服务入口。协议违例只计入统计；总线失败时向卡发 abort 并放弃本次中断剩余的处理。
    pub fn process_interrupt(&mut self) -> SdioResult {
        self.ensure_present()?;
        self.stats.interrupts += 1;
        self.read_snapshot();

        let reg = self.reg;
        let sdio_ireg = self.mp_regs[reg.host_int_status_reg as usize];
        if sdio_ireg == 0 {
            log::trace!(target: LOG_TARGET, "spurious interrupt");
            return Ok(());
        }
        log::debug!(target: LOG_TARGET, "int status {:#04x}", sdio_ireg);

        self.handle_download(sdio_ireg);
        let res = self.handle_upload(sdio_ireg);
        if let Err(e) = res {
            let n = self.mpa_rx.reset();
            self.stats.rx_failed += n as u32;
            log::error!(
                target: LOG_TARGET,
                "interrupt processing aborted: {:?}, dropped {} pending rx",
                e,
                n
            );
            abort_transfer(&self.func);
            self.stats.aborts += 1;
        }
        res
    }

    fn handle_download(&mut self, sdio_ireg: u8) {
        let new_mode = self.new_mode();
        if new_mode && sdio_ireg & int_status::DN_LD_CMD_PORT_HOST_INT_STATUS != 0 {
            if !self.cmd_sent {
                log::warn!(target: LOG_TARGET, "cmd port download without cmd in flight");
            }
            self.cmd_sent = false;
        }
        if sdio_ireg & int_status::DN_LD_HOST_INT_STATUS == 0 {
            return;
        }
        let bitmap = self.snapshot_wr_bitmap();
        let dropped = self.ports.refresh_write(bitmap);
        if self.dev.has_control_mask {
            if dropped & CTRL_PORT_MASK != 0 {
                self.cmd_sent = false;
            }
        } else if dropped != 0 {
            self.stats.stale_port_bits += dropped.count_ones();
        }
        if self.data_sent && self.ports.write_port_free() {
            self.data_sent = false;
        }
        log::trace!(
            target: LOG_TARGET,
            "wr_bitmap={:#010x} data_sent={} cmd_sent={}",
            self.ports.wr_bitmap(),
            self.data_sent,
            self.cmd_sent
        );
    }

    fn handle_upload(&mut self, sdio_ireg: u8) -> SdioResult {
        if self.new_mode() && sdio_ireg & int_status::UP_LD_CMD_PORT_HOST_INT_STATUS != 0 {
            self.read_cmd_port()?;
        }
        if sdio_ireg & int_status::UP_LD_HOST_INT_STATUS == 0 {
            return Ok(());
        }

        let bitmap = self.snapshot_rd_bitmap();
        let dropped = self.ports.refresh_read(bitmap);
        if dropped != 0 {
            self.stats.stale_port_bits += dropped.count_ones();
        }
        self.drop_stale_read_ports();
        log::trace!(target: LOG_TARGET, "rd_bitmap={:#010x}", self.ports.rd_bitmap());

        let max_len = if self.mpa_rx.enabled() {
            self.mpa_rx.buf_size()
        } else {
            MWIFIEX_RX_DATA_BUF_SIZE
        };
        while let Some(port) = self.ports.allocate_read_port() {
            let rx_len = self.port_rx_len(port);
            let padded = rx_len.div_ceil(self.block_size) * self.block_size;
            if rx_len <= INTF_HEADER_LEN || padded > max_len {
                log::warn!(target: LOG_TARGET, "port {}: invalid rx_len {}", port, rx_len);
                self.stats.rx_dropped += 1;
                // 被跳过的端口会打断批次的端口连续性
                self.flush_rx()?;
                continue;
            }
            log::trace!(target: LOG_TARGET, "port {} rx_len {}", port, rx_len);
            self.card_to_host_mp_aggr(port, padded)?;
        }
        self.flush_rx()
    }

    /// 清掉读位图中长度寄存器为 0 的端口
    fn drop_stale_read_ports(&mut self) {
        for port in 0..self.ports.max_ports() {
            if self.ports.rd_bitmap() & (1u32 << port) == 0 {
                continue;
            }
            if self.port_rx_len(port) == 0 {
                log::warn!(target: LOG_TARGET, "port {} flagged with zero length", port);
                self.ports.drop_read_bit(port);
                self.stats.stale_port_bits += 1;
            }
        }
    }

    /// 新模式命令通道：读一个命令响应或事件
    fn read_cmd_port(&mut self) -> SdioResult {
        let reg = self.reg;
        let rx_len = u16::from_le_bytes([
            self.mp_regs[reg.cmd_rd_len_0 as usize],
            self.mp_regs[reg.cmd_rd_len_1 as usize],
        ]) as usize;
        let padded = rx_len.div_ceil(self.block_size) * self.block_size;
        if rx_len <= INTF_HEADER_LEN || padded > MWIFIEX_RX_DATA_BUF_SIZE {
            log::warn!(target: LOG_TARGET, "cmd port: invalid rx_len {}", rx_len);
            self.stats.rx_dropped += 1;
            return Ok(());
        }
        let mut buf = TransferBuffer::try_alloc(padded).map_err(|_| {
            self.stats.rx_alloc_fail += 1;
            SdioError::NoMemory
        })?;
        let addr = self.ioport | CMD_PORT_SLCT;
        let block = self.block_size;
        with_abort_retry(
            &self.func,
            self.cfg.max_read_retry,
            &mut self.stats,
            "cmd port read",
            |f| read_data_sync(f, block, addr, buf.room_mut()),
        )?;
        buf.set_len(padded);

        let ty = WireHeader::parse(buf.data()).and_then(|h| PacketType::from_wire(h.tag));
        match ty {
            Some(PacketType::Cmd) | Some(PacketType::Event) => self.decode_rx_packet(buf),
            _ => {
                log::warn!(target: LOG_TARGET, "cmd port: unexpected packet {:?}", ty);
                self.stats.rx_dropped += 1;
            }
        }
        Ok(())
    }

    /// 快照中端口 `port` 的读长度
    fn port_rx_len(&self, port: u8) -> usize {
        let (l, u) = self.reg.rd_len_regs(port);
        u16::from_le_bytes([self.mp_regs[l], self.mp_regs[u]]) as usize
    }

    fn snapshot_bitmap(&self, l: u8, u: u8, l1: u8, u1: u8) -> u32 {
        let r = &self.mp_regs;
        let mut bitmap = r[l as usize] as u32 | (r[u as usize] as u32) << 8;
        if self.new_mode() {
            bitmap |= (r[l1 as usize] as u32) << 16 | (r[u1 as usize] as u32) << 24;
        }
        bitmap
    }

    fn store_bitmap(&mut self, l: u8, u: u8, l1: u8, u1: u8, bitmap: u32) {
        self.mp_regs[l as usize] = bitmap as u8;
        self.mp_regs[u as usize] = (bitmap >> 8) as u8;
        if self.new_mode() {
            self.mp_regs[l1 as usize] = (bitmap >> 16) as u8;
            self.mp_regs[u1 as usize] = (bitmap >> 24) as u8;
        }
    }

    pub(crate) fn snapshot_rd_bitmap(&self) -> u32 {
        let r = self.reg;
        self.snapshot_bitmap(r.rd_bitmap_l, r.rd_bitmap_u, r.rd_bitmap_1l, r.rd_bitmap_1u)
    }

    pub(crate) fn snapshot_wr_bitmap(&self) -> u32 {
        let r = self.reg;
        self.snapshot_bitmap(r.wr_bitmap_l, r.wr_bitmap_u, r.wr_bitmap_1l, r.wr_bitmap_1u)
    }

    /// 读寄存器快照，失败时在两次尝试之间 abort
    fn read_snapshot(&mut self) {
        let n = self.reg.max_mp_regs as usize;
        let func = &self.func;
        let regs = &mut self.mp_regs;
        let stats = &mut self.stats;
        let res = with_retry(
            self.cfg.snapshot_retry,
            |_| {
                read_data_sync(func, 1, REG_PORT | MWIFIEX_SDIO_BYTE_MODE_MASK, &mut regs[..n])
                    .map_err(Attempt::Transient)
            },
            |i, e| {
                log::warn!(target: LOG_TARGET, "read mp_regs failed: {}, attempt {}", e, i + 1);
                abort_transfer(func);
                stats.aborts += 1;
            },
        );
        match res {
            Ok(()) => self.sanitize_snapshot(),
            Err(e) => self.recover_snapshot(e),
        }
    }

    /// 只保留可信的位：中断状态限于 sdio_int_mask，位图限于端口掩码
    fn sanitize_snapshot(&mut self) {
        let reg = self.reg;
        let st = reg.host_int_status_reg as usize;
        let mut fixed = false;
        let raw = self.mp_regs[st];
        if raw & !reg.sdio_int_mask != 0 {
            self.mp_regs[st] = raw & reg.sdio_int_mask;
            fixed = true;
        }
        let rd = self.snapshot_rd_bitmap();
        let rd_mask = self.ports.read_mask();
        if rd & !rd_mask != 0 {
            self.store_bitmap(
                reg.rd_bitmap_l,
                reg.rd_bitmap_u,
                reg.rd_bitmap_1l,
                reg.rd_bitmap_1u,
                rd & rd_mask,
            );
            fixed = true;
        }
        let wr = self.snapshot_wr_bitmap();
        let wr_mask = if self.dev.has_control_mask {
            self.ports.write_mask() | CTRL_PORT_MASK
        } else {
            self.ports.write_mask()
        };
        if wr & !wr_mask != 0 {
            self.store_bitmap(
                reg.wr_bitmap_l,
                reg.wr_bitmap_u,
                reg.wr_bitmap_1l,
                reg.wr_bitmap_1u,
                wr & wr_mask,
            );
            fixed = true;
        }
        if fixed {
            log::warn!(
                target: LOG_TARGET,
                "mp_regs inconsistent (status {:#04x} rd {:#010x} wr {:#010x}), masked",
                raw,
                rd,
                wr
            );
            self.stats.snapshot_recovered += 1;
        }
    }

    /// 快照读不出来：读侧视为空，写侧沿用上次已知的位图
    fn recover_snapshot(&mut self, e: RetryError<i32>) {
        log::warn!(target: LOG_TARGET, "mp_regs unreadable ({:?}), using last known bitmaps", e);
        self.mp_regs.fill(0);
        let reg = self.reg;
        let wr = self.ports.wr_bitmap();
        if wr != 0 {
            self.mp_regs[reg.host_int_status_reg as usize] = int_status::DN_LD_HOST_INT_STATUS;
            self.store_bitmap(reg.wr_bitmap_l, reg.wr_bitmap_u, reg.wr_bitmap_1l, reg.wr_bitmap_1u, wr);
        }
        self.stats.snapshot_recovered += 1;
    }
}
