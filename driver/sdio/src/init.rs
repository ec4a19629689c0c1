//! 设备上下文构造与总线初始化
//!
//! 对应 attach 的前半段：分配快照与聚合缓冲、使能 function、确定 I/O 端口基址、
//! 打开中断读清与自动重使能，以及主机中断屏蔽与卡唤醒。

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use mmc::SdioFunc;
use xfer::BufQueue;

use crate::aggr::{RxBatch, Staging, TxBatch};
use crate::card::{CardContext, MpDebugRing, Stats};
use crate::config::SdioConfig;
use crate::error::{SdioError, SdioResult};
use crate::port::PortAllocator;
use crate::regs::SdioDevice;
use crate::types::{
    cfg, AUTO_RE_ENABLE_INT, CMD53_NEW_MODE, CMD_PORT_AUTO_EN, CMD_PORT_RD_LEN_EN, MEM_PORT,
    MWIFIEX_MP_AGGR_BUF_SIZE_32K, MWIFIEX_MP_AGGR_BUF_SIZE_MAX, MWIFIEX_UPLD_SIZE,
};

const LOG_TARGET: &str = "mwifiex::sdio";

/// 按 `size` 分配 staging；失败返回 None
fn alloc_staging(size: usize, sg: bool) -> Option<Staging> {
    Staging::try_alloc(size, sg).ok()
}

impl<F: SdioFunc> CardContext<F> {
    /// 构造设备上下文，不访问总线
    pub fn new(func: F, dev: &'static SdioDevice, cfg: SdioConfig) -> SdioResult<Self> {
        if cfg.block_size == 0 || cfg.block_size > u16::MAX as usize {
            return Err(SdioError::InvalidLength(cfg.block_size));
        }
        let reg = dev.reg;
        let mut mp_regs = Vec::new();
        mp_regs
            .try_reserve_exact(reg.max_mp_regs as usize)
            .map_err(|_| SdioError::NoMemory)?;
        mp_regs.resize(reg.max_mp_regs as usize, 0);
        let mut upld_buf = Vec::new();
        upld_buf
            .try_reserve_exact(MWIFIEX_UPLD_SIZE)
            .map_err(|_| SdioError::NoMemory)?;
        upld_buf.resize(MWIFIEX_UPLD_SIZE, 0);

        let mut card = Self {
            func,
            dev,
            reg,
            block_size: cfg.block_size,
            cfg,
            ioport: 0,
            ports: PortAllocator::new(dev),
            mp_regs,
            mpa_tx: TxBatch::disabled(),
            mpa_rx: RxBatch::disabled(),
            data_sent: false,
            cmd_sent: false,
            cmd_pending: false,
            upld_buf,
            upld_len: 0,
            rx_queue: BufQueue::new(),
            upcalls: VecDeque::new(),
            timer_armed: false,
            removed: false,
            winner: false,
            fw_ready: false,
            last_event_cause: 0,
            stats: Stats::default(),
            dbg: MpDebugRing::default(),
        };
        card.alloc_mpa_buffers();
        Ok(card)
    }

    /// 分配聚合缓冲：先按芯片给出的大小，失败且芯片要求最大缓冲时退到 32K 并关闭
    /// 固件侧接收聚合，再失败则关闭多端口聚合。
    fn alloc_mpa_buffers(&mut self) {
        let sg = self.func.supports_sg();
        let limit = self.dev.mp_agg_pkt_limit as usize;
        let (tx_size, rx_size) = (self.dev.mp_tx_agg_buf_size, self.dev.mp_rx_agg_buf_size);

        let mut sizes = Some((tx_size, rx_size));
        while let Some((tx, rx)) = sizes {
            let tx_staging = if self.cfg.mpa_tx { alloc_staging(tx, sg) } else { None };
            let rx_staging = if self.cfg.mpa_rx { alloc_staging(rx, sg) } else { None };
            let ok = (tx_staging.is_some() || !self.cfg.mpa_tx)
                && (rx_staging.is_some() || !self.cfg.mpa_rx);
            if ok {
                self.mpa_tx = tx_staging.map_or_else(TxBatch::disabled, |s| TxBatch::new(s, tx, limit));
                self.mpa_rx = rx_staging.map_or_else(RxBatch::disabled, |s| RxBatch::new(s, rx, limit));
                log::debug!(
                    target: LOG_TARGET,
                    "mpa buffers: tx {} rx {} limit {} sg {}",
                    self.mpa_tx.buf_size(),
                    self.mpa_rx.buf_size(),
                    limit,
                    sg
                );
                return;
            }
            sizes = if tx == MWIFIEX_MP_AGGR_BUF_SIZE_MAX || rx == MWIFIEX_MP_AGGR_BUF_SIZE_MAX {
                log::warn!(target: LOG_TARGET, "mpa buffers {}/{} unavailable, retry 32K", tx, rx);
                self.cfg.sdio_rx_aggr = false;
                Some((MWIFIEX_MP_AGGR_BUF_SIZE_32K, MWIFIEX_MP_AGGR_BUF_SIZE_32K))
            } else {
                None
            };
        }
        log::warn!(target: LOG_TARGET, "mpa buffers unavailable, aggregation disabled");
        self.mpa_tx = TxBatch::disabled();
        self.mpa_rx = RxBatch::disabled();
    }

    /// 使能 function、设置块大小并注册中断
    pub fn register_dev(&mut self) -> SdioResult {
        self.ensure_present()?;
        self.func.enable_func().map_err(|e| {
            log::error!(target: LOG_TARGET, "{}: enable func failed: {}", self.dev.name, e);
            SdioError::Bus(e)
        })?;
        let setup = self
            .func
            .set_block_size(self.block_size as u16)
            .and_then(|_| self.func.claim_irq(None));
        if let Err(e) = setup {
            log::error!(target: LOG_TARGET, "{}: bus setup failed: {}", self.dev.name, e);
            let _ = self.func.disable_func();
            return Err(SdioError::Bus(e));
        }
        log::info!(
            target: LOG_TARGET,
            "{}: registered, block size {}",
            self.dev.name,
            self.block_size
        );
        Ok(())
    }

    /// 释放中断并关闭 function。尽力而为，错误只记日志。
    pub fn unregister_dev(&mut self) {
        if let Err(e) = self.func.release_irq() {
            log::warn!(target: LOG_TARGET, "release irq failed: {}", e);
        }
        if let Err(e) = self.func.disable_func() {
            log::warn!(target: LOG_TARGET, "disable func failed: {}", e);
        }
    }

    /// 确定 CMD53 端口基址；新模式同时打开多端口寻址与命令通道长度寄存器
    pub fn init_ioport(&mut self) -> SdioResult {
        let reg = self.reg;
        if self.dev.supports_sdio_new_mode {
            self.set_reg_bits(reg.card_cfg_2_1_reg, CMD53_NEW_MODE)?;
            self.set_reg_bits(reg.cmd_cfg_0, CMD_PORT_RD_LEN_EN)?;
            self.set_reg_bits(reg.cmd_cfg_1, CMD_PORT_AUTO_EN)?;
            self.ioport = MEM_PORT;
        } else {
            let b0 = self.read_reg(reg.io_port_0_reg)?;
            let b1 = self.read_reg(reg.io_port_1_reg)?;
            let b2 = self.read_reg(reg.io_port_2_reg)?;
            self.ioport = u32::from_le_bytes([b0, b1, b2, 0]);
        }
        log::debug!(target: LOG_TARGET, "ioport {:#x}", self.ioport);
        Ok(())
    }

    /// 总线初始化。任一寄存器访问失败即返回，不在这一层重试。
    pub fn init_sdio(&mut self) -> SdioResult {
        self.ensure_present()?;
        let reg = self.reg;
        // 先读一次中断状态，清掉上电残留
        self.read_reg(reg.host_int_status_reg)?;
        self.init_ioport()?;
        self.set_reg_bits(reg.host_int_rsr_reg, reg.sdio_int_mask)?;
        self.set_reg_bits(reg.card_misc_cfg_reg, AUTO_RE_ENABLE_INT)?;

        self.ports.reset();
        self.mpa_tx.take();
        self.mpa_rx.reset();
        self.data_sent = false;
        self.cmd_sent = false;
        self.cmd_pending = false;
        log::info!(
            target: LOG_TARGET,
            "{}: bus ready, ioport {:#x}, {} ports, new mode {}",
            self.dev.name,
            self.ioport,
            self.dev.max_ports,
            self.dev.supports_sdio_new_mode
        );
        Ok(())
    }

    /// 打开主机侧中断屏蔽
    pub fn enable_host_int(&mut self) -> SdioResult {
        self.ensure_present()?;
        self.write_reg(self.reg.host_int_mask_reg, self.reg.host_int_enable)
            .inspect_err(|e| log::error!(target: LOG_TARGET, "enable host int failed: {:?}", e))
    }

    /// 关闭主机侧中断屏蔽
    pub fn disable_host_int(&mut self) -> SdioResult {
        self.ensure_present()?;
        let reg = self.reg;
        let v = self.read_reg(reg.host_int_mask_reg)?;
        self.write_reg(reg.host_int_mask_reg, v & !reg.host_int_enable)
    }

    pub fn wakeup(&mut self) -> SdioResult {
        self.ensure_present()?;
        log::trace!(target: LOG_TARGET, "wakeup card");
        self.func
            .writeb(cfg::CONFIGURATION_REG, cfg::HOST_POWER_UP)
            .map_err(SdioError::Bus)
    }

    /// 唤醒完成，清除 HOST_POWER_UP
    pub fn wakeup_complete(&mut self) -> SdioResult {
        self.ensure_present()?;
        self.func.writeb(cfg::CONFIGURATION_REG, 0).map_err(SdioError::Bus)
    }
}
