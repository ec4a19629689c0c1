//! 对外入口 SdioTransport
//!
//! 中断路径与提交路径共用一把 `spin::Mutex<CardContext>`。持锁期间产生的上行投递在
//! 释放锁之后才交给 [`TransportOps`]，回调里可以直接重新提交。

use axerrno::{AxError, AxResult};
use mmc::SdioFunc;
use spin::Mutex;
use xfer::TransferBuffer;

use crate::aggr::HostToCardError;
use crate::card::{CardContext, Stats};
use crate::config::SdioConfig;
use crate::fw::FwReport;
use crate::ops::TransportOps;
use crate::regs::SdioDevice;
use crate::types::PacketType;

const LOG_TARGET: &str = "mwifiex::sdio";

pub struct SdioTransport<F: SdioFunc, O: TransportOps> {
    card: Mutex<CardContext<F>>,
    ops: O,
    fw_report: FwReport,
}

impl<F: SdioFunc, O: TransportOps> SdioTransport<F, O> {
    /// 完整 attach：构造上下文 → register_dev → 总线初始化 → 固件 → 打开主机中断。
    /// 任一步失败都会撤销已完成的注册。
    pub fn attach(
        func: F,
        dev: &'static SdioDevice,
        cfg: SdioConfig,
        fw: Option<&[u8]>,
        ops: O,
    ) -> AxResult<Self> {
        log::info!(target: LOG_TARGET, "attach {} ({})", dev.name, dev.firmware);
        let mut card = CardContext::new(func, dev, cfg)?;
        card.register_dev()?;

        let report = card.init_sdio().and_then(|_| card.init_fw(fw));
        let report = match report.and_then(|r| card.enable_host_int().map(|_| r)) {
            Ok(r) => r,
            Err(e) => {
                log::error!(target: LOG_TARGET, "{}: attach failed: {:?}", dev.name, e);
                card.unregister_dev();
                return Err(e.into());
            }
        };
        Ok(Self {
            card: Mutex::new(card),
            ops,
            fw_report: report,
        })
    }

    /// 在锁内执行 `f`，释放锁后投递积压的上行
    pub fn with_card<R>(&self, f: impl FnOnce(&mut CardContext<F>) -> R) -> R {
        let (r, upcalls) = {
            let mut card = self.card.lock();
            let r = f(&mut card);
            (r, card.take_upcalls())
        };
        for u in upcalls {
            u.deliver(&self.ops);
        }
        r
    }

    pub fn ops(&self) -> &O {
        &self.ops
    }

    pub fn fw_report(&self) -> &FwReport {
        &self.fw_report
    }

    /// 中断入口
    pub fn on_interrupt(&self) -> AxResult {
        self.with_card(|c| c.process_interrupt()).map_err(AxError::from)
    }

    /// 提交一个待发送缓冲，语义见 [`CardContext::host_to_card`]
    pub fn host_to_card(
        &self,
        ty: PacketType,
        buf: TransferBuffer,
        next_pkt_len: usize,
    ) -> Result<(), HostToCardError> {
        self.with_card(|c| c.host_to_card(ty, buf, next_pkt_len))
    }

    /// 刷新定时器到期
    pub fn on_flush_timer(&self) -> AxResult {
        self.with_card(|c| c.on_flush_timer()).map_err(AxError::from)
    }

    /// 接收工作者取包
    pub fn dequeue_rx(&self) -> Option<TransferBuffer> {
        self.card.lock().dequeue_rx()
    }

    pub fn expect_cmd_response(&self) {
        self.card.lock().expect_cmd_response();
    }

    pub fn stats(&self) -> Stats {
        self.card.lock().stats().clone()
    }

    pub fn update_mp_end_port(&self, port: u8) -> bool {
        self.card.lock().update_mp_end_port(port)
    }

    pub fn wakeup(&self) -> AxResult {
        self.card.lock().wakeup().map_err(AxError::from)
    }

    pub fn wakeup_complete(&self) -> AxResult {
        self.card.lock().wakeup_complete().map_err(AxError::from)
    }

    /// 设备被拔出；在途缓冲以失败状态交还
    pub fn surprise_removed(&self) {
        self.with_card(|c| c.surprise_removed());
    }

    /// 拆除：交还在途缓冲，设备仍在时关闭主机中断，然后注销 function。
    /// 返回 function 与回调对象。
    pub fn detach(self) -> (F, O) {
        let mut card = self.card.into_inner();
        card.release_inflight();
        for u in card.take_upcalls() {
            u.deliver(&self.ops);
        }
        if !card.is_removed() {
            if let Err(e) = card.disable_host_int() {
                log::warn!(target: LOG_TARGET, "disable host int failed: {:?}", e);
            }
        }
        card.unregister_dev();
        log::info!(target: LOG_TARGET, "{}: detached", card.device().name);
        (card.func, self.ops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SdioError;
    use crate::regs::SD8897;
    use crate::testbus::{tx_buf, wire_packet, MockFunc, Recorder, Snapshot};
    use crate::types::{
        int_status, sdio_ids, CARD_IO_READY, DN_LD_CARD_RDY, MEM_PORT, SDIO_VENDOR_ID_MARVELL,
    };

    fn running_fw() -> MockFunc {
        let f = MockFunc::new(SDIO_VENDOR_ID_MARVELL, sdio_ids::SD8897);
        let r = SD8897.reg;
        f.set_reg(r.status_reg_0, 0xdc);
        f.set_reg(r.status_reg_1, 0xfe);
        f
    }

    fn attach(f: MockFunc) -> SdioTransport<MockFunc, Recorder> {
        match SdioTransport::attach(f, &SD8897, SdioConfig::default(), None, Recorder::default()) {
            Ok(t) => t,
            Err(e) => panic!("attach: {:?}", e),
        }
    }

    #[test]
    fn attach_with_running_firmware() {
        let t = attach(running_fw());
        assert!(t.fw_report().already_running);
        t.with_card(|c| {
            assert!(c.fw_ready());
            assert!(c.func().is_enabled());
            assert_eq!(c.func().reg(c.reg.host_int_mask_reg), c.reg.host_int_enable);
        });
    }

    #[test]
    fn attach_failure_unregisters() {
        let f = MockFunc::new(SDIO_VENDOR_ID_MARVELL, sdio_ids::SD8897);
        f.set_reg(SD8897.reg.poll_reg, CARD_IO_READY | DN_LD_CARD_RDY);
        let r = SdioTransport::attach(f, &SD8897, SdioConfig::default(), None, Recorder::default());
        assert_eq!(r.err(), Some(AxError::from(SdioError::NoFirmware)));
    }

    #[test]
    fn data_is_delivered_outside_lock() {
        let t = attach(running_fw());
        let pkt = wire_packet(PacketType::Data, &[7; 60], 256);
        let snap = Snapshot::new(&SD8897)
            .status(int_status::UP_LD_HOST_INT_STATUS)
            .rd_bitmap(0b1)
            .rd_len(0, pkt.len() as u16);
        t.with_card(|c| {
            c.func().set_snapshot(snap.regs);
            c.func().queue_rx(MEM_PORT, pkt);
        });
        t.on_interrupt().unwrap();
        assert_eq!(t.ops().data.borrow().as_slice(), &[alloc::vec![7u8; 60]]);
        assert_eq!(t.stats().interrupts, 1);
    }

    #[test]
    fn detach_fails_inflight_and_masks_irq() {
        let t = attach(running_fw());
        t.with_card(|c| {
            c.ports.refresh_write(0b11);
        });
        // 后面还有包，批次保持打开
        t.host_to_card(PacketType::Data, tx_buf(100, 1), 100).unwrap();
        assert_eq!(t.stats().tx_failed, 0);
        assert_eq!(*t.ops().timer.borrow(), Some(SdioConfig::default().tx_flush_timeout_ms));

        let (f, rec) = t.detach();
        assert!(!f.is_enabled());
        assert!(!f.irq_claimed());
        assert_eq!(f.reg(SD8897.reg.host_int_mask_reg), 0);
        assert!(f.block_writes().is_empty());
        assert_eq!(rec.tx_err(), 1);
        assert_eq!(*rec.timer.borrow(), None);
    }

    #[test]
    fn removed_device_rejects_submissions() {
        let t = attach(running_fw());
        t.surprise_removed();
        let r = t.host_to_card(PacketType::Data, tx_buf(64, 0), 0);
        assert!(matches!(r, Err(HostToCardError::Failed(SdioError::DeviceRemoved))));
        assert_eq!(t.ops().tx_err(), 1);
        assert_eq!(t.on_interrupt(), Err(AxError::BadState));
    }
}
