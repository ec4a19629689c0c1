//! 固件下载
//!
//! 状态机：`ProbeBus → CheckAlreadyRunning → CheckOwnership → DownloadLoop → PollReady → Done`。
//!
//! 下载循环每一轮：等卡就绪 → 轮询块长度寄存器 → 按块填充写出。块长度最低位为 1
//! 表示上一块 CRC 出错，需原样重发上一块，镜像偏移不前进。同一块连续 CRC 出错超过
//! `fw_crc_retry` 次即失败；支持 MIC 重下的芯片允许从偏移 0 重新开始有限次。

use alloc::vec::Vec;

use mmc::SdioFunc;

use crate::card::CardContext;
use crate::error::{SdioError, SdioResult};
use crate::io::{abort_transfer, write_data_sync};
use crate::retry::poll;
use crate::types::{CARD_IO_READY, DN_LD_CARD_RDY, FIRMWARE_READY_SDIO, MWIFIEX_UPLD_SIZE};

const LOG_TARGET: &str = "mwifiex::sdio::fw";

/// 下载状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FwState {
    ProbeBus,
    CheckAlreadyRunning,
    CheckOwnership,
    DownloadLoop,
    PollReady,
    Done,
}

/// 一次 `init_fw` 的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FwReport {
    /// 固件已在运行，跳过了下载
    pub already_running: bool,
    /// 发出了带内复位
    pub reset_issued: bool,
    /// 本 function 负责下载
    pub winner: bool,
    pub bytes: usize,
    pub blocks: u32,
    pub crc_retries: u32,
    pub mic_restarts: u32,
}

impl<F: SdioFunc> CardContext<F> {
    /// 执行完整的固件启动流程。`fw` 为固件镜像，只在需要下载时使用。
    pub fn init_fw(&mut self, fw: Option<&[u8]>) -> SdioResult<FwReport> {
        let mut report = FwReport::default();
        let mut poll_tries = self.cfg.fw_poll_tries;
        let mut state = FwState::ProbeBus;
        loop {
            log::trace!(target: LOG_TARGET, "fw state {:?}", state);
            state = match state {
                FwState::ProbeBus => {
                    self.ensure_present()?;
                    self.read_reg(self.reg.poll_reg)?;
                    FwState::CheckAlreadyRunning
                }
                FwState::CheckAlreadyRunning => {
                    if !self.check_fw_status(1)? {
                        FwState::CheckOwnership
                    } else if self.cfg.force_fw_reload && self.reset_fw()? {
                        report.reset_issued = true;
                        FwState::CheckOwnership
                    } else {
                        log::info!(target: LOG_TARGET, "{}: firmware already running", self.dev.name);
                        report.already_running = true;
                        report.winner = self.winner;
                        FwState::Done
                    }
                }
                FwState::CheckOwnership => {
                    // 共享总线上 winner 寄存器为 0 的 function 负责下载
                    self.winner = self.read_reg(self.reg.status_reg_0)? == 0;
                    report.winner = self.winner;
                    if self.winner {
                        FwState::DownloadLoop
                    } else {
                        log::info!(target: LOG_TARGET, "not the winner, skip download");
                        poll_tries = self.cfg.fw_poll_tries_multi;
                        FwState::PollReady
                    }
                }
                FwState::DownloadLoop => {
                    let image = fw.filter(|f| !f.is_empty()).ok_or_else(|| {
                        log::error!(target: LOG_TARGET, "firmware image not found");
                        SdioError::NoFirmware
                    })?;
                    self.prog_fw(image, &mut report)?;
                    FwState::PollReady
                }
                FwState::PollReady => {
                    if !self.check_fw_status(poll_tries)? {
                        log::error!(
                            target: LOG_TARGET,
                            "firmware not ready after {} polls",
                            poll_tries
                        );
                        return Err(SdioError::FwNotReady);
                    }
                    FwState::Done
                }
                FwState::Done => break,
            };
        }
        self.fw_ready = true;
        log::info!(target: LOG_TARGET, "{}: firmware ready", self.dev.name);
        Ok(report)
    }

    /// 轮询固件状态寄存器，最多 `tries` 次。读失败视为未就绪。
    pub fn check_fw_status(&self, tries: u32) -> SdioResult<bool> {
        let delay = self.cfg.fw_poll_delay_ms;
        let ready: Result<Option<()>, SdioError> = poll(
            tries,
            || match self.read_fw_status() {
                Ok(FIRMWARE_READY_SDIO) => Ok(Some(())),
                Ok(_) => Ok(None),
                Err(e) => {
                    log::debug!(target: LOG_TARGET, "read fw status failed: {:?}", e);
                    Ok(None)
                }
            },
            || self.func.delay_ms(delay),
        );
        Ok(ready?.is_some())
    }

    /// 固件状态：status_reg_1 为高字节
    pub fn read_fw_status(&self) -> SdioResult<u16> {
        let lo = self.read_reg(self.reg.status_reg_0)?;
        let hi = self.read_reg(self.reg.status_reg_1)?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    /// 带内复位；芯片没有复位寄存器时返回 false
    fn reset_fw(&self) -> SdioResult<bool> {
        let Some((reg, val)) = self.reg.fw_reset else {
            log::warn!(target: LOG_TARGET, "{}: no in-band reset, keep running firmware", self.dev.name);
            return Ok(false);
        };
        log::info!(target: LOG_TARGET, "{}: in-band reset for firmware reload", self.dev.name);
        self.write_reg(reg, val)?;
        Ok(true)
    }

    /// 等卡状态寄存器中 `bits` 全部置位；读失败立即返回错误
    fn poll_card_status(&self, bits: u8) -> SdioResult {
        let tries = self.cfg.card_poll_tries;
        let ok = poll(
            tries,
            || Ok::<_, SdioError>(((self.read_reg(self.reg.poll_reg)? & bits) == bits).then_some(())),
            || self.func.delay_us(10),
        )?;
        if ok.is_none() {
            log::error!(target: LOG_TARGET, "poll card status failed, tries = {}", tries);
            return Err(SdioError::FwNotReady);
        }
        Ok(())
    }

    /// 轮询卡请求的块长度
    fn poll_block_len(&self) -> SdioResult<u16> {
        let reg = self.reg;
        let len = poll(
            self.cfg.card_poll_tries,
            || {
                let lo = self.read_reg(reg.base_0_reg)?;
                let hi = self.read_reg(reg.base_1_reg)?;
                let len = u16::from_le_bytes([lo, hi]);
                Ok::<_, SdioError>((len != 0).then_some(len))
            },
            || self.func.delay_us(10),
        )?;
        len.ok_or_else(|| {
            log::error!(target: LOG_TARGET, "card never requested the next block");
            SdioError::FwNotReady
        })
    }

    fn prog_fw(&mut self, image: &[u8], report: &mut FwReport) -> SdioResult {
        let bs = self.block_size;
        let mut scratch = Vec::new();
        scratch
            .try_reserve_exact(MWIFIEX_UPLD_SIZE.div_ceil(bs) * bs)
            .map_err(|_| SdioError::NoMemory)?;
        scratch.resize(MWIFIEX_UPLD_SIZE.div_ceil(bs) * bs, 0);

        log::info!(target: LOG_TARGET, "downloading firmware, {} bytes", image.len());
        let mut offset = 0;
        let mut tx_blocks = 0;
        let mut crc_run = 0u32;
        loop {
            self.poll_card_status(CARD_IO_READY | DN_LD_CARD_RDY)?;
            if offset >= image.len() {
                break;
            }
            let len = self.poll_block_len()? as usize;
            if len > MWIFIEX_UPLD_SIZE {
                log::error!(target: LOG_TARGET, "card requested {} bytes, too large", len);
                return Err(SdioError::FwDownload);
            }

            let txlen = if len & 1 != 0 {
                crc_run += 1;
                report.crc_retries += 1;
                self.stats.fw_crc_retries += 1;
                if crc_run > self.cfg.fw_crc_retry {
                    if self.dev.fw_mic_restart && report.mic_restarts < self.cfg.fw_mic_restart {
                        report.mic_restarts += 1;
                        log::warn!(
                            target: LOG_TARGET,
                            "MIC error budget hit at {}, restarting download ({})",
                            offset,
                            report.mic_restarts
                        );
                        offset = 0;
                        tx_blocks = 0;
                        crc_run = 0;
                        continue;
                    }
                    log::error!(target: LOG_TARGET, "firmware CRC retries exhausted at {}", offset);
                    return Err(SdioError::FwDownload);
                }
                log::warn!(target: LOG_TARGET, "CRC indicated by helper, resending at {}", offset);
                0
            } else {
                crc_run = 0;
                let txlen = len.min(image.len() - offset);
                tx_blocks = txlen.div_ceil(bs);
                scratch[..txlen].copy_from_slice(&image[offset..offset + txlen]);
                scratch[txlen..tx_blocks * bs].fill(0);
                txlen
            };

            if tx_blocks > 0 {
                if let Err(e) = write_data_sync(&self.func, bs, self.ioport, &scratch[..tx_blocks * bs]) {
                    log::error!(target: LOG_TARGET, "fw write @{} failed: {}", offset, e);
                    abort_transfer(&self.func);
                    self.stats.aborts += 1;
                    return Err(SdioError::Bus(e));
                }
                report.blocks += 1;
            }
            offset += txlen;
        }
        report.bytes = offset;
        log::info!(target: LOG_TARGET, "firmware download over, {} bytes", offset);
        Ok(())
    }
}
