//! 总线 I/O 辅助：CMD53 地址解码、带 abort 的有界重试

use mmc::SdioFunc;

use crate::card::Stats;
use crate::error::{errno::EINVAL, SdioError, SdioResult};
use crate::retry::{with_retry, Attempt, RetryError};
use crate::types::{cfg, MWIFIEX_SDIO_BYTE_MODE_MASK, MWIFIEX_SDIO_IO_PORT_MASK};

const LOG_TARGET: &str = "mwifiex::sdio";

/// 块模式下按整块截断，byte 模式原样；返回实际传输长度
#[inline]
fn xfer_len(port: u32, len: usize, block: usize) -> usize {
    if port & MWIFIEX_SDIO_BYTE_MODE_MASK != 0 {
        len
    } else {
        len / block * block
    }
}

/// 单次 CMD53 写。`port` 可带 byte-mode 标志，块模式时只写整块部分。
pub(crate) fn write_data_sync<F: SdioFunc>(
    func: &F,
    block: usize,
    port: u32,
    data: &[u8],
) -> Result<(), i32> {
    let n = xfer_len(port, data.len(), block);
    if n == 0 {
        return Err(EINVAL);
    }
    func.writesb(port & MWIFIEX_SDIO_IO_PORT_MASK, &data[..n])
}

/// 单次 CMD53 读，语义同 [`write_data_sync`]
pub(crate) fn read_data_sync<F: SdioFunc>(
    func: &F,
    block: usize,
    port: u32,
    buf: &mut [u8],
) -> Result<(), i32> {
    let n = xfer_len(port, buf.len(), block);
    if n == 0 {
        return Err(EINVAL);
    }
    func.readsb(port & MWIFIEX_SDIO_IO_PORT_MASK, &mut buf[..n])
}

/// 通知芯片终止当前 CMD53（配置寄存器置 HOST_TERM_CMD53）
pub(crate) fn abort_transfer<F: SdioFunc>(func: &F) {
    let cr = func.readb(cfg::CONFIGURATION_REG).unwrap_or(0);
    if let Err(e) = func.writeb(cfg::CONFIGURATION_REG, cr | cfg::HOST_TERM_CMD53) {
        log::error!(target: LOG_TARGET, "abort: write CFG reg failed: {}", e);
    }
}

/// 重试包装：`op` 最多执行 `1 + retries` 次，每次失败后 abort 并计数。
pub(crate) fn with_abort_retry<F: SdioFunc>(
    func: &F,
    retries: u32,
    stats: &mut Stats,
    what: &str,
    mut op: impl FnMut(&F) -> Result<(), i32>,
) -> SdioResult {
    with_retry(
        retries.saturating_add(1),
        |_| op(func).map_err(Attempt::Transient),
        |i, e| {
            log::warn!(target: LOG_TARGET, "{} failed: {}, attempt {}", what, e, i + 1);
            abort_transfer(func);
            stats.aborts += 1;
        },
    )
    .map_err(|e| match e {
        RetryError::Exhausted { attempts, last } => {
            log::error!(target: LOG_TARGET, "{}: gave up after {} attempts", what, attempts);
            SdioError::RetryExhausted { attempts, last }
        }
        RetryError::Fatal(e) => SdioError::Bus(e),
    })
}
