//! mwifiex SDIO wireless crate
//!
//! 整合 mwifiex SDIO 传输层的各个部分：
//! - mmc: SDIO function 原语（平台实现 [`SdioFunc`]）
//! - xfer: 传输缓冲 TransferBuffer 与接收队列
//! - mwifiex_sdio: 寄存器模型、固件下载、端口分配、多端口聚合、中断分发与包路由
//!
//! 平台枚举到卡后调用 [`probe`]，按设备 ID 选出芯片描述并完成 attach。

#![no_std]

use axerrno::{AxError, AxResult};

pub use mmc;
pub use mwifiex_sdio as sdio;
pub use xfer;

pub use mmc::SdioFunc;
pub use mwifiex_sdio::{
    chipmatch, FwReport, HostToCardError, PacketType, SdioConfig, SdioDevice, SdioTransport,
    Stats, TransportOps,
};
pub use xfer::TransferBuffer;

const LOG_TARGET: &str = "mwifiex";

/// 按 function 的设备 ID 匹配芯片并 attach。`fw` 为该芯片的固件镜像
/// （[`SdioDevice::firmware`] 给出默认文件名），固件已在运行时可为 None。
pub fn probe<F: SdioFunc, O: TransportOps>(
    func: F,
    cfg: SdioConfig,
    fw: Option<&[u8]>,
    ops: O,
) -> AxResult<SdioTransport<F, O>> {
    let id = func.device_id();
    let Some(dev) = chipmatch(&id) else {
        log::warn!(target: LOG_TARGET, "no mwifiex chip for {:?}", id);
        return Err(AxError::NotFound);
    };
    log::info!(target: LOG_TARGET, "probe: {} matched", dev.name);
    SdioTransport::attach(func, dev, cfg, fw, ops)
}

/// 只做匹配，返回芯片描述与应加载的固件文件名
pub fn lookup<F: SdioFunc>(func: &F) -> Option<(&'static SdioDevice, &'static str)> {
    chipmatch(&func.device_id()).map(|dev| (dev, dev.firmware))
}
