//! # mwifiex_sdio：mwifiex SDIO 传输层
//!
//! 在 [`mmc::SdioFunc`] 之上实现 Marvell/NXP mwifiex 芯片的 SDIO 传输：
//!
//! | 模块      | 说明 |
//! |-----------|------|
//! | regs      | 各芯片寄存器布局与设备表、chipmatch |
//! | init      | CardContext 构造、I/O 端口与中断寄存器初始化 |
//! | fw        | 固件下载状态机（CRC 重发、MIC 重下、多 function winner） |
//! | port      | 读/写端口位图分配 |
//! | aggr      | 多端口发送/接收聚合 |
//! | irq       | 中断快照读取与分发 |
//! | router    | 接口头解析，数据/命令响应/事件分发 |
//! | transport | 加锁入口 SdioTransport |
//!
//! 上层通过 [`TransportOps`] 接收数据、事件与发送完成，所有回调都在锁外执行。

#![no_std]

extern crate alloc;

pub mod aggr;
pub mod card;
pub mod config;
pub mod error;
pub mod fw;
pub mod init;
pub mod io;
pub mod irq;
pub mod ops;
pub mod port;
pub mod regs;
pub mod retry;
pub mod router;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testbus;

pub use aggr::HostToCardError;
pub use card::{CardContext, MpDebugRing, MpTrace, Stats};
pub use config::{parse_config, SdioConfig};
pub use error::{SdioError, SdioResult};
pub use fw::{FwReport, FwState};
pub use ops::{TransportOps, Upcall};
pub use port::PortAllocator;
pub use regs::{chipmatch, CardReg, SdioDevice, SDIO_DEVICE_TABLE};
pub use router::{decode_packet, encode_packet, RxPacket, RxViolation, WireHeader};
pub use transport::SdioTransport;
pub use types::PacketType;
