//! # mmc：SDIO function 原语
//!
//! mwifiex SDIO 传输层所消费的总线能力都收敛在此 crate：
//!
//! | 模块      | 说明 |
//! |-----------|------|
//! | types     | SdioDeviceId、sdio_class |
//! | sdio_func | SdioFunc：CMD52 readb/writeb、CMD53 readsb/writesb、可选 scatter-gather、set_block_size、enable_func、irq |
//! | delay     | 忙等 udelay/mdelay 近似实现 |
//!
//! 平台（SDHCI 驱动或测试桩）实现 [`SdioFunc`]，上层只通过该 trait 访问总线；
//! 本 crate 不持有任何全局状态。

#![no_std]

pub mod delay;
pub mod sdio_func;
pub mod types;

pub use delay::{delay_spin_ms, delay_spin_us, LOOPS_PER_MS};
pub use sdio_func::{SdioFunc, SdioIrqHandler, EOPNOTSUPP};
pub use types::{sdio_class, SdioDeviceId, SDIO_ANY_ID, SDIO_ANY_ID_U16};
