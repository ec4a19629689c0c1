//! SDIO Function 抽象
//!
//! 传输层依赖：sdio_readb/writeb、sdio_readsb/writesb（含 scatter-gather 变体）、
//! sdio_set_block_size、sdio_enable_func/disable_func、sdio_claim_irq/release_irq，
//! 以及轮询用的 µs/ms 延时。

use crate::delay::{delay_spin_ms, delay_spin_us};
use crate::types::SdioDeviceId;

/// SDIO 中断回调（对应 sdio_irq_handler_t）
pub type SdioIrqHandler = fn();

/// 不支持的操作（EOPNOTSUPP）
pub const EOPNOTSUPP: i32 = -95;

/// SDIO Function 设备接口
///
/// 地址均为 function 内偏移：CMD52 为寄存器地址，CMD53 为端口地址（已去掉 byte-mode 标志位）。
/// 错误统一为负 errno。实现方负责 host 占用，调用方保证同一 function 上的访问已串行化。
pub trait SdioFunc {
    /// Function 号（1..7）
    fn num(&self) -> u8 {
        1
    }

    /// 厂商 ID（FBR）
    fn vendor(&self) -> u16;

    /// 设备 ID（FBR）
    fn device(&self) -> u16;

    /// 标准接口类
    fn class(&self) -> u8 {
        crate::types::sdio_class::WLAN
    }

    /// 单字节读（CMD52）
    fn readb(&self, addr: u32) -> Result<u8, i32>;

    /// 单字节写（CMD52）
    fn writeb(&self, addr: u32, b: u8) -> Result<(), i32>;

    /// 块读（CMD53），读满 `buf`
    fn readsb(&self, addr: u32, buf: &mut [u8]) -> Result<(), i32>;

    /// 块写（CMD53），写出整个 `buf`
    fn writesb(&self, addr: u32, buf: &[u8]) -> Result<(), i32>;

    /// 是否支持 scatter-gather CMD53；为 true 时需同时实现 `readsb_sg` / `writesb_sg`
    fn supports_sg(&self) -> bool {
        false
    }

    /// scatter-gather 块读：一次 CMD53 依次填满各段
    fn readsb_sg(&self, _addr: u32, _segs: &mut [&mut [u8]]) -> Result<(), i32> {
        Err(EOPNOTSUPP)
    }

    /// scatter-gather 块写：一次 CMD53 依次写出各段
    fn writesb_sg(&self, _addr: u32, _segs: &[&[u8]]) -> Result<(), i32> {
        Err(EOPNOTSUPP)
    }

    /// 设置块大小（对应 sdio_set_block_size）
    fn set_block_size(&self, blksz: u16) -> Result<(), i32>;

    /// 使能该 function（CCCR IO_ENABLE + 等 IO_READY）
    fn enable_func(&self) -> Result<(), i32>;

    /// 关闭该 function
    fn disable_func(&self) -> Result<(), i32>;

    /// 注册 SDIO 中断。无 PLIC 时可为空实现，由轮询替代。
    fn claim_irq(&self, _handler: Option<SdioIrqHandler>) -> Result<(), i32> {
        Ok(())
    }

    /// 释放 SDIO 中断
    fn release_irq(&self) -> Result<(), i32> {
        Ok(())
    }

    /// 微秒级忙等
    fn delay_us(&self, us: u32) {
        delay_spin_us(us);
    }

    /// 毫秒级忙等
    fn delay_ms(&self, ms: u32) {
        delay_spin_ms(ms);
    }

    /// 组成设备 ID（用于驱动匹配）
    fn device_id(&self) -> SdioDeviceId {
        SdioDeviceId::new(self.class(), self.vendor(), self.device())
    }
}
