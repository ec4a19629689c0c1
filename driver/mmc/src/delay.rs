//! 忙等延时（udelay / mdelay 的无时钟近似）
//!
//! 传输层的所有等待都是有界轮询，轮询间隔由这里的忙等提供。
//! 平台若有精确时钟，应在 `SdioFunc::delay_us` / `delay_ms` 中覆盖。

/// 每毫秒的 spin 循环数（无精确时钟时的启发式近似）
pub const LOOPS_PER_MS: u32 = 1000;

/// 忙等约 ms 毫秒
#[inline]
pub fn delay_spin_ms(ms: u32) {
    let limit = ms.saturating_mul(LOOPS_PER_MS);
    for _ in 0..limit {
        core::hint::spin_loop();
    }
}

/// 忙等约 us 微秒，至少一次 spin
#[inline]
pub fn delay_spin_us(us: u32) {
    let limit = us.saturating_mul(LOOPS_PER_MS) / 1000;
    for _ in 0..limit.max(1) {
        core::hint::spin_loop();
    }
}
