//! 传输层错误类型
//!
//! 总线原语返回负 errno；传输层内部使用 [`SdioError`]，在对外入口处转换为 `AxError`。

use axerrno::AxError;

/// 通用 errno
pub mod errno {
    pub const EIO: i32 = -5;
    pub const ENOMEM: i32 = -12;
    pub const EBUSY: i32 = -16;
    pub const ENODEV: i32 = -19;
    pub const EINVAL: i32 = -22;
    pub const ETIMEDOUT: i32 = -110;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdioError {
    /// 单次寄存器或 CMD53 传输失败
    Bus(i32),
    /// 有界重试耗尽，`last` 为最后一次的 errno
    RetryExhausted { attempts: u32, last: i32 },
    /// 没有可用写端口
    Busy,
    /// 包长度非法（过短、超过缓冲或聚合容量）
    InvalidLength(usize),
    /// 轮询卡状态或固件状态超时
    FwNotReady,
    /// 固件下载失败（块长度非法、CRC 预算耗尽）
    FwDownload,
    /// 需要下载但没有固件镜像
    NoFirmware,
    NoMemory,
    /// 设备已移除
    DeviceRemoved,
    Unsupported,
}

pub type SdioResult<T = ()> = Result<T, SdioError>;

impl SdioError {
    /// 还原为负 errno（日志与平台层使用）
    pub fn errno(&self) -> i32 {
        match *self {
            SdioError::Bus(e) => e,
            SdioError::RetryExhausted { last, .. } => last,
            SdioError::Busy => errno::EBUSY,
            SdioError::InvalidLength(_) => errno::EINVAL,
            SdioError::FwNotReady => errno::ETIMEDOUT,
            SdioError::FwDownload => errno::EIO,
            SdioError::NoFirmware => errno::EINVAL,
            SdioError::NoMemory => errno::ENOMEM,
            SdioError::DeviceRemoved => errno::ENODEV,
            SdioError::Unsupported => -95,
        }
    }
}

impl From<i32> for SdioError {
    fn from(e: i32) -> Self {
        SdioError::Bus(e)
    }
}

impl From<SdioError> for AxError {
    fn from(e: SdioError) -> Self {
        match e {
            SdioError::Bus(_) | SdioError::RetryExhausted { .. } | SdioError::FwDownload => {
                AxError::Io
            }
            SdioError::Busy => AxError::ResourceBusy,
            SdioError::InvalidLength(_) => AxError::InvalidData,
            SdioError::FwNotReady | SdioError::DeviceRemoved => AxError::BadState,
            SdioError::NoFirmware => AxError::InvalidInput,
            SdioError::NoMemory => AxError::NoMemory,
            SdioError::Unsupported => AxError::Unsupported,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_to_axerror() {
        assert_eq!(AxError::from(SdioError::Bus(errno::EIO)), AxError::Io);
        assert_eq!(AxError::from(SdioError::Busy), AxError::ResourceBusy);
        assert_eq!(AxError::from(SdioError::DeviceRemoved), AxError::BadState);
        assert_eq!(
            SdioError::RetryExhausted { attempts: 3, last: errno::ETIMEDOUT }.errno(),
            errno::ETIMEDOUT
        );
    }
}
