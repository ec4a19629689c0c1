//! SDIO 通用类型：设备 ID 匹配、标准接口类、块大小

/// SDIO 设备 ID（用于驱动匹配，对应 struct sdio_device_id）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdioDeviceId {
    /// 标准接口类，SDIO_ANY_ID(0xff) 表示任意
    pub class: u8,
    /// 厂商 ID，SDIO_ANY_ID_U16(0xffff) 表示任意
    pub vendor: u16,
    /// 设备 ID，SDIO_ANY_ID_U16(0xffff) 表示任意
    pub device: u16,
}

/// 匹配任意类/厂商/设备
pub const SDIO_ANY_ID: u8 = 0xff;
pub const SDIO_ANY_ID_U16: u16 = 0xffff;

impl SdioDeviceId {
    pub const fn new(class: u8, vendor: u16, device: u16) -> Self {
        Self { class, vendor, device }
    }

    /// 只按厂商/设备匹配（对应 SDIO_DEVICE(vend, dev)）
    pub const fn device(vendor: u16, device: u16) -> Self {
        Self::new(SDIO_ANY_ID, vendor, device)
    }

    /// 是否匹配另一个 ID（任一字段为 ANY 则该字段恒匹配）
    pub fn matches(&self, other: &SdioDeviceId) -> bool {
        (self.class == SDIO_ANY_ID || self.class == other.class)
            && (self.vendor == SDIO_ANY_ID_U16 || self.vendor == other.vendor)
            && (self.device == SDIO_ANY_ID_U16 || self.device == other.device)
    }
}

/// SDIO 标准接口类（SDIO_CLASS_*）
pub mod sdio_class {
    pub const WLAN: u8 = 0x07;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_fields_match() {
        let entry = SdioDeviceId::device(0x02df, 0x912d);
        assert!(entry.matches(&SdioDeviceId::new(sdio_class::WLAN, 0x02df, 0x912d)));
        assert!(!entry.matches(&SdioDeviceId::new(sdio_class::WLAN, 0x02df, 0x9141)));
        let wildcard = SdioDeviceId::new(SDIO_ANY_ID, SDIO_ANY_ID_U16, SDIO_ANY_ID_U16);
        assert!(wildcard.matches(&SdioDeviceId::new(0, 1, 2)));
    }
}
