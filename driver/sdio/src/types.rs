//! mwifiex SDIO 常量与线上类型
//!
//! 端口地址、配置寄存器位、中断状态位、固件下载相关常量，以及包头中的类型标签。

/// 总线传输块大小
pub const MWIFIEX_SDIO_BLOCK_SIZE: usize = 256;

/// CMD53 地址中的 byte-mode 标志（置位时按字节传输，否则按块）
pub const MWIFIEX_SDIO_BYTE_MODE_MASK: u32 = 0x8000_0000;
/// 实际 I/O 端口地址的有效位
pub const MWIFIEX_SDIO_IO_PORT_MASK: u32 = 0xfffff;

/// 寄存器快照端口（按字节读 max_mp_regs 字节）
pub const REG_PORT: u32 = 0;
/// 控制端口（旧寻址模式下专用于命令/事件）
pub const CTRL_PORT: u8 = 0;
pub const CTRL_PORT_MASK: u32 = 0x0001;
/// 多端口聚合地址标志
pub const SDIO_MPA_ADDR_BASE: u32 = 0x1000;
/// 新寻址模式的固定内存窗口端口
pub const MEM_PORT: u32 = 0x10000;
/// 新寻址模式的命令通道地址
pub const CMD_PORT_SLCT: u32 = 0x8000;

/// 配置寄存器及其位
pub mod cfg {
    pub const CONFIGURATION_REG: u32 = 0x00;
    pub const HOST_POWER_UP: u8 = 0x02; // 唤醒卡
    pub const HOST_TERM_CMD53: u8 = 0x04; // abort-transfer
}

/// 卡侧杂项配置中的位
pub const AUTO_RE_ENABLE_INT: u8 = 0x10;
pub const CMD53_NEW_MODE: u8 = 0x01;
pub const CMD_PORT_RD_LEN_EN: u8 = 0x04;
pub const CMD_PORT_AUTO_EN: u8 = 0x01;

/// 主机中断状态寄存器的位
pub mod int_status {
    pub const UP_LD_HOST_INT_STATUS: u8 = 0x01;
    pub const DN_LD_HOST_INT_STATUS: u8 = 0x02;
    pub const UP_LD_CMD_PORT_HOST_INT_STATUS: u8 = 0x40;
    pub const DN_LD_CMD_PORT_HOST_INT_STATUS: u8 = 0x80;
}

/// 主机中断使能掩码
pub mod int_mask {
    pub const UP_LD_HOST_INT_MASK: u8 = 0x01;
    pub const DN_LD_HOST_INT_MASK: u8 = 0x02;
    pub const CMD_PORT_UPLD_INT_MASK: u8 = 0x40;
    pub const CMD_PORT_DNLD_INT_MASK: u8 = 0x80;
    pub const HIM_DISABLE: u8 = 0xff;
}

/// 卡状态寄存器（poll_reg）的位
pub const DN_LD_CARD_RDY: u8 = 0x01;
pub const CARD_IO_READY: u8 = 0x08;

/// 固件状态寄存器报告“已就绪”的值
pub const FIRMWARE_READY_SDIO: u16 = 0xfedc;
/// 轮询块长度/卡状态的默认次数
pub const MAX_POLL_TRIES: u32 = 100;
/// 固件就绪轮询：本 function 负责下载 / 其他 function 负责下载
pub const MAX_FIRMWARE_POLL_TRIES: u32 = 100;
pub const MAX_MULTI_INTERFACE_POLL_TRIES: u32 = 1000;
/// 写端口失败时的额外重试次数
pub const MAX_WRITE_IOMEM_RETRY: u32 = 2;

/// 单个命令/固件块的最大长度
pub const MWIFIEX_UPLD_SIZE: usize = 2312;
/// 非聚合接收的最大长度
pub const MWIFIEX_RX_DATA_BUF_SIZE: usize = 4096;
/// 包头长度：le16 长度 + le16 类型
pub const INTF_HEADER_LEN: usize = 4;
pub const MAX_EVENT_SIZE: usize = 2048;
pub const MWIFIEX_EVENT_HEADER_LEN: usize = 4;

/// 聚合缓冲大小档位
pub const MWIFIEX_MP_AGGR_BUF_SIZE_16K: usize = 16384;
pub const MWIFIEX_MP_AGGR_BUF_SIZE_32K: usize = 32768;
pub const MWIFIEX_MP_AGGR_BUF_SIZE_MAX: usize = 65280;

/// 固件侧接收聚合：块数与子包头在聚合包中的偏移
pub const BLOCK_NUMBER_OFFSET: usize = 15;
pub const SDIO_HEADER_OFFSET: usize = 28;

/// Marvell SDIO 厂商 ID
pub const SDIO_VENDOR_ID_MARVELL: u16 = 0x02df;

/// SDIO 设备 ID
pub mod sdio_ids {
    pub const SD8786: u16 = 0x9116;
    pub const SD8787: u16 = 0x9119;
    pub const SD8797: u16 = 0x9129;
    pub const SD8897: u16 = 0x912d;
    pub const SD8887: u16 = 0x9135;
    pub const SD8801: u16 = 0x9139;
    pub const SD8997: u16 = 0x9141;
    pub const SD8977: u16 = 0x9145;
    pub const SD8987: u16 = 0x9149;
}

/// 包头类型标签
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum PacketType {
    Data = 0,
    Cmd = 1,
    Event = 3,
    /// 固件加载块（VDLL）
    FwLoader = 4,
    /// 固件侧聚合的数据
    AggrData = 10,
}

impl PacketType {
    pub fn from_wire(tag: u16) -> Option<Self> {
        match tag {
            0 => Some(Self::Data),
            1 => Some(Self::Cmd),
            3 => Some(Self::Event),
            4 => Some(Self::FwLoader),
            10 => Some(Self::AggrData),
            _ => None,
        }
    }

    #[inline]
    pub fn tag(self) -> u16 {
        self as u16
    }
}
