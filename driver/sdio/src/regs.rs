//! 寄存器/端口模型
//!
//! [`CardReg`] 描述一类芯片的控制寄存器布局，[`SdioDevice`] 描述具体芯片的端口数、
//! 聚合能力与寻址模式。两者均为 `'static` 只读表，运行期统一通过字段访问。

use mmc::SdioDeviceId;

use crate::types::{
    int_mask, sdio_ids, MWIFIEX_MP_AGGR_BUF_SIZE_16K, MWIFIEX_MP_AGGR_BUF_SIZE_32K,
    MWIFIEX_MP_AGGR_BUF_SIZE_MAX, SDIO_VENDOR_ID_MARVELL,
};

/// 控制寄存器布局（均为 function 1 内的 CMD52 地址）
#[derive(Debug)]
pub struct CardReg {
    pub start_rd_port: u8,
    pub start_wr_port: u8,
    /// 固件下载时卡通告的块长度（低/高字节）
    pub base_0_reg: u8,
    pub base_1_reg: u8,
    /// 卡状态（CARD_IO_READY / DN_LD_CARD_RDY）
    pub poll_reg: u8,
    pub host_int_enable: u8,
    pub host_int_rsr_reg: u8,
    pub host_int_status_reg: u8,
    pub host_int_mask_reg: u8,
    /// 固件状态（低字节兼作 winner 寄存器）
    pub status_reg_0: u8,
    pub status_reg_1: u8,
    /// 快照中可信的中断状态位
    pub sdio_int_mask: u8,
    pub data_port_mask: u32,
    pub io_port_0_reg: u8,
    pub io_port_1_reg: u8,
    pub io_port_2_reg: u8,
    /// 寄存器快照长度
    pub max_mp_regs: u8,
    pub rd_bitmap_l: u8,
    pub rd_bitmap_u: u8,
    pub rd_bitmap_1l: u8,
    pub rd_bitmap_1u: u8,
    pub wr_bitmap_l: u8,
    pub wr_bitmap_u: u8,
    pub wr_bitmap_1l: u8,
    pub wr_bitmap_1u: u8,
    /// 端口 0 读长度寄存器；端口 n 位于 rd_len_p0_l + 2n
    pub rd_len_p0_l: u8,
    pub rd_len_p0_u: u8,
    pub card_misc_cfg_reg: u8,
    pub card_cfg_2_1_reg: u8,
    pub cmd_rd_len_0: u8,
    pub cmd_rd_len_1: u8,
    pub cmd_cfg_0: u8,
    pub cmd_cfg_1: u8,
    /// 带内复位：(寄存器, 写入值)
    pub fw_reset: Option<(u8, u8)>,
}

impl CardReg {
    /// 快照中端口 `port` 的读长度
    #[inline]
    pub fn rd_len_regs(&self, port: u8) -> (usize, usize) {
        let l = self.rd_len_p0_l as usize + 2 * port as usize;
        let u = self.rd_len_p0_u as usize + 2 * port as usize;
        (l, u)
    }
}

/// 旧寻址模式（8786/8787/8797/8801）
pub const REG_SD87XX: CardReg = CardReg {
    start_rd_port: 1,
    start_wr_port: 1,
    base_0_reg: 0x40,
    base_1_reg: 0x41,
    poll_reg: 0x30,
    host_int_enable: int_mask::UP_LD_HOST_INT_MASK | int_mask::DN_LD_HOST_INT_MASK,
    host_int_rsr_reg: 0x01,
    host_int_status_reg: 0x03,
    host_int_mask_reg: 0x02,
    status_reg_0: 0x60,
    status_reg_1: 0x61,
    sdio_int_mask: 0x3f,
    data_port_mask: 0x0000_fffe,
    io_port_0_reg: 0x78,
    io_port_1_reg: 0x79,
    io_port_2_reg: 0x7a,
    max_mp_regs: 64,
    rd_bitmap_l: 0x04,
    rd_bitmap_u: 0x05,
    rd_bitmap_1l: 0,
    rd_bitmap_1u: 0,
    wr_bitmap_l: 0x06,
    wr_bitmap_u: 0x07,
    wr_bitmap_1l: 0,
    wr_bitmap_1u: 0,
    rd_len_p0_l: 0x08,
    rd_len_p0_u: 0x09,
    card_misc_cfg_reg: 0x6c,
    card_cfg_2_1_reg: 0,
    cmd_rd_len_0: 0,
    cmd_rd_len_1: 0,
    cmd_cfg_0: 0,
    cmd_cfg_1: 0,
    fw_reset: None,
};

const NEW_MODE_INT_ENABLE: u8 = int_mask::UP_LD_HOST_INT_MASK
    | int_mask::DN_LD_HOST_INT_MASK
    | int_mask::CMD_PORT_UPLD_INT_MASK
    | int_mask::CMD_PORT_DNLD_INT_MASK;

pub const REG_SD8887: CardReg = CardReg {
    start_rd_port: 0,
    start_wr_port: 0,
    base_0_reg: 0x6c,
    base_1_reg: 0x6d,
    poll_reg: 0x5c,
    host_int_enable: NEW_MODE_INT_ENABLE,
    host_int_rsr_reg: 0x04,
    host_int_status_reg: 0x0c,
    host_int_mask_reg: 0x08,
    status_reg_0: 0x90,
    status_reg_1: 0x91,
    sdio_int_mask: 0xff,
    data_port_mask: 0xffff_ffff,
    io_port_0_reg: 0xe4,
    io_port_1_reg: 0xe5,
    io_port_2_reg: 0xe6,
    max_mp_regs: 196,
    rd_bitmap_l: 0x10,
    rd_bitmap_u: 0x11,
    rd_bitmap_1l: 0x12,
    rd_bitmap_1u: 0x13,
    wr_bitmap_l: 0x14,
    wr_bitmap_u: 0x15,
    wr_bitmap_1l: 0x16,
    wr_bitmap_1u: 0x17,
    rd_len_p0_l: 0x18,
    rd_len_p0_u: 0x19,
    card_misc_cfg_reg: 0xd8,
    card_cfg_2_1_reg: 0xd9,
    cmd_rd_len_0: 0xc0,
    cmd_rd_len_1: 0xc1,
    cmd_cfg_0: 0xc4,
    cmd_cfg_1: 0xc5,
    fw_reset: Some((0x0b6, 0x08)),
};

pub const REG_SD8897: CardReg = CardReg {
    start_rd_port: 0,
    start_wr_port: 0,
    base_0_reg: 0x60,
    base_1_reg: 0x61,
    poll_reg: 0x50,
    host_int_enable: NEW_MODE_INT_ENABLE,
    host_int_rsr_reg: 0x01,
    host_int_status_reg: 0x03,
    host_int_mask_reg: 0x02,
    status_reg_0: 0xc0,
    status_reg_1: 0xc1,
    sdio_int_mask: 0xff,
    data_port_mask: 0xffff_ffff,
    io_port_0_reg: 0xd8,
    io_port_1_reg: 0xd9,
    io_port_2_reg: 0xda,
    max_mp_regs: 184,
    rd_bitmap_l: 0x04,
    rd_bitmap_u: 0x05,
    rd_bitmap_1l: 0x06,
    rd_bitmap_1u: 0x07,
    wr_bitmap_l: 0x08,
    wr_bitmap_u: 0x09,
    wr_bitmap_1l: 0x0a,
    wr_bitmap_1u: 0x0b,
    rd_len_p0_l: 0x0c,
    rd_len_p0_u: 0x0d,
    card_misc_cfg_reg: 0xcc,
    card_cfg_2_1_reg: 0xcd,
    cmd_rd_len_0: 0xb4,
    cmd_rd_len_1: 0xb5,
    cmd_cfg_0: 0xb8,
    cmd_cfg_1: 0xb9,
    fw_reset: Some((0x0e8, 0x99)),
};

/// 8977/8987/8997
pub const REG_SD89XX: CardReg = CardReg {
    start_rd_port: 0,
    start_wr_port: 0,
    base_0_reg: 0xf8,
    base_1_reg: 0xf9,
    poll_reg: 0x5c,
    host_int_enable: NEW_MODE_INT_ENABLE,
    host_int_rsr_reg: 0x04,
    host_int_status_reg: 0x0c,
    host_int_mask_reg: 0x08,
    status_reg_0: 0xe8,
    status_reg_1: 0xe9,
    sdio_int_mask: 0xff,
    data_port_mask: 0xffff_ffff,
    io_port_0_reg: 0xe4,
    io_port_1_reg: 0xe5,
    io_port_2_reg: 0xe6,
    max_mp_regs: 196,
    rd_bitmap_l: 0x10,
    rd_bitmap_u: 0x11,
    rd_bitmap_1l: 0x12,
    rd_bitmap_1u: 0x13,
    wr_bitmap_l: 0x14,
    wr_bitmap_u: 0x15,
    wr_bitmap_1l: 0x16,
    wr_bitmap_1u: 0x17,
    rd_len_p0_l: 0x18,
    rd_len_p0_u: 0x19,
    card_misc_cfg_reg: 0xd8,
    card_cfg_2_1_reg: 0xd9,
    cmd_rd_len_0: 0xc0,
    cmd_rd_len_1: 0xc1,
    cmd_cfg_0: 0xc4,
    cmd_cfg_1: 0xc5,
    fw_reset: Some((0x0ee, 0x99)),
};

/// 具体芯片描述
#[derive(Debug)]
pub struct SdioDevice {
    pub name: &'static str,
    pub firmware: &'static str,
    pub reg: &'static CardReg,
    /// 端口数（16 或 32）
    pub max_ports: u8,
    /// 单次聚合最大包数
    pub mp_agg_pkt_limit: u8,
    pub mp_tx_agg_buf_size: usize,
    pub mp_rx_agg_buf_size: usize,
    /// 新寻址模式：MEM_PORT + 独立命令通道，端口 0 不再保留
    pub supports_sdio_new_mode: bool,
    /// 控制端口位用于命令发送完成（旧寻址模式）
    pub has_control_mask: bool,
    /// CRC 重发预算耗尽后允许整镜像重下（MIC 错误）
    pub fw_mic_restart: bool,
}

impl SdioDevice {
    /// 是否可以为 `port` 读长度（端口号小于 max_ports）
    #[inline]
    pub fn port_valid(&self, port: u8) -> bool {
        port < self.max_ports
    }
}

pub const SD8786: SdioDevice = SdioDevice {
    name: "sd8786",
    firmware: "mrvl/sd8786_uapsta.bin",
    reg: &REG_SD87XX,
    max_ports: 16,
    mp_agg_pkt_limit: 8,
    mp_tx_agg_buf_size: MWIFIEX_MP_AGGR_BUF_SIZE_16K,
    mp_rx_agg_buf_size: MWIFIEX_MP_AGGR_BUF_SIZE_16K,
    supports_sdio_new_mode: false,
    has_control_mask: true,
    fw_mic_restart: false,
};

pub const SD8787: SdioDevice = SdioDevice {
    name: "sd8787",
    firmware: "mrvl/sd8787_uapsta.bin",
    ..SD8786
};

pub const SD8797: SdioDevice = SdioDevice {
    name: "sd8797",
    firmware: "mrvl/sd8797_uapsta.bin",
    ..SD8786
};

pub const SD8801: SdioDevice = SdioDevice {
    name: "sd8801",
    firmware: "mrvl/sd8801_uapsta.bin",
    ..SD8786
};

pub const SD8887: SdioDevice = SdioDevice {
    name: "sd8887",
    firmware: "mrvl/sd8887_uapsta.bin",
    reg: &REG_SD8887,
    max_ports: 32,
    mp_agg_pkt_limit: 16,
    mp_tx_agg_buf_size: MWIFIEX_MP_AGGR_BUF_SIZE_32K,
    mp_rx_agg_buf_size: MWIFIEX_MP_AGGR_BUF_SIZE_32K,
    supports_sdio_new_mode: true,
    has_control_mask: false,
    fw_mic_restart: false,
};

pub const SD8897: SdioDevice = SdioDevice {
    name: "sd8897",
    firmware: "mrvl/sd8897_uapsta.bin",
    reg: &REG_SD8897,
    max_ports: 32,
    mp_agg_pkt_limit: 16,
    mp_tx_agg_buf_size: MWIFIEX_MP_AGGR_BUF_SIZE_MAX,
    mp_rx_agg_buf_size: MWIFIEX_MP_AGGR_BUF_SIZE_MAX,
    supports_sdio_new_mode: true,
    has_control_mask: false,
    fw_mic_restart: false,
};

pub const SD8977: SdioDevice = SdioDevice {
    name: "sd8977",
    firmware: "mrvl/sdsd8977_combo_v2.bin",
    reg: &REG_SD89XX,
    fw_mic_restart: true,
    ..SD8897
};

pub const SD8987: SdioDevice = SdioDevice {
    name: "sd8987",
    firmware: "mrvl/sd8987_uapsta.bin",
    ..SD8977
};

pub const SD8997: SdioDevice = SdioDevice {
    name: "sd8997",
    firmware: "mrvl/sdsd8997_combo_v4.bin",
    ..SD8977
};

/// 支持的设备表
pub static SDIO_DEVICE_TABLE: [(SdioDeviceId, &SdioDevice); 9] = [
    (SdioDeviceId::device(SDIO_VENDOR_ID_MARVELL, sdio_ids::SD8786), &SD8786),
    (SdioDeviceId::device(SDIO_VENDOR_ID_MARVELL, sdio_ids::SD8787), &SD8787),
    (SdioDeviceId::device(SDIO_VENDOR_ID_MARVELL, sdio_ids::SD8797), &SD8797),
    (SdioDeviceId::device(SDIO_VENDOR_ID_MARVELL, sdio_ids::SD8801), &SD8801),
    (SdioDeviceId::device(SDIO_VENDOR_ID_MARVELL, sdio_ids::SD8887), &SD8887),
    (SdioDeviceId::device(SDIO_VENDOR_ID_MARVELL, sdio_ids::SD8897), &SD8897),
    (SdioDeviceId::device(SDIO_VENDOR_ID_MARVELL, sdio_ids::SD8977), &SD8977),
    (SdioDeviceId::device(SDIO_VENDOR_ID_MARVELL, sdio_ids::SD8987), &SD8987),
    (SdioDeviceId::device(SDIO_VENDOR_ID_MARVELL, sdio_ids::SD8997), &SD8997),
];

/// 按探测到的 ID 查找芯片描述
pub fn chipmatch(id: &SdioDeviceId) -> Option<&'static SdioDevice> {
    SDIO_DEVICE_TABLE
        .iter()
        .find(|(entry, _)| entry.matches(id))
        .map(|(_, dev)| *dev)
}
