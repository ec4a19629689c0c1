//! 端口位图分配器
//!
//! 读/写位图的第 i 位表示端口 i 有数据可读 / 有空间可写。位图只在中断派发时由
//! 硬件快照刷新（[`PortAllocator::refresh_read`] / [`PortAllocator::refresh_write`]），
//! 分配器本身从不访问硬件。分配取走的位在下次刷新前不会再次分配。

use crate::regs::SdioDevice;
use crate::types::{CTRL_PORT, CTRL_PORT_MASK};

const LOG_TARGET: &str = "mwifiex::sdio";

#[derive(Debug, Clone)]
pub struct PortAllocator {
    rd_bitmap: u32,
    wr_bitmap: u32,
    curr_rd_port: u8,
    curr_wr_port: u8,
    start_rd_port: u8,
    start_wr_port: u8,
    max_ports: u8,
    /// 写端口游标的回绕点（上层可收窄）
    mp_end_port: u8,
    data_port_mask: u32,
    /// 收窄后的写端口掩码
    mp_data_port_mask: u32,
    /// 旧寻址模式：端口 0 保留给命令/事件
    ctrl_reserved: bool,
}

impl PortAllocator {
    pub fn new(dev: &SdioDevice) -> Self {
        let reg = dev.reg;
        let port_mask = if dev.max_ports >= 32 {
            u32::MAX
        } else {
            (1u32 << dev.max_ports) - 1
        };
        Self {
            rd_bitmap: 0,
            wr_bitmap: 0,
            curr_rd_port: reg.start_rd_port,
            curr_wr_port: reg.start_wr_port,
            start_rd_port: reg.start_rd_port,
            start_wr_port: reg.start_wr_port,
            max_ports: dev.max_ports,
            mp_end_port: dev.max_ports,
            data_port_mask: reg.data_port_mask & port_mask,
            mp_data_port_mask: reg.data_port_mask & port_mask,
            ctrl_reserved: dev.has_control_mask,
        }
    }

    /// 回到初始游标并清空位图（总线初始化时）
    pub fn reset(&mut self) {
        self.rd_bitmap = 0;
        self.wr_bitmap = 0;
        self.curr_rd_port = self.start_rd_port;
        self.curr_wr_port = self.start_wr_port;
    }

    #[inline]
    pub fn rd_bitmap(&self) -> u32 {
        self.rd_bitmap
    }

    #[inline]
    pub fn wr_bitmap(&self) -> u32 {
        self.wr_bitmap
    }

    #[inline]
    pub fn curr_rd_port(&self) -> u8 {
        self.curr_rd_port
    }

    #[inline]
    pub fn curr_wr_port(&self) -> u8 {
        self.curr_wr_port
    }

    #[inline]
    pub fn start_wr_port(&self) -> u8 {
        self.start_wr_port
    }

    #[inline]
    pub fn max_ports(&self) -> u8 {
        self.max_ports
    }

    #[inline]
    pub fn mp_end_port(&self) -> u8 {
        self.mp_end_port
    }

    #[inline]
    pub fn ctrl_reserved(&self) -> bool {
        self.ctrl_reserved
    }

    /// 读位图中可信的位：数据端口，旧寻址模式另加控制端口
    #[inline]
    pub fn read_mask(&self) -> u32 {
        if self.ctrl_reserved {
            self.data_port_mask | CTRL_PORT_MASK
        } else {
            self.data_port_mask
        }
    }

    /// 写位图中可信的位（控制端口不参与数据写）
    #[inline]
    pub fn write_mask(&self) -> u32 {
        self.data_port_mask
    }

    /// 用硬件快照覆盖读位图，返回被丢弃的越界位
    pub fn refresh_read(&mut self, bitmap: u32) -> u32 {
        let mask = self.read_mask();
        self.rd_bitmap = bitmap & mask;
        bitmap & !mask
    }

    /// 用硬件快照覆盖写位图，返回被丢弃的越界位
    pub fn refresh_write(&mut self, bitmap: u32) -> u32 {
        let mask = self.write_mask();
        self.wr_bitmap = bitmap & mask;
        bitmap & !mask
    }

    /// 读位图中是否还有其他数据端口待读（不含控制端口）
    #[inline]
    pub fn has_pending_data(&self) -> bool {
        self.rd_bitmap & self.data_port_mask != 0
    }

    /// 丢弃读位图中的某一位（硬件通告长度为 0 的陈旧位）
    #[inline]
    pub fn drop_read_bit(&mut self, port: u8) {
        self.rd_bitmap &= !(1u32 << port);
    }

    /// 分配一个读端口。
    ///
    /// 旧寻址模式下控制端口优先；否则只取当前游标处的位，取走后游标在
    /// `[start_rd_port, max_ports)` 内循环前进。无可读端口返回 None，等待下次中断。
    pub fn allocate_read_port(&mut self) -> Option<u8> {
        if self.rd_bitmap & self.read_mask() == 0 {
            return None;
        }
        if self.ctrl_reserved && self.rd_bitmap & CTRL_PORT_MASK != 0 {
            self.rd_bitmap &= !CTRL_PORT_MASK;
            log::trace!(target: LOG_TARGET, "rd port: ctrl, rd_bitmap={:#010x}", self.rd_bitmap);
            return Some(CTRL_PORT);
        }
        let port = self.curr_rd_port;
        if self.rd_bitmap & (1u32 << port) == 0 {
            return None;
        }
        self.rd_bitmap &= !(1u32 << port);
        self.curr_rd_port += 1;
        if self.curr_rd_port >= self.max_ports {
            self.curr_rd_port = self.start_rd_port;
        }
        log::trace!(
            target: LOG_TARGET,
            "rd port {} rd_bitmap={:#010x}",
            port,
            self.rd_bitmap
        );
        Some(port)
    }

    /// 分配一个写端口：取当前写游标处的位，游标在 `[start_wr_port, mp_end_port)` 内循环。
    /// 无可写端口返回 None。
    pub fn allocate_write_port(&mut self) -> Option<u8> {
        if self.wr_bitmap & self.mp_data_port_mask == 0 {
            return None;
        }
        let port = self.curr_wr_port;
        if self.wr_bitmap & (1u32 << port) == 0 {
            return None;
        }
        if self.ctrl_reserved && port == CTRL_PORT {
            log::error!(target: LOG_TARGET, "wr port: cursor on ctrl port, refusing");
            return None;
        }
        self.wr_bitmap &= !(1u32 << port);
        self.curr_wr_port += 1;
        if self.curr_wr_port >= self.mp_end_port {
            self.curr_wr_port = self.start_wr_port;
        }
        log::trace!(
            target: LOG_TARGET,
            "wr port {} wr_bitmap={:#010x}",
            port,
            self.wr_bitmap
        );
        Some(port)
    }

    /// 发送失败后归还端口：游标退回并恢复该位
    pub fn restore_write_port(&mut self, port: u8) {
        self.curr_wr_port = port;
        self.wr_bitmap |= 1u32 << port;
    }

    /// 当前写游标处的端口是否可写
    #[inline]
    pub fn write_port_free(&self) -> bool {
        self.wr_bitmap & (1u32 << self.curr_wr_port) != 0
    }

    /// 收窄写端口范围到 `[start_wr_port, end_port)`，游标回到起点。
    /// 端口号非法时保持原样并返回 false。
    pub fn update_mp_end_port(&mut self, end_port: u8) -> bool {
        if end_port <= self.start_wr_port || end_port > self.max_ports {
            log::warn!(target: LOG_TARGET, "mp_end_port {} out of range, ignored", end_port);
            return false;
        }
        self.mp_end_port = end_port;
        self.mp_data_port_mask = self.data_port_mask;
        for port in end_port..self.max_ports {
            self.mp_data_port_mask &= !(1u32 << port);
        }
        self.curr_wr_port = self.start_wr_port;
        log::debug!(
            target: LOG_TARGET,
            "mp_end_port {}, data_port_mask {:#010x}",
            end_port,
            self.mp_data_port_mask
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::{SD8787, SD8897};

    #[test]
    fn ctrl_port_first_on_legacy() {
        let mut p = PortAllocator::new(&SD8787);
        p.refresh_read(0b1_0011);
        assert_eq!(p.allocate_read_port(), Some(CTRL_PORT));
        assert_eq!(p.allocate_read_port(), Some(1));
        // 游标在 2，端口 4 不在游标处
        assert_eq!(p.allocate_read_port(), None);
        assert_eq!(p.rd_bitmap(), 0b1_0000);
    }

    #[test]
    fn read_cursor_wraps_to_start() {
        let mut p = PortAllocator::new(&SD8787);
        for expect in 1..16u8 {
            p.refresh_read(1 << expect);
            assert_eq!(p.allocate_read_port(), Some(expect));
        }
        assert_eq!(p.curr_rd_port(), 1);
    }

    #[test]
    fn new_mode_uses_port_zero_for_data() {
        let mut p = PortAllocator::new(&SD8897);
        p.refresh_write(0x3);
        assert_eq!(p.allocate_write_port(), Some(0));
        assert_eq!(p.allocate_write_port(), Some(1));
        assert_eq!(p.allocate_write_port(), None);
    }

    #[test]
    fn ctrl_bit_never_in_write_bitmap() {
        let mut p = PortAllocator::new(&SD8787);
        assert_eq!(p.refresh_write(0xffff_ffff), 0xffff_0001);
        assert_eq!(p.wr_bitmap() & CTRL_PORT_MASK, 0);
    }

    #[test]
    fn end_port_narrows_write_range() {
        let mut p = PortAllocator::new(&SD8897);
        assert!(p.update_mp_end_port(4));
        assert!(!p.update_mp_end_port(0));
        p.refresh_write(u32::MAX);
        let got: alloc::vec::Vec<_> = core::iter::from_fn(|| p.allocate_write_port()).collect();
        assert_eq!(got, [0, 1, 2, 3]);
    }

    #[test]
    fn restore_returns_port() {
        let mut p = PortAllocator::new(&SD8897);
        p.refresh_write(0x4);
        p.curr_wr_port = 2;
        assert_eq!(p.allocate_write_port(), Some(2));
        assert!(!p.write_port_free());
        p.restore_write_port(2);
        assert_eq!(p.curr_wr_port(), 2);
        assert!(p.write_port_free());
    }

    /// 任意分配/刷新序列下，被分配取走的位在下一次刷新前不会再被分配。
    #[test]
    fn allocated_bits_not_reoffered_until_refresh() {
        let mut seed = 0x2545_f491u32;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            seed
        };
        for dev in [&SD8787, &SD8897] {
            let mut p = PortAllocator::new(dev);
            let mut taken_rd = 0u32;
            let mut taken_wr = 0u32;
            for _ in 0..2000 {
                match next() % 4 {
                    0 => {
                        p.refresh_read(next());
                        taken_rd = 0;
                    }
                    1 => {
                        p.refresh_write(next());
                        taken_wr = 0;
                    }
                    2 => {
                        if let Some(port) = p.allocate_read_port() {
                            assert_eq!(taken_rd & (1 << port), 0);
                            taken_rd |= 1 << port;
                        }
                    }
                    _ => {
                        if let Some(port) = p.allocate_write_port() {
                            assert_eq!(taken_wr & (1 << port), 0);
                            assert!(!(p.ctrl_reserved() && port == CTRL_PORT));
                            taken_wr |= 1 << port;
                        }
                    }
                }
                assert!(p.curr_rd_port() < dev.max_ports);
                assert!(p.curr_wr_port() < dev.max_ports);
                assert!(p.curr_rd_port() >= dev.reg.start_rd_port);
                assert!(p.curr_wr_port() >= dev.reg.start_wr_port);
            }
        }
    }
}
