//! 测试用脚本化总线
//!
//! 寄存器文件 + 按地址排队的脚本读值；CMD53 读按地址取预置载荷，地址 0 为寄存器快照；
//! 记录所有写入，并可注入若干次失败。

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;
use core::cell::RefCell;

use mmc::SdioFunc;
use spin::Mutex;
use xfer::TransferBuffer;

use crate::card::CardContext;
use crate::config::SdioConfig;
use crate::error::{errno, SdioResult};
use crate::ops::TransportOps;
use crate::regs::SdioDevice;
use crate::types::{PacketType, REG_PORT};

#[derive(Default)]
struct BusState {
    regs: BTreeMap<u32, u8>,
    scripted: BTreeMap<u32, VecDeque<u8>>,
    reg_writes: Vec<(u32, u8)>,
    snapshot: Vec<u8>,
    snapshot_fail: u32,
    snapshot_reads: u32,
    rx_data: BTreeMap<u32, VecDeque<Vec<u8>>>,
    block_writes: Vec<(u32, Vec<u8>)>,
    block_reads: Vec<(u32, usize)>,
    write_fail: u32,
    read_fail: u32,
    sg: bool,
    block_size: u16,
    enabled: bool,
    irq_claimed: bool,
}

pub struct MockFunc {
    vendor: u16,
    device: u16,
    state: Mutex<BusState>,
}

impl MockFunc {
    pub fn new(vendor: u16, device: u16) -> Self {
        Self {
            vendor,
            device,
            state: Mutex::new(BusState::default()),
        }
    }

    pub fn set_reg(&self, addr: u8, val: u8) {
        self.state.lock().regs.insert(addr as u32, val);
    }

    pub fn reg(&self, addr: u8) -> u8 {
        self.state.lock().regs.get(&(addr as u32)).copied().unwrap_or(0)
    }

    /// 之后对 `addr` 的读依次返回 `vals`，用完后回落到寄存器文件
    pub fn script_reg(&self, addr: u8, vals: &[u8]) {
        self.state
            .lock()
            .scripted
            .entry(addr as u32)
            .or_default()
            .extend(vals.iter().copied());
    }

    pub fn set_snapshot(&self, regs: Vec<u8>) {
        self.state.lock().snapshot = regs;
    }

    pub fn fail_snapshot(&self, n: u32) {
        self.state.lock().snapshot_fail = n;
    }

    pub fn snapshot_reads(&self) -> u32 {
        self.state.lock().snapshot_reads
    }

    pub fn queue_rx(&self, addr: u32, data: Vec<u8>) {
        self.state.lock().rx_data.entry(addr).or_default().push_back(data);
    }

    pub fn fail_writes(&self, n: u32) {
        self.state.lock().write_fail = n;
    }

    pub fn fail_reads(&self, n: u32) {
        self.state.lock().read_fail = n;
    }

    pub fn set_sg(&self, sg: bool) {
        self.state.lock().sg = sg;
    }

    pub fn block_writes(&self) -> Vec<(u32, Vec<u8>)> {
        self.state.lock().block_writes.clone()
    }

    pub fn block_reads(&self) -> Vec<(u32, usize)> {
        self.state.lock().block_reads.clone()
    }

    pub fn reg_writes(&self) -> Vec<(u32, u8)> {
        self.state.lock().reg_writes.clone()
    }

    pub fn block_size(&self) -> u16 {
        self.state.lock().block_size
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    pub fn irq_claimed(&self) -> bool {
        self.state.lock().irq_claimed
    }

    fn read_into(&self, addr: u32, out: &mut [u8]) -> Result<(), i32> {
        let mut st = self.state.lock();
        if addr == REG_PORT {
            st.snapshot_reads += 1;
            if st.snapshot_fail > 0 {
                st.snapshot_fail -= 1;
                return Err(errno::EIO);
            }
            let n = out.len().min(st.snapshot.len());
            out[..n].copy_from_slice(&st.snapshot[..n]);
            out[n..].fill(0);
            return Ok(());
        }
        st.block_reads.push((addr, out.len()));
        if st.read_fail > 0 {
            st.read_fail -= 1;
            return Err(errno::EIO);
        }
        let data = st.rx_data.get_mut(&addr).and_then(VecDeque::pop_front);
        let Some(data) = data else {
            return Err(errno::ETIMEDOUT);
        };
        let n = out.len().min(data.len());
        out[..n].copy_from_slice(&data[..n]);
        out[n..].fill(0);
        Ok(())
    }

    fn write_from(&self, addr: u32, data: Vec<u8>) -> Result<(), i32> {
        let mut st = self.state.lock();
        if st.write_fail > 0 {
            st.write_fail -= 1;
            return Err(errno::EIO);
        }
        st.block_writes.push((addr, data));
        Ok(())
    }
}

impl SdioFunc for MockFunc {
    fn vendor(&self) -> u16 {
        self.vendor
    }

    fn device(&self) -> u16 {
        self.device
    }

    fn readb(&self, addr: u32) -> Result<u8, i32> {
        let mut st = self.state.lock();
        if let Some(v) = st.scripted.get_mut(&addr).and_then(VecDeque::pop_front) {
            return Ok(v);
        }
        Ok(st.regs.get(&addr).copied().unwrap_or(0))
    }

    fn writeb(&self, addr: u32, b: u8) -> Result<(), i32> {
        let mut st = self.state.lock();
        st.reg_writes.push((addr, b));
        st.regs.insert(addr, b);
        Ok(())
    }

    fn readsb(&self, addr: u32, buf: &mut [u8]) -> Result<(), i32> {
        self.read_into(addr, buf)
    }

    fn writesb(&self, addr: u32, buf: &[u8]) -> Result<(), i32> {
        self.write_from(addr, buf.to_vec())
    }

    fn supports_sg(&self) -> bool {
        self.state.lock().sg
    }

    fn readsb_sg(&self, addr: u32, segs: &mut [&mut [u8]]) -> Result<(), i32> {
        let total: usize = segs.iter().map(|s| s.len()).sum();
        let mut whole = alloc::vec![0u8; total];
        self.read_into(addr, &mut whole)?;
        let mut off = 0;
        for seg in segs.iter_mut() {
            let n = seg.len();
            seg.copy_from_slice(&whole[off..off + n]);
            off += n;
        }
        Ok(())
    }

    fn writesb_sg(&self, addr: u32, segs: &[&[u8]]) -> Result<(), i32> {
        self.write_from(addr, segs.concat())
    }

    fn set_block_size(&self, blksz: u16) -> Result<(), i32> {
        self.state.lock().block_size = blksz;
        Ok(())
    }

    fn enable_func(&self) -> Result<(), i32> {
        self.state.lock().enabled = true;
        Ok(())
    }

    fn disable_func(&self) -> Result<(), i32> {
        self.state.lock().enabled = false;
        Ok(())
    }

    fn claim_irq(&self, _handler: Option<mmc::SdioIrqHandler>) -> Result<(), i32> {
        self.state.lock().irq_claimed = true;
        Ok(())
    }

    fn release_irq(&self) -> Result<(), i32> {
        self.state.lock().irq_claimed = false;
        Ok(())
    }

    fn delay_us(&self, _us: u32) {}

    fn delay_ms(&self, _ms: u32) {}
}

/// 记录所有回调的 TransportOps
#[derive(Default)]
pub struct Recorder {
    pub data: RefCell<Vec<Vec<u8>>>,
    pub events: RefCell<Vec<(u32, Vec<u8>)>>,
    pub cmd_resps: RefCell<Vec<Vec<u8>>>,
    pub fw_blocks: RefCell<Vec<Vec<u8>>>,
    pub tx_done: RefCell<Vec<(PacketType, usize, SdioResult)>>,
    pub rx_pending: RefCell<u32>,
    pub timer: RefCell<Option<u32>>,
}

impl Recorder {
    /// 依次投递 CardContext 积压的上行
    pub fn drain<F: SdioFunc>(&self, card: &mut CardContext<F>) {
        for u in card.take_upcalls() {
            u.deliver(self);
        }
    }

    pub fn tx_ok(&self) -> usize {
        self.tx_done.borrow().iter().filter(|(_, _, s)| s.is_ok()).count()
    }

    pub fn tx_err(&self) -> usize {
        self.tx_done.borrow().iter().filter(|(_, _, s)| s.is_err()).count()
    }
}

impl TransportOps for Recorder {
    fn on_data_received(&self, buf: TransferBuffer) {
        self.data.borrow_mut().push(buf.data().to_vec());
    }

    fn on_event(&self, cause: u32, buf: TransferBuffer) {
        self.events.borrow_mut().push((cause, buf.data().to_vec()));
    }

    fn on_cmd_response(&self, buf: TransferBuffer) {
        self.cmd_resps.borrow_mut().push(buf.data().to_vec());
    }

    fn on_fw_loader_block(&self, buf: TransferBuffer) {
        self.fw_blocks.borrow_mut().push(buf.data().to_vec());
    }

    fn on_tx_complete(&self, buf: TransferBuffer, ty: PacketType, status: SdioResult) {
        self.tx_done.borrow_mut().push((ty, buf.len(), status));
    }

    fn on_rx_pending(&self) {
        *self.rx_pending.borrow_mut() += 1;
    }

    fn start_timer(&self, ms: u32) {
        *self.timer.borrow_mut() = Some(ms);
    }

    fn stop_timer(&self) {
        *self.timer.borrow_mut() = None;
    }
}

/// 构造一个已完成总线初始化的上下文
pub fn card(dev: &'static SdioDevice, cfg: SdioConfig) -> CardContext<MockFunc> {
    let func = MockFunc::new(crate::types::SDIO_VENDOR_ID_MARVELL, 0);
    let reg = dev.reg;
    if !dev.supports_sdio_new_mode {
        func.set_reg(reg.io_port_0_reg, 0x00);
        func.set_reg(reg.io_port_1_reg, 0x00);
        func.set_reg(reg.io_port_2_reg, 0x01);
    }
    let mut card = match CardContext::new(func, dev, cfg) {
        Ok(card) => card,
        Err(e) => panic!("card context: {:?}", e),
    };
    if let Err(e) = card.init_sdio() {
        panic!("init_sdio: {:?}", e);
    }
    card
}

/// 按 `dev` 的寄存器布局构造快照
pub struct Snapshot<'a> {
    dev: &'a SdioDevice,
    pub regs: Vec<u8>,
}

impl<'a> Snapshot<'a> {
    pub fn new(dev: &'a SdioDevice) -> Self {
        Self {
            dev,
            regs: alloc::vec![0; dev.reg.max_mp_regs as usize],
        }
    }

    pub fn status(mut self, bits: u8) -> Self {
        self.regs[self.dev.reg.host_int_status_reg as usize] = bits;
        self
    }

    pub fn rd_bitmap(mut self, bitmap: u32) -> Self {
        let r = self.dev.reg;
        self.regs[r.rd_bitmap_l as usize] = bitmap as u8;
        self.regs[r.rd_bitmap_u as usize] = (bitmap >> 8) as u8;
        if self.dev.supports_sdio_new_mode {
            self.regs[r.rd_bitmap_1l as usize] = (bitmap >> 16) as u8;
            self.regs[r.rd_bitmap_1u as usize] = (bitmap >> 24) as u8;
        }
        self
    }

    pub fn wr_bitmap(mut self, bitmap: u32) -> Self {
        let r = self.dev.reg;
        self.regs[r.wr_bitmap_l as usize] = bitmap as u8;
        self.regs[r.wr_bitmap_u as usize] = (bitmap >> 8) as u8;
        if self.dev.supports_sdio_new_mode {
            self.regs[r.wr_bitmap_1l as usize] = (bitmap >> 16) as u8;
            self.regs[r.wr_bitmap_1u as usize] = (bitmap >> 24) as u8;
        }
        self
    }

    pub fn rd_len(mut self, port: u8, len: u16) -> Self {
        let (l, u) = self.dev.reg.rd_len_regs(port);
        self.regs[l] = len as u8;
        self.regs[u] = (len >> 8) as u8;
        self
    }

    pub fn cmd_len(mut self, len: u16) -> Self {
        let r = self.dev.reg;
        self.regs[r.cmd_rd_len_0 as usize] = len as u8;
        self.regs[r.cmd_rd_len_1 as usize] = (len >> 8) as u8;
        self
    }
}

/// 带接口头、按 `block` 填充的线上包
pub fn wire_packet(ty: PacketType, payload: &[u8], block: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let len = (payload.len() + 4) as u16;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&ty.tag().to_le_bytes());
    out.extend_from_slice(payload);
    out.resize(out.len().div_ceil(block) * block, 0);
    out
}

/// 上层提交的发送缓冲：预留 4 字节接口头
pub fn tx_buf(total: usize, fill: u8) -> TransferBuffer {
    let mut buf = TransferBuffer::alloc(total);
    if let Some(out) = buf.put(total) {
        out.fill(fill);
    }
    buf
}
