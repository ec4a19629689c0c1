//! TransferBuffer
//!
//! 布局：`[ headroom | data (len) | tailroom ]`。`put` / `pull` / `push` / `trim`
//! 与 sk_buff 的 skb_put / skb_pull / skb_push / skb_trim 语义一致。

use alloc::collections::TryReserveError;
use alloc::vec::Vec;
use core::fmt;

/// 单个逻辑包的缓冲。
///
/// 同一时刻只被一个阶段持有（提交方 → 聚合 → 总线传输 → 完成回调），以 move 体现所有权。
/// 逻辑长度 `len` 与按块填充后的线上长度无关，见 [`TransferBuffer::wire_len`]。
#[derive(Clone)]
pub struct TransferBuffer {
    /// [0..offset] = headroom, [offset..offset+len] = data, 其后为 tailroom
    storage: Vec<u8>,
    offset: usize,
    len: usize,
}

impl TransferBuffer {
    /// 分配指定总容量的缓冲（零填充），初始 data 长度 0。
    pub fn alloc(capacity: usize) -> Self {
        Self::alloc_with_headroom(capacity, 0)
    }

    /// 分配容量并在前端预留 headroom 字节。
    pub fn alloc_with_headroom(capacity: usize, headroom: usize) -> Self {
        let mut storage = Vec::new();
        storage.resize(capacity, 0);
        Self {
            storage,
            offset: headroom.min(capacity),
            len: 0,
        }
    }

    /// 可失败的分配，用于中断路径上按通告长度分配接收缓冲。
    pub fn try_alloc(capacity: usize) -> Result<Self, TryReserveError> {
        let mut storage = Vec::new();
        storage.try_reserve_exact(capacity)?;
        storage.resize(capacity, 0);
        Ok(Self {
            storage,
            offset: 0,
            len: 0,
        })
    }

    /// 以 `data` 为内容构造，len = data.len()
    pub fn from_slice(data: &[u8]) -> Self {
        Self {
            storage: data.to_vec(),
            offset: 0,
            len: data.len(),
        }
    }

    /// 当前有效载荷
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.storage[self.offset..self.offset + self.len]
    }

    /// 当前有效载荷（可写）
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.offset..self.offset + self.len]
    }

    /// data 起点到存储末尾（接收时整段填充后再 `set_len`）
    #[inline]
    pub fn room_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.offset..]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// data 在存储中的偏移
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    #[inline]
    pub fn headroom(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn tailroom(&self) -> usize {
        self.storage.len() - self.offset - self.len
    }

    /// 设置有效长度，超出存储部分被截断
    #[inline]
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.storage.len() - self.offset);
    }

    /// 在尾部追加 n 字节，返回可写切片；空间不足返回 None
    pub fn put(&mut self, n: usize) -> Option<&mut [u8]> {
        if self.tailroom() < n {
            return None;
        }
        let start = self.offset + self.len;
        self.len += n;
        Some(&mut self.storage[start..start + n])
    }

    /// 在尾部追加 `data` 的拷贝
    pub fn put_slice(&mut self, data: &[u8]) -> bool {
        match self.put(data.len()) {
            Some(dst) => {
                dst.copy_from_slice(data);
                true
            }
            None => false,
        }
    }

    /// 从头部消费 n 字节
    #[inline]
    pub fn pull(&mut self, n: usize) {
        let n = n.min(self.len);
        self.offset += n;
        self.len -= n;
    }

    /// 在 data 前扩展 n 字节；headroom 不足返回 false
    #[inline]
    pub fn push(&mut self, n: usize) -> bool {
        if self.offset < n {
            return false;
        }
        self.offset -= n;
        self.len += n;
        true
    }

    /// 把有效长度截到 `len`（只缩不涨）
    #[inline]
    pub fn trim(&mut self, len: usize) {
        if len < self.len {
            self.len = len;
        }
    }

    /// 按 `block` 向上对齐后的线上长度
    #[inline]
    pub fn wire_len(&self, block: usize) -> usize {
        if block == 0 {
            return self.len;
        }
        self.len.div_ceil(block) * block
    }

    /// 确保 data 之后至少有到 `wire_len(block)` 为止的存储（不足部分补零），
    /// 逻辑长度不变；返回线上长度
    pub fn pad_to_block(&mut self, block: usize) -> usize {
        let wire = self.wire_len(block);
        let need = self.offset + wire;
        if self.storage.len() < need {
            self.storage.resize(need, 0);
        }
        wire
    }

    /// 线上视图：从 data 起点开始取 `wire_len` 字节，含对齐填充。
    /// 需先 `pad_to_block`，越界时截到存储末尾。
    #[inline]
    pub fn wire(&self, wire_len: usize) -> &[u8] {
        let end = (self.offset + wire_len).min(self.storage.len());
        &self.storage[self.offset..end]
    }
}

impl fmt::Debug for TransferBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferBuffer")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("capacity", &self.storage.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_pull_trim() {
        let mut buf = TransferBuffer::alloc_with_headroom(64, 4);
        assert_eq!(buf.headroom(), 4);
        assert!(buf.put_slice(&[1, 2, 3, 4, 5, 6, 7, 8]));
        assert_eq!(buf.data(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        buf.pull(2);
        assert_eq!(buf.data(), &[3, 4, 5, 6, 7, 8]);
        buf.trim(3);
        assert_eq!(buf.data(), &[3, 4, 5]);
        buf.trim(10);
        assert_eq!(buf.len(), 3);
        assert!(buf.push(6));
        assert_eq!(buf.offset(), 0);
        assert!(!buf.push(1));
        assert!(buf.put(100).is_none());
    }

    #[test]
    fn padding_keeps_logical_len() {
        let mut buf = TransferBuffer::from_slice(&[0xaa; 100]);
        assert_eq!(buf.wire_len(64), 128);
        assert_eq!(buf.pad_to_block(64), 128);
        assert_eq!(buf.len(), 100);
        let wire = buf.wire(128);
        assert_eq!(wire.len(), 128);
        assert!(wire[..100].iter().all(|&b| b == 0xaa));
        assert!(wire[100..].iter().all(|&b| b == 0));
        assert_eq!(TransferBuffer::alloc(0).wire_len(256), 0);
    }

    #[test]
    fn set_len_clamps_to_room() {
        let mut buf = TransferBuffer::alloc_with_headroom(16, 4);
        buf.room_mut()[..3].copy_from_slice(&[9, 8, 7]);
        buf.set_len(3);
        assert_eq!(buf.data(), &[9, 8, 7]);
        buf.set_len(1000);
        assert_eq!(buf.len(), 12);
    }
}
