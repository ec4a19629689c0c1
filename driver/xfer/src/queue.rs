//! BufQueue：TransferBuffer 的 FIFO（对应 sk_buff_head + skb_queue_tail / skb_dequeue）

use alloc::collections::VecDeque;

use crate::TransferBuffer;

/// 接收队列：中断路径入队，接收工作者出队
#[derive(Debug, Default)]
pub struct BufQueue {
    queue: VecDeque<TransferBuffer>,
}

impl BufQueue {
    pub const fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    /// 队尾入队
    pub fn push_tail(&mut self, buf: TransferBuffer) {
        self.queue.push_back(buf);
    }

    /// 队首出队
    pub fn pop_head(&mut self) -> Option<TransferBuffer> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// 清空，返回被丢弃的包数
    pub fn purge(&mut self) -> usize {
        let n = self.queue.len();
        self.queue.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut q = BufQueue::new();
        q.push_tail(TransferBuffer::from_slice(&[1]));
        q.push_tail(TransferBuffer::from_slice(&[2]));
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop_head().map(|b| b.data()[0]), Some(1));
        assert_eq!(q.purge(), 1);
        assert!(q.pop_head().is_none());
    }
}
