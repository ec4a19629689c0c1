//! # xfer：传输缓冲
//!
//! - [`TransferBuffer`]：一个逻辑包（命令、事件、数据或固件块），载荷 + 偏移 + 逻辑长度，
//!   块对齐后的线上长度单独计算
//! - [`BufQueue`]：TransferBuffer 的 FIFO，用作接收队列

#![no_std]

extern crate alloc;

mod buffer;
mod queue;

pub use buffer::TransferBuffer;
pub use queue::BufQueue;
