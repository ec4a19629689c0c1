//! 向上层的回调契约
//!
//! 传输层只通过 [`TransportOps`] 把数据、事件、命令响应与发送完成交给上层，
//! 以及请求启停刷新定时器。回调在 CardContext 锁之外执行：持锁期间产生的投递先记为
//! [`Upcall`]，释放锁后依次 [`Upcall::deliver`]。

use xfer::TransferBuffer;

use crate::error::SdioResult;
use crate::types::PacketType;

/// 上层回调。所有方法都在锁外调用，实现方可以在其中重新提交发送。
pub trait TransportOps {
    /// 收到数据包（已去掉接口头）
    fn on_data_received(&self, buf: TransferBuffer);

    /// 收到事件：`cause` 为事件号，`buf` 为去掉事件号之后的事件体
    fn on_event(&self, cause: u32, buf: TransferBuffer);

    /// 收到与在途命令匹配的响应
    fn on_cmd_response(&self, buf: TransferBuffer);

    /// 固件加载请求块
    fn on_fw_loader_block(&self, _buf: TransferBuffer) {}

    /// 一个已提交缓冲传输结束，`status` 为结果
    fn on_tx_complete(&self, buf: TransferBuffer, ty: PacketType, status: SdioResult);

    /// 接收队列非空（rx_work 模式下调度接收工作者）
    fn on_rx_pending(&self) {}

    /// 启动单次刷新定时器，到期后调用 `SdioTransport::on_flush_timer`
    fn start_timer(&self, _ms: u32) {}

    fn stop_timer(&self) {}
}

/// 持锁期间记录的一次上行投递
#[derive(Debug)]
pub enum Upcall {
    Data(TransferBuffer),
    Event { cause: u32, buf: TransferBuffer },
    CmdResp(TransferBuffer),
    FwLoader(TransferBuffer),
    TxComplete {
        buf: TransferBuffer,
        ty: PacketType,
        status: SdioResult,
    },
    RxPending,
    StartTimer(u32),
    StopTimer,
}

impl Upcall {
    pub fn deliver<O: TransportOps + ?Sized>(self, ops: &O) {
        match self {
            Upcall::Data(buf) => ops.on_data_received(buf),
            Upcall::Event { cause, buf } => ops.on_event(cause, buf),
            Upcall::CmdResp(buf) => ops.on_cmd_response(buf),
            Upcall::FwLoader(buf) => ops.on_fw_loader_block(buf),
            Upcall::TxComplete { buf, ty, status } => ops.on_tx_complete(buf, ty, status),
            Upcall::RxPending => ops.on_rx_pending(),
            Upcall::StartTimer(ms) => ops.start_timer(ms),
            Upcall::StopTimer => ops.stop_timer(),
        }
    }
}
