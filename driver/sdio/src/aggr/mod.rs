//! 多端口聚合
//!
//! 发送侧把多个待发包合并成一次跨多个端口的 CMD53 写，接收侧把多个端口的数据合并成
//! 一次读后再按各自的接口头拆开。每一步做什么由 [`decide_tx`] / [`decide_rx`] 两张
//! 决策表给出，执行部分在 `tx.rs` / `rx.rs`。
//!
//! | 动作 | 含义 |
//! |------|------|
//! | Single | 不聚合，单独传输当前包 |
//! | Fold | 折入当前批次，批次保持打开 |
//! | FoldAndFlush | 折入后立即刷出 |
//! | FlushThenFold | 先刷出已有批次，再以当前包开新批次 |
//! | FlushThenSingle | 先刷出已有批次，再单独传输当前包 |
//!
//! 折入之后若包数达到上限或端口跨度达到上限，`Fold` / `FlushThenFold` 升级为刷出。

mod batch;
mod rx;
mod tx;

pub use batch::{RxBatch, RxSlot, Staging, TxBatch, TxPort, TxSlot};
pub use tx::HostToCardError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggrAction {
    Single,
    Fold,
    FoldAndFlush,
    FlushThenFold,
    FlushThenSingle,
}

/// 发送侧决策输入
#[derive(Debug, Clone, Copy, Default)]
pub struct TxInputs {
    /// 聚合已启用且当前包走数据端口
    pub eligible: bool,
    /// 上层告知后面还有包
    pub more_queued: bool,
    /// 当前批次非空
    pub open: bool,
    /// 当前包放得下
    pub fits: bool,
    /// 当前包与下一个包都放得下
    pub fits_with_next: bool,
    /// 写游标处的下一个端口可写
    pub next_port_free: bool,
}

pub fn decide_tx(i: &TxInputs) -> AggrAction {
    use AggrAction::*;
    if !i.eligible {
        return Single;
    }
    match (i.more_queued, i.open) {
        (true, true) if i.fits => {
            if i.next_port_free && i.fits_with_next {
                Fold
            } else {
                FoldAndFlush
            }
        }
        (true, true) => {
            if i.next_port_free {
                FlushThenFold
            } else {
                FlushThenSingle
            }
        }
        (true, false) => {
            if i.fits && i.next_port_free {
                Fold
            } else {
                Single
            }
        }
        // 后面没有包：聚合没有收益，当前批次立即刷出
        (false, true) => {
            if i.fits {
                FoldAndFlush
            } else {
                FlushThenSingle
            }
        }
        (false, false) => Single,
    }
}

/// 接收侧决策输入
#[derive(Debug, Clone, Copy, Default)]
pub struct RxInputs {
    /// 聚合已启用且不是控制端口
    pub eligible: bool,
    /// 读位图中还有其他数据端口
    pub more_pending: bool,
    pub open: bool,
    pub fits: bool,
}

pub fn decide_rx(i: &RxInputs) -> AggrAction {
    use AggrAction::*;
    if !i.eligible {
        return Single;
    }
    match (i.more_pending, i.open) {
        (true, true) => {
            if i.fits {
                Fold
            } else {
                FlushThenFold
            }
        }
        (true, false) => Fold,
        (false, true) => {
            if i.fits {
                FoldAndFlush
            } else {
                FlushThenSingle
            }
        }
        (false, false) => Single,
    }
}

/// 发送端口跨度上限：批次从 `start` 起，写游标已前进到 `curr`。
///
/// 游标回绕（curr < start）时跨度为 `max - start + curr`，旧寻址模式上限取
/// `end / 2`，新模式取包数上限。旧模式下未回绕的跨度同样以 `end / 2` 为限。
pub fn tx_span_reached(
    curr: u8,
    start: u8,
    end: u8,
    max: u8,
    ctrl_reserved: bool,
    pkt_limit: u8,
) -> bool {
    let half = u32::from(end >> 1);
    let (curr, start, max) = (curr as u32, start as u32, max as u32);
    if curr < start {
        let limit = if ctrl_reserved { half } else { u32::from(pkt_limit) };
        return max - start + curr >= limit;
    }
    ctrl_reserved && curr - start >= half
}

/// 接收端口跨度上限：只在读游标回绕后按包数上限判断
pub fn rx_span_reached(curr: u8, start: u8, max: u8, pkt_limit: u8) -> bool {
    curr < start && u32::from(max - start) + u32::from(curr) >= u32::from(pkt_limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use AggrAction::*;

    fn tx(more: bool, open: bool, fits: bool, fits_next: bool, free: bool) -> AggrAction {
        decide_tx(&TxInputs {
            eligible: true,
            more_queued: more,
            open,
            fits,
            fits_with_next: fits_next,
            next_port_free: free,
        })
    }

    #[test]
    fn tx_table() {
        assert_eq!(tx(true, true, true, true, true), Fold);
        assert_eq!(tx(true, true, true, false, true), FoldAndFlush);
        assert_eq!(tx(true, true, true, true, false), FoldAndFlush);
        assert_eq!(tx(true, true, false, false, true), FlushThenFold);
        assert_eq!(tx(true, true, false, false, false), FlushThenSingle);
        assert_eq!(tx(true, false, true, false, true), Fold);
        assert_eq!(tx(true, false, true, true, false), Single);
        assert_eq!(tx(true, false, false, false, true), Single);
        assert_eq!(tx(false, true, true, false, true), FoldAndFlush);
        assert_eq!(tx(false, true, false, false, true), FlushThenSingle);
        assert_eq!(tx(false, false, true, true, true), Single);
        let cmd = TxInputs {
            eligible: false,
            more_queued: true,
            open: true,
            fits: true,
            fits_with_next: true,
            next_port_free: true,
        };
        assert_eq!(decide_tx(&cmd), Single);
    }

    #[test]
    fn rx_table() {
        let rx = |more, open, fits| {
            decide_rx(&RxInputs {
                eligible: true,
                more_pending: more,
                open,
                fits,
            })
        };
        assert_eq!(rx(true, true, true), Fold);
        assert_eq!(rx(true, true, false), FlushThenFold);
        assert_eq!(rx(true, false, false), Fold);
        assert_eq!(rx(false, true, true), FoldAndFlush);
        assert_eq!(rx(false, true, false), FlushThenSingle);
        assert_eq!(rx(false, false, true), Single);
        assert_eq!(decide_rx(&RxInputs::default()), Single);
    }

    #[test]
    fn span_limits() {
        // 新模式 32 端口不回绕时只受包数限制
        assert!(!tx_span_reached(20, 4, 32, 32, false, 16));
        assert!(tx_span_reached(3, 4, 32, 32, false, 16));
        assert!(!tx_span_reached(2, 28, 32, 32, false, 16));
        // 写端口范围收窄到 16 后回绕
        assert!(tx_span_reached(2, 10, 16, 32, false, 16));
        // 旧模式 16 端口：跨度上限 8
        assert!(!tx_span_reached(8, 1, 16, 16, true, 8));
        assert!(tx_span_reached(9, 1, 16, 16, true, 8));
        assert!(!tx_span_reached(1, 10, 16, 16, true, 8));
        assert!(tx_span_reached(3, 10, 16, 16, true, 8));
        // 收窄到 8 后上限变为 4
        assert!(tx_span_reached(5, 1, 8, 16, true, 8));

        assert!(!rx_span_reached(20, 4, 32, 16));
        assert!(rx_span_reached(3, 4, 32, 16));
        assert!(!rx_span_reached(1, 10, 16, 8));
        assert!(rx_span_reached(3, 10, 16, 8));
    }
}
