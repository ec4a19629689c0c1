//! 有界重试与有界轮询
//!
//! 总线上的所有等待都用尝试次数表达，不使用挂钟超时。

/// 单次尝试的失败类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt<E> {
    /// 可重试（单次总线失败）
    Transient(E),
    /// 不可重试，立即结束
    Fatal(E),
}

/// 重试结果中的失败类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryError<E> {
    /// 所有尝试都以 transient 失败告终，携带最后一次错误
    Exhausted { attempts: u32, last: E },
    Fatal(E),
}

/// 最多尝试 `attempts` 次（至少 1 次）。
///
/// 每次 transient 失败后调用 `between(尝试序号, &错误)`，最后一次失败之后也会调用，
/// 用于向芯片发 abort-transfer。
pub fn with_retry<T, E>(
    attempts: u32,
    mut op: impl FnMut(u32) -> Result<T, Attempt<E>>,
    mut between: impl FnMut(u32, &E),
) -> Result<T, RetryError<E>> {
    let attempts = attempts.max(1);
    let mut tried = 0;
    loop {
        match op(tried) {
            Ok(v) => return Ok(v),
            Err(Attempt::Fatal(e)) => return Err(RetryError::Fatal(e)),
            Err(Attempt::Transient(e)) => {
                between(tried, &e);
                tried += 1;
                if tried >= attempts {
                    return Err(RetryError::Exhausted {
                        attempts: tried,
                        last: e,
                    });
                }
            }
        }
    }
}

/// 有界轮询：`probe` 返回 `Ok(Some(v))` 即结束，`Ok(None)` 时调用 `wait` 后继续，
/// `Err` 立即返回。`tries` 次都没有结果时返回 `Ok(None)`。
pub fn poll<T, E>(
    tries: u32,
    mut probe: impl FnMut() -> Result<Option<T>, E>,
    mut wait: impl FnMut(),
) -> Result<Option<T>, E> {
    for i in 0..tries {
        if let Some(v) = probe()? {
            return Ok(Some(v));
        }
        if i + 1 < tries {
            wait();
        }
    }
    Ok(None)
}
