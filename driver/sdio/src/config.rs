//! 传输层配置
//!
//! [`SdioConfig`] 给出各重试上限、轮询次数与聚合开关；平台可通过 [`parse_config`]
//! 用 `KEY=value` 文本（每行一项，`#` 开头为注释）覆盖默认值。

use crate::error::errno::EINVAL;
use crate::types::{
    MAX_FIRMWARE_POLL_TRIES, MAX_MULTI_INTERFACE_POLL_TRIES, MAX_POLL_TRIES,
    MAX_WRITE_IOMEM_RETRY, MWIFIEX_SDIO_BLOCK_SIZE,
};

const LOG_TARGET: &str = "mwifiex::sdio";

#[derive(Debug, Clone)]
pub struct SdioConfig {
    /// 总线传输块大小
    pub block_size: usize,
    /// 发送多端口聚合
    pub mpa_tx: bool,
    /// 接收多端口聚合
    pub mpa_rx: bool,
    /// 数据包进接收队列，由接收工作者取走；否则在中断路径直接上送
    pub rx_work: bool,
    /// 接受固件侧聚合的数据（AggrData）
    pub sdio_rx_aggr: bool,
    pub rx_aggr_block_size: usize,
    /// 固件已在运行时仍做带内复位并重新下载
    pub force_fw_reload: bool,
    /// 写失败后的额外尝试次数
    pub max_write_retry: u32,
    /// 读失败后的额外尝试次数
    pub max_read_retry: u32,
    /// 寄存器快照读取尝试次数
    pub snapshot_retry: u32,
    /// 卡就绪 / 块长度轮询次数
    pub card_poll_tries: u32,
    /// 同一块连续 CRC 重发上限
    pub fw_crc_retry: u32,
    /// MIC 错误时整镜像重下的次数（仅部分芯片）
    pub fw_mic_restart: u32,
    pub fw_poll_tries: u32,
    pub fw_poll_tries_multi: u32,
    pub fw_poll_delay_ms: u32,
    /// 发送批次保持打开时的刷新定时器
    pub tx_flush_timeout_ms: u32,
}

impl Default for SdioConfig {
    fn default() -> Self {
        Self {
            block_size: MWIFIEX_SDIO_BLOCK_SIZE,
            mpa_tx: true,
            mpa_rx: true,
            rx_work: false,
            sdio_rx_aggr: false,
            rx_aggr_block_size: MWIFIEX_SDIO_BLOCK_SIZE,
            force_fw_reload: false,
            max_write_retry: MAX_WRITE_IOMEM_RETRY,
            max_read_retry: 2,
            snapshot_retry: 3,
            card_poll_tries: MAX_POLL_TRIES,
            fw_crc_retry: 5,
            fw_mic_restart: 2,
            fw_poll_tries: MAX_FIRMWARE_POLL_TRIES,
            fw_poll_tries_multi: MAX_MULTI_INTERFACE_POLL_TRIES,
            fw_poll_delay_ms: 10,
            tx_flush_timeout_ms: 10,
        }
    }
}

/// 在 text 中查找以 `tag` 开头的行，返回其后的值（去掉行尾 `\r`）
fn find_tag<'a>(text: &'a [u8], tag: &str) -> Option<&'a [u8]> {
    let tag = tag.as_bytes();
    text.split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .filter(|line| !line.starts_with(b"#"))
        .find_map(|line| line.strip_prefix(tag))
}

fn parse_u32(s: &[u8]) -> Option<u32> {
    let s = trim(s);
    if s.is_empty() {
        return None;
    }
    let (digits, radix) = match s.strip_prefix(b"0x").or_else(|| s.strip_prefix(b"0X")) {
        Some(hex) => (hex, 16),
        None => (s, 10),
    };
    let mut v: u32 = 0;
    for &b in digits {
        let d = (b as char).to_digit(radix)?;
        v = v.checked_mul(radix)?.checked_add(d)?;
    }
    Some(v)
}

fn parse_bool(s: &[u8]) -> Option<bool> {
    match trim(s) {
        b"1" | b"y" | b"Y" | b"on" | b"true" => Some(true),
        b"0" | b"n" | b"N" | b"off" | b"false" => Some(false),
        _ => None,
    }
}

fn trim(s: &[u8]) -> &[u8] {
    let start = s.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(s.len());
    let end = s.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |e| e + 1);
    &s[start..end]
}

/// 解析 `KEY=value` 配置文本，未出现的键保持原值。值非法时返回 `Err(-EINVAL)`。
pub fn parse_config(text: &[u8], cfg: &mut SdioConfig) -> Result<(), i32> {
    macro_rules! parse_tag {
        ($tag:expr, $field:ident, $parse:ident) => {
            if let Some(v) = find_tag(text, $tag) {
                cfg.$field = $parse(v).ok_or_else(|| {
                    log::warn!(target: LOG_TARGET, "config: bad value for {}", $tag);
                    EINVAL
                })?;
            }
        };
    }
    macro_rules! parse_usize {
        ($tag:expr, $field:ident) => {
            if let Some(v) = find_tag(text, $tag) {
                cfg.$field = parse_u32(v).map(|n| n as usize).ok_or_else(|| {
                    log::warn!(target: LOG_TARGET, "config: bad value for {}", $tag);
                    EINVAL
                })?;
            }
        };
    }

    parse_usize!("BLOCK_SIZE=", block_size);
    parse_tag!("MPA_TX=", mpa_tx, parse_bool);
    parse_tag!("MPA_RX=", mpa_rx, parse_bool);
    parse_tag!("RX_WORK=", rx_work, parse_bool);
    parse_tag!("SDIO_RX_AGGR=", sdio_rx_aggr, parse_bool);
    parse_usize!("RX_AGGR_BLOCK_SIZE=", rx_aggr_block_size);
    parse_tag!("FW_RELOAD=", force_fw_reload, parse_bool);
    parse_tag!("WRITE_RETRY=", max_write_retry, parse_u32);
    parse_tag!("READ_RETRY=", max_read_retry, parse_u32);
    parse_tag!("SNAPSHOT_RETRY=", snapshot_retry, parse_u32);
    parse_tag!("CARD_POLL_TRIES=", card_poll_tries, parse_u32);
    parse_tag!("FW_CRC_RETRY=", fw_crc_retry, parse_u32);
    parse_tag!("FW_MIC_RESTART=", fw_mic_restart, parse_u32);
    parse_tag!("FW_POLL_TRIES=", fw_poll_tries, parse_u32);
    parse_tag!("FW_POLL_TRIES_MULTI=", fw_poll_tries_multi, parse_u32);
    parse_tag!("FW_POLL_DELAY_MS=", fw_poll_delay_ms, parse_u32);
    parse_tag!("TX_FLUSH_TIMEOUT_MS=", tx_flush_timeout_ms, parse_u32);

    if cfg.block_size == 0 || cfg.rx_aggr_block_size == 0 {
        return Err(EINVAL);
    }
    log::debug!(target: LOG_TARGET, "config: {:?}", cfg);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_only_given_keys() {
        let text = b"# transport tuning\nMPA_TX=0\r\nFW_CRC_RETRY=8\nBLOCK_SIZE=0x40\nUNKNOWN=1\n";
        let mut cfg = SdioConfig::default();
        assert_eq!(parse_config(text, &mut cfg), Ok(()));
        assert!(!cfg.mpa_tx);
        assert!(cfg.mpa_rx);
        assert_eq!(cfg.fw_crc_retry, 8);
        assert_eq!(cfg.block_size, 64);
        assert_eq!(cfg.max_write_retry, MAX_WRITE_IOMEM_RETRY);
    }

    #[test]
    fn rejects_bad_values() {
        let mut cfg = SdioConfig::default();
        assert_eq!(parse_config(b"RX_WORK=maybe\n", &mut cfg), Err(EINVAL));
        assert_eq!(parse_config(b"BLOCK_SIZE=0\n", &mut cfg), Err(EINVAL));
        assert_eq!(parse_config(b"#FW_CRC_RETRY=x\n", &mut SdioConfig::default()), Ok(()));
    }
}
