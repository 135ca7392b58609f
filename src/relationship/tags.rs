//! 回复控制标签解析
//!
//! 生成的回复可能携带 `[FAREWELL]`、`[INTIMACY_CHANGE=<数值>]`、`[ME]` 三种标签；
//! 三者相互独立、与出现顺序无关，解析后全部从正文移除。

use std::sync::OnceLock;

use regex::Regex;

static FAREWELL_RE: OnceLock<Regex> = OnceLock::new();
static INTIMACY_RE: OnceLock<Regex> = OnceLock::new();
static ME_RE: OnceLock<Regex> = OnceLock::new();

fn farewell_re() -> &'static Regex {
    FAREWELL_RE.get_or_init(|| Regex::new(r"(?i)\[\s*FAREWELL\s*\]").unwrap())
}

fn intimacy_re() -> &'static Regex {
    INTIMACY_RE.get_or_init(|| Regex::new(r"(?i)\[\s*INTIMACY_CHANGE\s*=([^\]]*)\]").unwrap())
}

fn me_re() -> &'static Regex {
    ME_RE.get_or_init(|| Regex::new(r"(?i)\[\s*ME\s*\]").unwrap())
}

/// 解析结果：去标签后的正文与副作用
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedReply {
    pub text: String,
    pub farewell: bool,
    /// 多个合法 INTIMACY_CHANGE 标签时取和；格式错误的标签只移除不计入
    pub intimacy_delta: Option<f64>,
}

/// 解析并剥离控制标签，结果去除首尾空白
pub fn parse_reply(raw: &str) -> ParsedReply {
    let farewell = farewell_re().is_match(raw);

    let mut delta: Option<f64> = None;
    for cap in intimacy_re().captures_iter(raw) {
        let payload = cap.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        match payload.parse::<f64>() {
            Ok(v) if v.is_finite() => *delta.get_or_insert(0.0) += v,
            _ => tracing::debug!("Ignoring malformed intimacy tag payload {:?}", payload),
        }
    }

    let text = farewell_re().replace_all(raw, "");
    let text = intimacy_re().replace_all(&text, "");
    let text = me_re().replace_all(&text, "");

    ParsedReply {
        text: text.trim().to_string(),
        farewell,
        intimacy_delta: delta,
    }
}
