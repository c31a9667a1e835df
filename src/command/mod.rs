//! Inline directive parsing.
//!
//! Message bodies may carry directives of the shape `/name[arg,arg,...]`
//! that configure retrieval for that message. Directives are control
//! syntax, not content: they are stripped before any text reaches the
//! model or the store.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

static DIRECTIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/(\w+)\[([^\]]*)\]").expect("directive pattern"));

static REASONING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("reasoning pattern"));

/// Per-kind counts of most-recent memories to retrieve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeFilters {
    pub daily: u32,
    pub weekly: u32,
    pub monthly: u32,
    pub quarterly: u32,
}

impl Default for TimeFilters {
    fn default() -> Self {
        Self {
            daily: 2,
            weekly: 0,
            monthly: 0,
            quarterly: 0,
        }
    }
}

/// Configuration produced by the `/remember[...]` directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RememberConfig {
    pub enable: bool,
    pub time_filters: TimeFilters,
    pub today_emails: bool,
}

impl Default for RememberConfig {
    fn default() -> Self {
        Self {
            enable: true,
            time_filters: TimeFilters::default(),
            today_emails: true,
        }
    }
}

/// Configuration produced by the `/embeds[...]` directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedsConfig {
    pub enable: bool,
    pub topk: usize,
}

impl Default for EmbedsConfig {
    fn default() -> Self {
        Self {
            enable: true,
            topk: 3,
        }
    }
}

/// Full retrieval configuration for one interaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextConfig {
    pub remember: RememberConfig,
    pub embeds: EmbedsConfig,
}

/// Parse all directives in a message body into a retrieval configuration.
///
/// Unrecognized directive names are logged and skipped. Malformed arguments
/// fall back to the default for that field. This never fails: the worst
/// outcome of a garbled directive is default behavior.
pub fn parse(body: &str) -> ContextConfig {
    debug!("parsing message body for directives");
    let mut config = ContextConfig::default();

    for captures in DIRECTIVE_RE.captures_iter(body) {
        let name = &captures[1];
        let args: Vec<&str> = captures[2].split(',').map(str::trim).collect();

        match name {
            "remember" => {
                debug!(args = ?args, "found /remember directive");
                config.remember = parse_remember(&args);
            }
            "embeds" => {
                debug!(args = ?args, "found /embeds directive");
                config.embeds = parse_embeds(&args);
            }
            other => {
                warn!(directive = %other, "directive not recognized, ignoring");
            }
        }
    }

    config
}

/// `/remember[TE,2D,1W,1M,1Q]`: `<N><D|W|M|Q>` sets a per-kind count,
/// `TE`/`FE` toggles same-day messages, an empty argument list disables
/// memory retrieval entirely.
fn parse_remember(args: &[&str]) -> RememberConfig {
    let mut config = RememberConfig::default();

    for arg in args {
        let Some(last) = arg.chars().last() else {
            // `/remember[]` turns the whole retrieval step off.
            config.enable = false;
            continue;
        };
        let head = &arg[..arg.len() - last.len_utf8()];

        match last {
            'E' => config.today_emails = head == "T",
            'D' | 'W' | 'M' | 'Q' => match head.parse::<u32>() {
                Ok(count) => match last {
                    'D' => config.time_filters.daily = count,
                    'W' => config.time_filters.weekly = count,
                    'M' => config.time_filters.monthly = count,
                    _ => config.time_filters.quarterly = count,
                },
                Err(_) => {
                    warn!(argument = %arg, "invalid /remember count, keeping default");
                }
            },
            _ => {
                warn!(argument = %arg, "invalid /remember argument, ignoring");
            }
        }
    }

    config
}

/// `/embeds[T|F,N]`: toggle similarity retrieval and set top-k.
fn parse_embeds(args: &[&str]) -> EmbedsConfig {
    let mut config = EmbedsConfig::default();

    match args.first() {
        Some(&"T") => config.enable = true,
        Some(&"F") => config.enable = false,
        other => {
            warn!(argument = ?other, "invalid /embeds toggle, keeping default");
        }
    }

    if let Some(raw) = args.get(1) {
        match raw.parse::<usize>() {
            Ok(topk) => config.topk = topk,
            Err(_) => {
                warn!(argument = %raw, "invalid /embeds top-k, keeping default");
            }
        }
    }

    config
}

/// Remove every directive substring from a body. The result is what the
/// model (and the store) are allowed to see.
pub fn strip_directives(body: &str) -> String {
    DIRECTIVE_RE.replace_all(body, "").trim().to_string()
}

/// Remove `<think>...</think>` scratchpad blocks. Applied to model output
/// before persistence and to any stored text before it is reused as
/// context, so internal deliberation never leaks into either.
pub fn strip_reasoning(body: &str) -> String {
    REASONING_RE.replace_all(body, "").trim().to_string()
}
