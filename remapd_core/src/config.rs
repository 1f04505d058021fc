//! Configuration model and parser.
//!
//! A configuration file is line-oriented with `[section]` headers. The
//! `[ids]` section decides which devices the file covers (and whether the
//! coverage extends to pointer devices), `[options]` tunes the interpreter,
//! and every other section is a layer of `key = action` bindings. `[main]`
//! is the base layer.
//!
//! ```text
//! [ids]
//! 046d:c52b
//! m:*
//!
//! [main]
//! capslock = layer(nav)
//!
//! [nav]
//! h = left
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::keycode;

/// Name of the base layer every lookup falls back to.
pub const MAIN_LAYER: &str = "main";

/// Oneshot window used when a file sets no `oneshot_timeout`.
pub const DEFAULT_ONESHOT_TIMEOUT_MS: u64 = 500;

/// A device identity as reported by the input subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId {
    pub vendor: u16,
    pub product: u16,
}

impl DeviceId {
    pub fn new(vendor: u16, product: u16) -> Self {
        Self { vendor, product }
    }

    /// Packed `(vendor << 16) | product` form.
    #[must_use]
    pub fn code(self) -> u32 {
        (u32::from(self.vendor) << 16) | u32::from(self.product)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor, self.product)
    }
}

/// How strongly a configuration claims a device.
///
/// The derived ordering is the match ordering: a pointer-extended match
/// outranks a keyboard-only match, which outranks no match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchRank {
    /// The configuration does not cover this device.
    None,
    /// The configuration covers this device's keyboard events only.
    Keyboard,
    /// The coverage extends to pointer devices with this identity.
    Pointer,
}

impl MatchRank {
    /// True for any rank that binds a keyboard-capable device.
    #[must_use]
    pub fn binds_keys(self) -> bool {
        self >= MatchRank::Keyboard
    }

    /// True for the rank that also binds pointer-capable devices.
    #[must_use]
    pub fn binds_pointer(self) -> bool {
        self == MatchRank::Pointer
    }
}

/// One entry of the `[ids]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IdMatch {
    /// `None` is the `*` wildcard.
    id: Option<DeviceId>,
    /// Set by the `m:` prefix; extends the match to pointer devices.
    pointer: bool,
}

impl IdMatch {
    fn covers(&self, id: DeviceId) -> bool {
        self.id.map_or(true, |m| m == id)
    }
}

/// What a bound key does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Emit another key code.
    Key(u8),
    /// Hold a layer active while the key is down.
    Layer(String),
    /// Arm a layer for the next key press.
    Oneshot(String),
    /// Latch a layer on and off.
    Toggle(String),
}

pub type LayerMap = BTreeMap<u8, Action>;

/// A parsed configuration file.
#[derive(Debug, Clone)]
pub struct Config {
    name: String,
    matches: Vec<IdMatch>,
    pub(crate) layers: BTreeMap<String, LayerMap>,
    pub(crate) oneshot_timeout_ms: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{file}:{line}: {msg}")]
    Parse {
        file: String,
        line: usize,
        msg: String,
    },

    #[error("failed to read {file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },
}

impl Config {
    /// Parses a configuration from text. `name` labels diagnostics and is
    /// normally the file stem.
    pub fn parse(name: &str, text: &str) -> Result<Self, ConfigError> {
        Parser::new(name).run(text)
    }

    /// Reads and parses a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            file: path.display().to_string(),
            source,
        })?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("config");
        Self::parse(name, &text)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scores this configuration against a device identity.
    ///
    /// Returns the best rank any `[ids]` entry yields. A file without an
    /// `[ids]` section matches every keyboard (implicit `*`).
    #[must_use]
    pub fn check_match(&self, id: DeviceId) -> MatchRank {
        let mut rank = MatchRank::None;
        for m in &self.matches {
            if !m.covers(id) {
                continue;
            }
            let r = if m.pointer {
                MatchRank::Pointer
            } else {
                MatchRank::Keyboard
            };
            if r > rank {
                rank = r;
            }
        }
        rank
    }
}

/// Parses the right-hand side of a binding into an action.
///
/// Shared between the file parser and runtime `eval` bindings, so both
/// accept the same action grammar.
pub(crate) fn parse_action(s: &str) -> Result<Action, String> {
    if let Some(inner) = callsite(s, "layer") {
        return Ok(Action::Layer(inner));
    }
    if let Some(inner) = callsite(s, "oneshot") {
        return Ok(Action::Oneshot(inner));
    }
    if let Some(inner) = callsite(s, "toggle") {
        return Ok(Action::Toggle(inner));
    }
    match keycode::code_for_name(s) {
        Some(code) => Ok(Action::Key(code)),
        None => Err(format!("unknown action '{s}'")),
    }
}

/// Matches `name(arg)` for one known callable, returning the argument.
fn callsite(s: &str, name: &str) -> Option<String> {
    let rest = s.strip_prefix(name)?.trim_start();
    let inner = rest.strip_prefix('(')?.strip_suffix(')')?;
    Some(inner.trim().to_string())
}

fn valid_layer_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[derive(Clone)]
enum Section {
    Ids,
    Options,
    Layer(String),
}

struct Parser {
    file: String,
    matches: Vec<IdMatch>,
    saw_ids: bool,
    layers: BTreeMap<String, LayerMap>,
    oneshot_timeout_ms: u64,
    section: Option<Section>,
}

impl Parser {
    fn new(name: &str) -> Self {
        Self {
            file: name.to_string(),
            matches: Vec::new(),
            saw_ids: false,
            layers: BTreeMap::new(),
            oneshot_timeout_ms: DEFAULT_ONESHOT_TIMEOUT_MS,
            section: None,
        }
    }

    fn fail<T>(&self, line: usize, msg: impl Into<String>) -> Result<T, ConfigError> {
        Err(ConfigError::Parse {
            file: self.file.clone(),
            line,
            msg: msg.into(),
        })
    }

    fn run(mut self, text: &str) -> Result<Config, ConfigError> {
        for (idx, raw) in text.lines().enumerate() {
            let lineno = idx + 1;
            let line = strip_comment(raw).trim();
            if line.is_empty() {
                continue;
            }

            if let Some(header) = line.strip_prefix('[') {
                let Some(name) = header.strip_suffix(']') else {
                    return self.fail(lineno, "unterminated section header");
                };
                self.enter_section(lineno, name.trim())?;
                continue;
            }

            match self.section.clone() {
                None => return self.fail(lineno, "statement outside of a section"),
                Some(Section::Ids) => self.id_entry(lineno, line)?,
                Some(Section::Options) => self.option_entry(lineno, line)?,
                Some(Section::Layer(layer)) => self.binding_entry(lineno, &layer, line)?,
            }
        }
        self.finish()
    }

    fn enter_section(&mut self, lineno: usize, name: &str) -> Result<(), ConfigError> {
        match name {
            "ids" => {
                if self.saw_ids {
                    return self.fail(lineno, "duplicate [ids] section");
                }
                self.saw_ids = true;
                self.section = Some(Section::Ids);
            }
            "options" => {
                self.section = Some(Section::Options);
            }
            _ => {
                if !valid_layer_name(name) {
                    return self.fail(lineno, format!("invalid layer name '{name}'"));
                }
                if self.layers.contains_key(name) {
                    return self.fail(lineno, format!("duplicate layer '{name}'"));
                }
                self.layers.insert(name.to_string(), LayerMap::new());
                self.section = Some(Section::Layer(name.to_string()));
            }
        }
        Ok(())
    }

    fn id_entry(&mut self, lineno: usize, line: &str) -> Result<(), ConfigError> {
        let (pointer, spec) = match line.strip_prefix("m:") {
            Some(rest) => (true, rest.trim()),
            None => (false, line),
        };
        let id = if spec == "*" {
            None
        } else {
            let Some((vendor, product)) = spec.split_once(':') else {
                return self.fail(lineno, format!("expected vendor:product or '*', got '{spec}'"));
            };
            let vendor = match u16::from_str_radix(vendor, 16) {
                Ok(v) => v,
                Err(_) => return self.fail(lineno, format!("bad vendor id '{vendor}'")),
            };
            let product = match u16::from_str_radix(product, 16) {
                Ok(p) => p,
                Err(_) => return self.fail(lineno, format!("bad product id '{product}'")),
            };
            Some(DeviceId::new(vendor, product))
        };
        self.matches.push(IdMatch { id, pointer });
        Ok(())
    }

    fn option_entry(&mut self, lineno: usize, line: &str) -> Result<(), ConfigError> {
        let Some((key, value)) = line.split_once('=') else {
            return self.fail(lineno, "expected option = value");
        };
        let (key, value) = (key.trim(), value.trim());
        match key {
            "oneshot_timeout" => match value.parse::<u64>() {
                Ok(ms) => self.oneshot_timeout_ms = ms,
                Err(_) => return self.fail(lineno, format!("bad timeout '{value}'")),
            },
            _ => return self.fail(lineno, format!("unknown option '{key}'")),
        }
        Ok(())
    }

    fn binding_entry(&mut self, lineno: usize, layer: &str, line: &str) -> Result<(), ConfigError> {
        let Some((lhs, rhs)) = line.split_once('=') else {
            return self.fail(lineno, "expected key = action");
        };
        let (lhs, rhs) = (lhs.trim(), rhs.trim());
        let Some(code) = keycode::code_for_name(lhs) else {
            return self.fail(lineno, format!("unknown key '{lhs}'"));
        };
        let action = match parse_action(rhs) {
            Ok(a) => a,
            Err(msg) => return self.fail(lineno, msg),
        };
        if let Some(map) = self.layers.get_mut(layer) {
            map.insert(code, action);
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Config, ConfigError> {
        // A file that names no devices covers every keyboard.
        if !self.saw_ids {
            self.matches.push(IdMatch {
                id: None,
                pointer: false,
            });
        }
        self.layers.entry(MAIN_LAYER.to_string()).or_default();

        // Actions may only reference layers defined in the same file.
        for (layer, map) in &self.layers {
            for action in map.values() {
                let target = match action {
                    Action::Layer(t) | Action::Oneshot(t) | Action::Toggle(t) => t,
                    Action::Key(_) => continue,
                };
                if !self.layers.contains_key(target) {
                    return Err(ConfigError::Parse {
                        file: self.file.clone(),
                        line: 0,
                        msg: format!("layer '{layer}' references undefined layer '{target}'"),
                    });
                }
            }
        }

        Ok(Config {
            name: self.file,
            matches: self.matches,
            layers: self.layers,
            oneshot_timeout_ms: self.oneshot_timeout_ms,
        })
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
[ids]
046d:c52b
m:1234:5678

[options]
oneshot_timeout = 300

[main]
a = b
capslock = layer(nav)
space = oneshot(sym)
scrolllock = toggle(game)

[nav]
h = left

[sym]
a = minus

[game]
";

    #[test]
    fn parses_sample() {
        let config = Config::parse("sample", SAMPLE).expect("parse failed");
        assert_eq!(config.name(), "sample");
        assert_eq!(config.oneshot_timeout_ms, 300);
        assert_eq!(
            config.layers[MAIN_LAYER].get(&30),
            Some(&Action::Key(48)) // a -> b
        );
        assert_eq!(
            config.layers["nav"].get(&35),
            Some(&Action::Key(105)) // h -> left
        );
    }

    #[test]
    fn match_ranks() {
        let config = Config::parse("sample", SAMPLE).expect("parse failed");
        assert_eq!(
            config.check_match(DeviceId::new(0x046d, 0xc52b)),
            MatchRank::Keyboard
        );
        assert_eq!(
            config.check_match(DeviceId::new(0x1234, 0x5678)),
            MatchRank::Pointer
        );
        assert_eq!(
            config.check_match(DeviceId::new(0xdead, 0xbeef)),
            MatchRank::None
        );
    }

    #[test]
    fn wildcard_outranked_by_pointer_entry() {
        let text = "[ids]\n*\nm:aaaa:bbbb\n";
        let config = Config::parse("w", text).expect("parse failed");
        assert_eq!(
            config.check_match(DeviceId::new(0xaaaa, 0xbbbb)),
            MatchRank::Pointer
        );
        assert_eq!(
            config.check_match(DeviceId::new(0x1, 0x2)),
            MatchRank::Keyboard
        );
    }

    #[test]
    fn missing_ids_section_matches_all_keyboards() {
        let config = Config::parse("any", "[main]\na = b\n").expect("parse failed");
        assert_eq!(
            config.check_match(DeviceId::new(0x1111, 0x2222)),
            MatchRank::Keyboard
        );
    }

    #[test]
    fn rank_ordering() {
        assert!(MatchRank::Pointer > MatchRank::Keyboard);
        assert!(MatchRank::Keyboard > MatchRank::None);
        assert!(MatchRank::Pointer.binds_keys());
        assert!(!MatchRank::Keyboard.binds_pointer());
    }

    #[test]
    fn rejects_statement_outside_section() {
        let err = Config::parse("bad", "a = b\n").unwrap_err();
        assert!(err.to_string().contains("outside of a section"));
    }

    #[test]
    fn rejects_bad_hex_id() {
        let err = Config::parse("bad", "[ids]\nzzzz:0001\n").unwrap_err();
        assert!(err.to_string().contains("bad vendor id"));
    }

    #[test]
    fn rejects_unknown_action() {
        let err = Config::parse("bad", "[main]\na = warp(9)\n").unwrap_err();
        assert!(err.to_string().contains("unknown action"));
    }

    #[test]
    fn rejects_undefined_layer_reference() {
        let err = Config::parse("bad", "[main]\na = layer(ghost)\n").unwrap_err();
        assert!(err.to_string().contains("undefined layer 'ghost'"));
    }

    #[test]
    fn rejects_unknown_option() {
        let err = Config::parse("bad", "[options]\nwarp = 1\n").unwrap_err();
        assert!(err.to_string().contains("unknown option"));
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let text = "# header\n\n[ids]\n046d:c52b # my keyboard\n\n[main]\na = b # remap\n";
        let config = Config::parse("c", text).expect("parse failed");
        assert_eq!(
            config.check_match(DeviceId::new(0x046d, 0xc52b)),
            MatchRank::Keyboard
        );
        assert_eq!(config.layers[MAIN_LAYER].get(&30), Some(&Action::Key(48)));
    }

    #[test]
    fn device_id_packing() {
        let id = DeviceId::new(0x046d, 0xc52b);
        assert_eq!(id.code(), 0x046d_c52b);
        assert_eq!(id.to_string(), "046d:c52b");
    }
}
