//! Level-sensitive record formatting.
//!
//! This module provides:
//! - [`LevelFormatter`] — Picks a template by the record's level, falling back to `default`
//! - [`Template`] — A parsed `%(field)[-][width](s|d|f)` template
//!
//! Templates are parsed once when the formatter is built; an unknown field
//! or malformed placeholder is a configuration error, never a runtime one.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, Local, Offset, Utc};

use crate::error::{FunnelError, Result};
use crate::types::{LogLevel, LogRecord};

/// Built-in template used for DEBUG records.
pub const DEFAULT_DEBUG_FORMAT: &str =
    "%(asctime)-15s: %(process)-7s: %(levelname)-7s: %(message)s: %(module)s.%(funcName)s(%(lineno)d)";

/// Built-in template used for every other level.
pub const DEFAULT_FORMAT: &str = "%(asctime)-15s: %(process)-7s: %(levelname)-7s: %(message)s";

/// Key selecting the fallback template in a level format map.
pub const DEFAULT_KEY: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Asctime,
    Created,
    Msecs,
    LevelName,
    LevelNo,
    Name,
    Message,
    Process,
    ProcessName,
    Host,
    Ip,
    Module,
    FuncName,
    LineNo,
}

impl Field {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "asctime" => Self::Asctime,
            "created" => Self::Created,
            "msecs" => Self::Msecs,
            "levelname" => Self::LevelName,
            "levelno" => Self::LevelNo,
            "name" => Self::Name,
            "message" => Self::Message,
            "process" => Self::Process,
            "processName" => Self::ProcessName,
            "host" => Self::Host,
            "ip" => Self::Ip,
            "module" => Self::Module,
            "funcName" => Self::FuncName,
            "lineno" => Self::LineNo,
            _ => return None,
        })
    }

    const fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::Created | Self::Msecs | Self::LevelNo | Self::Process | Self::LineNo
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conversion {
    Str,
    Int,
    Float,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder {
        field: Field,
        left_align: bool,
        width: usize,
        conversion: Conversion,
    },
}

/// A parsed format template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parses a template.
    ///
    /// # Errors
    ///
    /// Returns [`FunnelError::InvalidFormat`] for unknown fields, unterminated
    /// placeholders and unsupported conversions.
    pub fn parse(source: &str) -> Result<Self> {
        let invalid = |reason: String| FunnelError::InvalidFormat {
            template: source.to_string(),
            reason,
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '%' {
                literal.push(c);
                continue;
            }
            match chars.next() {
                Some('%') => literal.push('%'),
                Some('(') => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some(')') => break,
                            Some(ch) => name.push(ch),
                            None => return Err(invalid("unterminated placeholder".to_string())),
                        }
                    }
                    let field = Field::parse(&name)
                        .ok_or_else(|| invalid(format!("unknown field '{name}'")))?;

                    let left_align = chars.next_if_eq(&'-').is_some();
                    let mut digits = String::new();
                    while let Some(d) = chars.next_if(char::is_ascii_digit) {
                        digits.push(d);
                    }
                    let width = if digits.is_empty() {
                        0
                    } else {
                        digits
                            .parse()
                            .map_err(|_| invalid(format!("width out of range in '{name}'")))?
                    };

                    let conversion = match chars.next() {
                        Some('s') => Conversion::Str,
                        Some('d') if field.is_numeric() => Conversion::Int,
                        Some('f') if field.is_numeric() => Conversion::Float,
                        Some(ch @ ('d' | 'f')) => {
                            return Err(invalid(format!("field '{name}' is not numeric for '%{ch}'")));
                        }
                        Some(ch) => return Err(invalid(format!("unsupported conversion '{ch}'"))),
                        None => return Err(invalid(format!("missing conversion after '{name}'"))),
                    };

                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder {
                        field,
                        left_align,
                        width,
                        conversion,
                    });
                }
                Some(ch) => return Err(invalid(format!("unexpected '%{ch}'"))),
                None => return Err(invalid("dangling '%' at end".to_string())),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Returns the template text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Formats records with a template chosen by level.
#[derive(Debug, Clone)]
pub struct LevelFormatter {
    templates: HashMap<LogLevel, Template>,
    default: Template,
    datefmt: Option<String>,
    utc: bool,
}

impl LevelFormatter {
    /// Creates a formatter with the built-in templates.
    ///
    /// # Errors
    ///
    /// Never fails for the built-in templates; the signature matches
    /// [`LevelFormatter::from_config`].
    pub fn new() -> Result<Self> {
        Self::from_config(&BTreeMap::new(), None)
    }

    /// Creates a formatter from a level format map and optional date format.
    ///
    /// Keys are level names or `default`; given entries replace the built-in
    /// template for that key only.
    pub fn from_config(formats: &BTreeMap<String, String>, datefmt: Option<String>) -> Result<Self> {
        let mut templates = HashMap::new();
        templates.insert(LogLevel::Debug, Template::parse(DEFAULT_DEBUG_FORMAT)?);
        let mut default = Template::parse(DEFAULT_FORMAT)?;

        for (key, source) in formats {
            let template = Template::parse(source)?;
            if key.eq_ignore_ascii_case(DEFAULT_KEY) {
                default = template;
            } else {
                let level: LogLevel = key.parse().map_err(|_| {
                    FunnelError::Config(format!("unknown level '{key}' in level_formats"))
                })?;
                templates.insert(level, template);
            }
        }

        if let Some(pattern) = datefmt.as_deref() {
            if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
                return Err(FunnelError::InvalidFormat {
                    template: pattern.to_string(),
                    reason: "invalid date format".to_string(),
                });
            }
        }

        Ok(Self {
            templates,
            default,
            datefmt,
            utc: false,
        })
    }

    /// Renders timestamps in UTC instead of local time.
    #[must_use]
    pub const fn with_utc(mut self, utc: bool) -> Self {
        self.utc = utc;
        self
    }

    /// Returns the template used for a level.
    #[must_use]
    pub fn template_for(&self, level: LogLevel) -> &Template {
        self.templates.get(&level).unwrap_or(&self.default)
    }

    /// Formats a record.
    #[must_use]
    pub fn format(&self, record: &LogRecord) -> String {
        let template = self.template_for(record.level);
        let mut out = String::with_capacity(record.message.len() + 64);

        for segment in &template.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder {
                    field,
                    left_align,
                    width,
                    conversion,
                } => {
                    let value = self.render_field(record, *field, *conversion);
                    let width = *width;
                    // Writing into a String cannot fail.
                    let _ = if *left_align {
                        write!(out, "{value:<width$}")
                    } else {
                        write!(out, "{value:>width$}")
                    };
                }
            }
        }
        out
    }

    fn render_field(&self, record: &LogRecord, field: Field, conversion: Conversion) -> String {
        let ts = record.timestamp;
        match field {
            Field::Asctime => self.asctime(ts),
            Field::Created => {
                let created = ts.timestamp() as f64 + f64::from(ts.timestamp_subsec_micros()) / 1e6;
                render_number(created, conversion)
            }
            Field::Msecs => render_number(f64::from(ts.timestamp_subsec_millis()), conversion),
            Field::LevelName => record.level.as_str().to_string(),
            Field::LevelNo => render_number(f64::from(record.level.as_number()), conversion),
            Field::Name => record.logger_name.clone(),
            Field::Message => record.message.clone(),
            Field::Process => render_number(f64::from(record.process_id), conversion),
            Field::ProcessName => record.process_name.clone(),
            Field::Host => record.host.clone(),
            Field::Ip => record.ip.clone(),
            Field::Module => record.module.clone(),
            Field::FuncName => record.function.clone(),
            Field::LineNo => render_number(f64::from(record.line), conversion),
        }
    }

    fn asctime(&self, ts: DateTime<Utc>) -> String {
        let offset: FixedOffset = if self.utc {
            Utc.fix()
        } else {
            *ts.with_timezone(&Local).offset()
        };
        let local = ts.with_timezone(&offset);

        let mut out = String::new();
        match self.datefmt.as_deref() {
            Some(pattern) => {
                let _ = write!(out, "{}", local.format(pattern));
            }
            None => {
                let _ = write!(
                    out,
                    "{}.{:03}",
                    local.format("%Y-%m-%d %H:%M:%S"),
                    ts.timestamp_subsec_millis()
                );
            }
        }
        out
    }
}

fn render_number(value: f64, conversion: Conversion) -> String {
    match conversion {
        Conversion::Int => format!("{}", value.trunc() as i64),
        Conversion::Float => format!("{value:.6}"),
        Conversion::Str => format!("{value}"),
    }
}
