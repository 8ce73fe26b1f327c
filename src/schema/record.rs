//! On-disk record formats
//!
//! Every sample becomes one self-describing line carrying its timestamp, value
//! and the full label set of its series. Two line formats are supported:
//!
//! - `json`: `{"timestamp":1000,"value":1.5,"labels":{"job":"api"}}`
//! - `tsv`: `1000<TAB>1.5<TAB>job:api`, with `\`, TAB, LF, CR and `:` escaped
//!   inside label names and values
//!
//! Labels are always emitted in name order. Non-finite values are written as
//! `"NaN"`, `"+Inf"` and `"-Inf"` in JSON so staleness markers survive.

use crate::schema::{LabelSet, Sample};
use crate::{Error, Result};

use serde::{Deserialize, Serialize};
use std::io::Write;

/// A decoded line: one sample plus its owning label set
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OutputRecord {
    pub timestamp: i64,
    #[serde(deserialize_with = "sample_value::deserialize")]
    pub value: f64,
    #[serde(default)]
    pub labels: LabelSet,
}

impl OutputRecord {
    pub fn sample(&self) -> Sample {
        Sample::new(self.timestamp, self.value)
    }
}

#[derive(Serialize)]
struct RecordRef<'a> {
    timestamp: i64,
    #[serde(serialize_with = "sample_value::serialize")]
    value: f64,
    labels: &'a LabelSet,
}

/// Line format used for the sink file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecordFormat {
    #[default]
    Json,
    Tsv,
}

impl RecordFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordFormat::Json => "json",
            RecordFormat::Tsv => "tsv",
        }
    }

    /// Append one newline-terminated record to `out`.
    ///
    /// On error `out` is left exactly as it was.
    pub fn encode(&self, sample: &Sample, labels: &LabelSet, out: &mut Vec<u8>) -> Result<()> {
        let start = out.len();
        let result = match self {
            RecordFormat::Json => encode_json(sample, labels, out),
            RecordFormat::Tsv => encode_tsv(sample, labels, out),
        };
        match result {
            Ok(()) => {
                out.push(b'\n');
                Ok(())
            }
            Err(e) => {
                out.truncate(start);
                Err(e)
            }
        }
    }

    /// Parse one line produced by [`RecordFormat::encode`]. A trailing newline
    /// is accepted.
    pub fn decode(&self, line: &str) -> Result<OutputRecord> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        match self {
            RecordFormat::Json => Ok(serde_json::from_str(line)?),
            RecordFormat::Tsv => decode_tsv(line),
        }
    }

    /// Parse every non-empty line of `contents`.
    pub fn decode_all(&self, contents: &str) -> Result<Vec<OutputRecord>> {
        contents
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| self.decode(line))
            .collect()
    }
}

impl std::str::FromStr for RecordFormat {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" | "jsonl" => Ok(Self::Json),
            "tsv" | "tab" => Ok(Self::Tsv),
            other => Err(Error::Config(format!(
                "unknown record format '{}'; expected one of json, tsv",
                other
            ))),
        }
    }
}

impl std::fmt::Display for RecordFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn encode_json(sample: &Sample, labels: &LabelSet, out: &mut Vec<u8>) -> Result<()> {
    let record = RecordRef {
        timestamp: sample.timestamp,
        value: sample.value,
        labels,
    };
    serde_json::to_writer(&mut *out, &record)?;
    Ok(())
}

fn encode_tsv(sample: &Sample, labels: &LabelSet, out: &mut Vec<u8>) -> Result<()> {
    // Debug formatting is the shortest representation that parses back exactly.
    write!(out, "{}\t{:?}", sample.timestamp, sample.value)?;
    for (name, value) in labels {
        out.push(b'\t');
        escape_into(name, out);
        out.push(b':');
        escape_into(value, out);
    }
    Ok(())
}

fn escape_into(raw: &str, out: &mut Vec<u8>) {
    for byte in raw.bytes() {
        match byte {
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\t' => out.extend_from_slice(b"\\t"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b':' => out.extend_from_slice(b"\\:"),
            other => out.push(other),
        }
    }
}

fn decode_tsv(line: &str) -> Result<OutputRecord> {
    let mut fields = line.split('\t');

    let timestamp = fields
        .next()
        .filter(|f| !f.is_empty())
        .ok_or_else(|| Error::Serialization("missing timestamp field".to_string()))?;
    let timestamp = timestamp
        .parse::<i64>()
        .map_err(|e| Error::Serialization(format!("invalid timestamp '{}': {}", timestamp, e)))?;

    let value = fields
        .next()
        .ok_or_else(|| Error::Serialization("missing value field".to_string()))?;
    let value = value
        .parse::<f64>()
        .map_err(|e| Error::Serialization(format!("invalid value '{}': {}", value, e)))?;

    let mut labels = LabelSet::new();
    for field in fields {
        let (name, value) = split_label(field)?;
        labels.insert(name, value);
    }

    Ok(OutputRecord {
        timestamp,
        value,
        labels,
    })
}

/// Split an escaped `name:value` field at the first unescaped colon and
/// unescape both halves.
fn split_label(field: &str) -> Result<(String, String)> {
    let mut name = String::new();
    let mut value = String::new();
    let mut in_value = false;
    let mut chars = field.chars();

    while let Some(c) = chars.next() {
        let target = if in_value { &mut value } else { &mut name };
        match c {
            '\\' => {
                let unescaped = match chars.next() {
                    Some('\\') => '\\',
                    Some('t') => '\t',
                    Some('n') => '\n',
                    Some('r') => '\r',
                    Some(':') => ':',
                    Some(other) => {
                        return Err(Error::Serialization(format!(
                            "invalid escape '\\{}' in label field '{}'",
                            other, field
                        )))
                    }
                    None => {
                        return Err(Error::Serialization(format!(
                            "dangling escape in label field '{}'",
                            field
                        )))
                    }
                };
                target.push(unescaped);
            }
            ':' if !in_value => in_value = true,
            other => target.push(other),
        }
    }

    if !in_value {
        return Err(Error::Serialization(format!(
            "label field '{}' has no name/value separator",
            field
        )));
    }
    Ok((name, value))
}

mod sample_value {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if value.is_infinite() {
            serializer.serialize_str(if *value > 0.0 { "+Inf" } else { "-Inf" })
        } else {
            serializer.serialize_f64(*value)
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(n),
            Raw::Text(s) => match s.as_str() {
                "NaN" => Ok(f64::NAN),
                "+Inf" | "Inf" => Ok(f64::INFINITY),
                "-Inf" => Ok(f64::NEG_INFINITY),
                other => other.parse::<f64>().map_err(D::Error::custom),
            },
        }
    }
}
