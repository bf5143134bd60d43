// People-count response parsing
//
// Devices answer `getSummary` with line-oriented `key=value` text:
//
//   summary.RuleName=NumberStat
//   summary.EnteredSubtotal.Today=42
//   summary.ExitedSubtotal.Today=38
//   summary.InsideSubtotal.Total=4
//
// Some firmware (and HTTP bridges in front of them) return JSON instead;
// the same field names then address a dotted path into the object.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::error::Error;

/// Default field holding the number of people currently inside the area.
pub const INSIDE_TOTAL_FIELD: &str = "summary.InsideSubtotal.Total";

const ENTERED_TODAY: &str = "summary.EnteredSubtotal.Today";
const ENTERED_TOTAL: &str = "summary.EnteredSubtotal.Total";
const EXITED_TODAY: &str = "summary.ExitedSubtotal.Today";
const EXITED_TOTAL: &str = "summary.ExitedSubtotal.Total";

/// Which value of the summary is the channel's people count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CountField {
    /// Read one field verbatim (key=value key or dotted JSON path).
    Field(String),
    /// `entered - exited`, preferring the `.Today` subtotals.
    NetFlow,
}

impl Default for CountField {
    fn default() -> Self {
        Self::Field(INSIDE_TOTAL_FIELD.to_owned())
    }
}

impl FromStr for CountField {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("net_flow") {
            Ok(Self::NetFlow)
        } else {
            Ok(Self::Field(s.to_owned()))
        }
    }
}

impl fmt::Display for CountField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(name) => f.write_str(name),
            Self::NetFlow => f.write_str("net_flow"),
        }
    }
}

/// A decoded summary body.
#[derive(Debug, Clone)]
pub enum Summary {
    KeyValue(BTreeMap<String, String>),
    Json(Value),
}

impl Summary {
    /// Decode a raw body, sniffing JSON by its first non-blank character.
    pub fn decode(body: &str) -> Result<Self, Error> {
        if body.trim_start().starts_with('{') {
            serde_json::from_str(body)
                .map(Self::Json)
                .map_err(|e| parse_error(format!("invalid JSON body: {e}"), body))
        } else {
            Ok(Self::KeyValue(parse_key_values(body)))
        }
    }

    /// Raw textual value of a field, if present.
    pub fn get(&self, field: &str) -> Option<RawValue<'_>> {
        match self {
            Self::KeyValue(map) => map.get(field).map(|v| RawValue::Text(v.as_str())),
            Self::Json(root) => field
                .split('.')
                .try_fold(root, |node, part| node.get(part))
                .map(RawValue::Json),
        }
    }

    /// Extract a validated, non-negative count.
    pub fn count(&self, field: &CountField) -> Result<u32, String> {
        match field {
            CountField::Field(name) => {
                let raw = self
                    .get(name)
                    .ok_or_else(|| format!("field '{name}' missing"))?;
                let value = raw.as_integer(name)?;
                to_count(value, name)
            }
            CountField::NetFlow => {
                let entered = self.first_integer(&[ENTERED_TODAY, ENTERED_TOTAL])?;
                let exited = self.first_integer(&[EXITED_TODAY, EXITED_TOTAL])?;
                let net = entered
                    .checked_sub(exited)
                    .ok_or_else(|| format!("net_flow out of range: {entered} - {exited}"))?;
                to_count(net, "net_flow")
            }
        }
    }

    fn first_integer(&self, candidates: &[&str]) -> Result<i64, String> {
        let (name, raw) = candidates
            .iter()
            .find_map(|name| self.get(name).map(|raw| (*name, raw)))
            .ok_or_else(|| format!("none of {candidates:?} present"))?;
        raw.as_integer(name)
    }
}

/// A field value before numeric validation.
#[derive(Debug, Clone, Copy)]
pub enum RawValue<'a> {
    Text(&'a str),
    Json(&'a Value),
}

impl RawValue<'_> {
    fn as_integer(self, name: &str) -> Result<i64, String> {
        match self {
            Self::Text(text) => text
                .trim()
                .parse::<i64>()
                .map_err(|_| format!("field '{name}' is not an integer: {text:?}")),
            Self::Json(Value::Number(n)) => n
                .as_i64()
                .ok_or_else(|| format!("field '{name}' is not an integer: {n}")),
            Self::Json(Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| format!("field '{name}' is not an integer: {s:?}")),
            Self::Json(other) => Err(format!("field '{name}' is not a number: {other}")),
        }
    }
}

fn to_count(value: i64, name: &str) -> Result<u32, String> {
    u32::try_from(value).map_err(|_| format!("field '{name}' out of range: {value}"))
}

/// Parse `key=value` lines. Blank lines and lines without `=` are ignored.
pub fn parse_key_values(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter_map(|line| {
            let (key, value) = line.trim().split_once('=')?;
            Some((key.trim().to_owned(), value.trim().to_owned()))
        })
        .collect()
}

/// Decode a body and pull the configured count out of it.
pub fn parse_count(body: &str, field: &CountField) -> Result<u32, Error> {
    let summary = Summary::decode(body)?;
    summary.count(field).map_err(|message| parse_error(message, body))
}

fn parse_error(message: String, body: &str) -> Error {
    Error::Parse {
        message,
        body: body.chars().take(512).collect(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const DAHUA_BODY: &str = "summary.Channel=0\r\n\
        summary.RuleName=NumberStat\r\n\
        summary.EnteredSubtotal.Today=42\r\n\
        summary.EnteredSubtotal.Total=1042\r\n\
        summary.ExitedSubtotal.Today=38\r\n\
        summary.ExitedSubtotal.Total=1037\r\n\
        summary.InsideSubtotal.Total=4\r\n";

    #[test]
    fn reads_inside_total_by_default() {
        assert_eq!(parse_count(DAHUA_BODY, &CountField::default()).unwrap(), 4);
    }

    #[test]
    fn net_flow_prefers_today_subtotals() {
        assert_eq!(parse_count(DAHUA_BODY, &CountField::NetFlow).unwrap(), 4);

        let totals_only = "summary.EnteredSubtotal.Total=10\nsummary.ExitedSubtotal.Total=7\n";
        assert_eq!(parse_count(totals_only, &CountField::NetFlow).unwrap(), 3);
    }

    #[test]
    fn negative_net_flow_is_a_parse_error() {
        let body = "summary.EnteredSubtotal.Today=1\nsummary.ExitedSubtotal.Today=5\n";
        let err = parse_count(body, &CountField::NetFlow).unwrap_err();
        assert!(matches!(err, Error::Parse { ref message, .. } if message.contains("out of range")));
    }

    #[test]
    fn net_flow_overflow_is_a_parse_error() {
        let body = "summary.EnteredSubtotal.Today=-9223372036854775808\n\
                    summary.ExitedSubtotal.Today=1\n";
        let err = parse_count(body, &CountField::NetFlow).unwrap_err();
        assert!(matches!(err, Error::Parse { ref message, .. } if message.contains("out of range")));
    }

    #[test]
    fn missing_or_garbage_values_are_parse_errors_not_zero() {
        let field = CountField::default();
        assert!(matches!(parse_count("", &field), Err(Error::Parse { .. })));
        assert!(matches!(
            parse_count("summary.InsideSubtotal.Total=abc", &field),
            Err(Error::Parse { .. })
        ));
        assert!(matches!(
            parse_count("summary.InsideSubtotal.Total=-2", &field),
            Err(Error::Parse { .. })
        ));
        assert!(matches!(
            parse_count("summary.InsideSubtotal.Total=2.5", &field),
            Err(Error::Parse { .. })
        ));
    }

    #[test]
    fn json_bodies_use_dotted_paths() {
        let body = r#"{"summary":{"InsideSubtotal":{"Total":7}}}"#;
        assert_eq!(parse_count(body, &CountField::default()).unwrap(), 7);

        let flat: CountField = "count".parse().unwrap();
        assert_eq!(parse_count(r#"{"count":"12"}"#, &flat).unwrap(), 12);
        assert!(parse_count(r#"{"count":1.5}"#, &flat).is_err());
        assert!(parse_count(r#"{"count":null}"#, &flat).is_err());
        assert!(parse_count(r#"{"count": -1}"#, &flat).is_err());
        assert!(parse_count("{not json", &flat).is_err());
    }

    #[test]
    fn count_field_round_trips_through_strings() {
        assert_eq!("net_flow".parse::<CountField>().unwrap(), CountField::NetFlow);
        assert_eq!(CountField::NetFlow.to_string(), "net_flow");
        assert_eq!(CountField::default().to_string(), INSIDE_TOTAL_FIELD);
    }
}
