use chrono::{DateTime, Utc};

use super::error::ParsingError;
use super::types::{ActiveLock, LockEntry, QName};

/// Declared type of a property, as announced by the source that owns it.
///
/// It drives how a raw PROPPATCH value is parsed and how a value is
/// rendered in a multistatus body.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ValueType {
    Text,
    Number,
    Boolean,
    /// ISO 8601, used by `creationdate`
    Date,
    /// RFC 1123, used by `getlastmodified`
    HttpDate,
    Href,
    HrefList,
    ResourceType,
    LockDiscovery,
    SupportedLock,
    ReportSet,
    /// Raw XML fragment, kept verbatim
    Xml,
}

#[derive(Debug, PartialEq, Clone)]
pub enum PropertyValue {
    Text(String),
    Number(u64),
    Boolean(bool),
    Date(DateTime<Utc>),
    HttpDate(DateTime<Utc>),
    Href(String),
    HrefList(Vec<String>),
    ResourceType(Vec<QName>),
    LockDiscovery(Vec<ActiveLock>),
    SupportedLock(Vec<LockEntry>),
    ReportSet(Vec<QName>),
    Xml(String),
}
impl PropertyValue {
    pub fn kind(&self) -> ValueType {
        match self {
            Self::Text(_) => ValueType::Text,
            Self::Number(_) => ValueType::Number,
            Self::Boolean(_) => ValueType::Boolean,
            Self::Date(_) => ValueType::Date,
            Self::HttpDate(_) => ValueType::HttpDate,
            Self::Href(_) => ValueType::Href,
            Self::HrefList(_) => ValueType::HrefList,
            Self::ResourceType(_) => ValueType::ResourceType,
            Self::LockDiscovery(_) => ValueType::LockDiscovery,
            Self::SupportedLock(_) => ValueType::SupportedLock,
            Self::ReportSet(_) => ValueType::ReportSet,
            Self::Xml(_) => ValueType::Xml,
        }
    }

    /// Text rendering of scalar values, `None` for structured ones
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Text(v) | Self::Href(v) | Self::Xml(v) => Some(v.clone()),
            Self::Number(v) => Some(v.to_string()),
            Self::Boolean(v) => Some(v.to_string()),
            Self::Date(v) => Some(iso_date(v)),
            Self::HttpDate(v) => Some(http_date(v)),
            _ => None,
        }
    }
}

impl ValueType {
    /// Parse the raw string of a PROPPATCH `set` into a typed value
    pub fn parse(&self, raw: &str) -> Result<PropertyValue, ParsingError> {
        let trimmed = raw.trim();
        match self {
            Self::Text => Ok(PropertyValue::Text(raw.to_string())),
            Self::Xml => Ok(PropertyValue::Xml(raw.to_string())),
            Self::Number => Ok(PropertyValue::Number(trimmed.parse::<u64>()?)),
            Self::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "t" | "1" | "yes" => Ok(PropertyValue::Boolean(true)),
                "false" | "f" | "0" | "no" => Ok(PropertyValue::Boolean(false)),
                _ => Err(ParsingError::InvalidValue),
            },
            Self::Date => Ok(PropertyValue::Date(parse_iso_date(trimmed)?)),
            Self::HttpDate => Ok(PropertyValue::HttpDate(parse_http_date(trimmed)?)),
            Self::Href => Ok(PropertyValue::Href(trimmed.to_string())),
            Self::HrefList => Ok(PropertyValue::HrefList(
                trimmed.split_whitespace().map(str::to_string).collect(),
            )),
            Self::ResourceType | Self::LockDiscovery | Self::SupportedLock | Self::ReportSet => {
                Err(ParsingError::InvalidValue)
            }
        }
    }
}

pub fn http_date(dt: &DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub fn iso_date(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

pub fn parse_http_date(raw: &str) -> Result<DateTime<Utc>, ParsingError> {
    Ok(DateTime::parse_from_rfc2822(raw)?.with_timezone(&Utc))
}

pub fn parse_iso_date(raw: &str) -> Result<DateTime<Utc>, ParsingError> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parse_by_declared_type() {
        assert_eq!(
            ValueType::Number.parse(" 42 ").unwrap(),
            PropertyValue::Number(42)
        );
        assert_eq!(
            ValueType::Boolean.parse("T").unwrap(),
            PropertyValue::Boolean(true)
        );
        assert!(ValueType::Boolean.parse("maybe").is_err());
        assert!(ValueType::Number.parse("forty").is_err());
        assert!(ValueType::ResourceType.parse("<collection/>").is_err());
    }

    #[test]
    fn dates() {
        let dt = Utc.with_ymd_and_hms(1998, 1, 12, 9, 25, 56).unwrap();
        assert_eq!(http_date(&dt), "Mon, 12 Jan 1998 09:25:56 GMT");
        assert_eq!(iso_date(&dt), "1998-01-12T09:25:56Z");
        assert_eq!(parse_http_date("Mon, 12 Jan 1998 09:25:56 GMT").unwrap(), dt);
        assert_eq!(parse_iso_date("1998-01-12T10:25:56+01:00").unwrap(), dt);
    }
}
