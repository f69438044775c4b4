use chrono::NaiveDateTime;
use serde_json::{Map, Value};

use crate::error::{RelayError, Result};

pub const ITEM_ID_KEY: &str = "itemid";
pub const ALARM_TIME_KEY: &str = "alarmtime";
pub const EVENT_ID_KEY: &str = "eventid";

/// Zabbix macro `{EVENT.DATE} {EVENT.TIME}` renders as e.g. `2018.12.15 14:59:49`.
pub const ALARM_TIME_FORMAT: &str = "%Y.%m.%d %H:%M:%S";
/// Compact timestamp used in cache keys, chart windows and upload filenames.
pub const COMPACT_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

/// A decoded alert. `fields` holds every display attribute in the order the
/// caller wrote them; the three correlation keys have already been taken out.
#[derive(Debug, Clone)]
pub struct Alert {
    pub item_id: String,
    pub event_id: String,
    pub alarm_time: NaiveDateTime,
    pub fields: Map<String, Value>,
}

impl Alert {
    pub fn parse(payload: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(payload)
            .map_err(|e| RelayError::Input(format!("payload is not valid JSON: {}", e)))?;
        let mut fields = match value {
            Value::Object(map) => map,
            other => {
                return Err(RelayError::Input(format!(
                    "payload must be a JSON object, got {}",
                    json_type_name(&other)
                )))
            }
        };

        let item_id = take_reserved(&mut fields, ITEM_ID_KEY)?;
        let raw_time = take_reserved(&mut fields, ALARM_TIME_KEY)?;
        let event_id = take_reserved(&mut fields, EVENT_ID_KEY)?;
        // The cache key doubles as the chart's file name.
        if event_id.chars().any(|c| matches!(c, '/' | '\\' | '\0')) {
            return Err(RelayError::Input(format!(
                "`{}` value {:?} contains a path separator",
                EVENT_ID_KEY, event_id
            )));
        }

        let alarm_time = NaiveDateTime::parse_from_str(&raw_time, ALARM_TIME_FORMAT).map_err(|e| {
            RelayError::Input(format!(
                "`{}` value {:?} does not match YYYY.MM.DD HH:MM:SS: {}",
                ALARM_TIME_KEY, raw_time, e
            ))
        })?;

        Ok(Self {
            item_id,
            event_id,
            alarm_time,
            fields,
        })
    }

    /// One cache slot per distinct (event, occurrence time) pair.
    pub fn cache_key(&self) -> String {
        cache_key(&self.event_id, &self.alarm_time)
    }
}

pub fn cache_key(event_id: &str, alarm_time: &NaiveDateTime) -> String {
    format!("{}{}", event_id, alarm_time.format(COMPACT_TIME_FORMAT))
}

/// Remove a reserved key, keeping the order of the remaining fields intact.
fn take_reserved(fields: &mut Map<String, Value>, key: &str) -> Result<String> {
    match fields.shift_remove(key) {
        Some(Value::String(s)) => Ok(s),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(RelayError::Input(format!(
            "`{}` must be a string, got {}",
            key,
            json_type_name(&other)
        ))),
        None => Err(RelayError::Input(format!("missing required field `{}`", key))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
