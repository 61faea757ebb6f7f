use serde_json::{Map, Value};

use logscope_types::{PARSE_ERROR_FIELD, Record};

/// Separator between the text fields and the trailing data payload
const DATA_SEPARATOR: &str = ";;;";

/// Number of `;`-separated fields in the text format
const TEXT_FIELD_COUNT: usize = 5;

/// Log parser for turning raw lines into records
pub struct LogParser;

impl LogParser {
    /// Parse a raw log line. Never fails: lines that cannot be understood
    /// come back as a record carrying the parse error and the raw text.
    pub fn parse(raw: &str) -> Record {
        if let Some(fields) = Self::try_parse_json(raw) {
            return Record::from(fields);
        }
        Self::parse_text(raw)
    }

    /// Strict JSON object decoding
    fn try_parse_json(raw: &str) -> Option<Map<String, Value>> {
        let trimmed = raw.trim();
        if !trimmed.starts_with('{') {
            return None;
        }
        serde_json::from_str::<Map<String, Value>>(trimmed).ok()
    }

    /// Parse `timestamp ; level ; file ; line ; message ;;; data`
    fn parse_text(raw: &str) -> Record {
        let (main, data) = match raw.split_once(DATA_SEPARATOR) {
            Some((main, data)) => (main, Some(data.trim())),
            None => (raw, None),
        };

        let fields: Vec<&str> = main.split(';').collect();
        if fields.len() < TEXT_FIELD_COUNT {
            return Record::unparsed("Invalid text log format: not enough fields", raw);
        }

        let mut notes = Vec::new();
        let mut record = Record::new();
        record.insert("timestamp", Value::String(fields[0].trim().to_string()));
        record.insert("level", Value::String(fields[1].trim().to_string()));
        record.insert("file", Value::String(fields[2].trim().to_string()));

        let line = match fields[3].trim().parse::<i64>() {
            Ok(n) => n,
            Err(e) => {
                notes.push(format!("Invalid line number: {}", e));
                0
            }
        };
        record.insert("line", Value::from(line));

        // Extra separators belong to the message
        let message = fields[TEXT_FIELD_COUNT - 1..].join(";");
        record.insert("message", Value::String(message.trim().to_string()));

        if let Some(data) = data.filter(|d| !d.is_empty()) {
            match serde_json::from_str::<Value>(data) {
                Ok(value) => record.insert("data", value),
                Err(e) => {
                    notes.push(format!("Invalid JSON in data section: {}", e));
                    record.insert("data", Value::String(data.to_string()));
                }
            }
        }

        if !notes.is_empty() {
            record.insert(PARSE_ERROR_FIELD, Value::String(notes.join("; ")));
        }

        record
    }
}
