//! Ingestion client adapter
//!
//! Serializes a batch as influx line protocol (one line per record) and
//! submits it to the destination's HTTP bulk-write endpoint in a single
//! call. Success and failure are reported at batch granularity; retry
//! policy belongs to the orchestrator so that retries and cursor
//! advancement stay consistently ordered.

use crate::batch::{Batch, CoercedRecord};
use crate::coerce::WireValue;
use async_trait::async_trait;
use tracing::debug;
use tsm_common::MigrateError;

/// Batch ingestion seam
///
/// The production implementation is [`IlpHttpClient`]; tests substitute
/// in-memory fakes.
#[async_trait]
pub trait IngestSink: Send + Sync {
    /// Ingest one batch atomically; `Err` means the whole batch failed
    async fn ingest(&self, batch: &Batch) -> tsm_common::Result<()>;
}

/// Serialize one record as a line-protocol line
///
/// Returns `None` when every field is `Absent` (a line without fields is
/// not valid on the wire; the destination represents the row's NULLs
/// natively anyway).
pub fn serialize_record(table: &str, record: &CoercedRecord) -> Option<String> {
    let mut line = String::with_capacity(64);
    escape_name(table, &mut line);
    line.push(' ');

    let mut wrote_field = false;
    for (name, field) in &record.fields {
        let rendered = match &field.value {
            WireValue::Integer(v) => format!("{}i", v),
            WireValue::Float(v) => format_float(*v),
            WireValue::Text(s) => {
                let mut quoted = String::with_capacity(s.len() + 2);
                quoted.push('"');
                for c in s.chars() {
                    match c {
                        '"' => quoted.push_str("\\\""),
                        '\\' => quoted.push_str("\\\\"),
                        '\n' => quoted.push_str("\\n"),
                        c => quoted.push(c),
                    }
                }
                quoted.push('"');
                quoted
            },
            WireValue::Bool(b) => if *b { "t" } else { "f" }.to_string(),
            WireValue::Absent => continue,
        };

        if wrote_field {
            line.push(',');
        }
        escape_name(name, &mut line);
        line.push('=');
        line.push_str(&rendered);
        wrote_field = true;
    }

    if !wrote_field {
        return None;
    }

    line.push(' ');
    line.push_str(&record.time_nsec.to_string());
    Some(line)
}

/// Serialize a whole batch as a newline-delimited wire body
pub fn serialize_batch(batch: &Batch) -> String {
    let mut body = String::new();
    for record in &batch.records {
        if let Some(line) = serialize_record(&batch.table, record) {
            body.push_str(&line);
            body.push('\n');
        }
    }
    body
}

/// Escape measurement/field names per line protocol (spaces, commas,
/// equals signs)
fn escape_name(name: &str, out: &mut String) {
    for c in name.chars() {
        match c {
            ' ' => out.push_str("\\ "),
            ',' => out.push_str("\\,"),
            '=' => out.push_str("\\="),
            c => out.push(c),
        }
    }
}

/// Float rendering: Rust's shortest round-trip formatting, with an
/// explicit fraction so the wire parser cannot read the value as an
/// integer
fn format_float(v: f64) -> String {
    let s = v.to_string();
    if s.contains('.') || s.contains('e') || s.contains('E') {
        s
    } else {
        format!("{}.0", s)
    }
}

/// Line-protocol-over-HTTP client for the destination database
///
/// The collaborator owns transmission, TLS, and authentication; this
/// adapter owns serialization and per-batch status.
pub struct IlpHttpClient {
    http: reqwest::Client,
    write_url: String,
    username: Option<String>,
    password: Option<String>,
}

impl IlpHttpClient {
    pub fn new(host: &str, port: u16, username: Option<String>, password: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            write_url: format!("http://{}:{}/write", host, port),
            username,
            password,
        }
    }

    /// Point the client at a full endpoint URL (tests)
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            write_url: format!("{}/write", base_url.trim_end_matches('/')),
            username: None,
            password: None,
        }
    }
}

#[async_trait]
impl IngestSink for IlpHttpClient {
    async fn ingest(&self, batch: &Batch) -> tsm_common::Result<()> {
        let body = serialize_batch(batch);
        if body.is_empty() {
            debug!(table = %batch.table, "Batch serialized to no lines, nothing to send");
            return Ok(());
        }

        let mut request = self.http.post(&self.write_url).body(body);
        if let Some(user) = &self.username {
            request = request.basic_auth(user, self.password.as_deref());
        }

        let response = request.send().await.map_err(|e| MigrateError::Ingestion {
            table: batch.table.clone(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(MigrateError::Ingestion {
                table: batch.table.clone(),
                reason: format!("HTTP {}: {}", status, detail),
            });
        }

        debug!(table = %batch.table, records = batch.len(), "Batch ingested");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coerce::{CoercedField, ColumnType};

    fn field(name: &str, value: WireValue) -> (String, CoercedField) {
        let column = match value {
            WireValue::Integer(_) => ColumnType::Int,
            WireValue::Float(_) => ColumnType::Double,
            WireValue::Bool(_) => ColumnType::Boolean,
            _ => ColumnType::Varchar,
        };
        (name.to_string(), CoercedField { column, value })
    }

    #[test]
    fn test_serialize_record_mixed_fields() {
        let record = CoercedRecord {
            time_nsec: 1_700_000_000_000_000_000,
            fields: vec![
                field("COUNT", WireValue::Integer(42)),
                field("TEMP", WireValue::Float(21.5)),
                field("STATE", WireValue::Text("RUNNING".to_string())),
                field("OK", WireValue::Bool(true)),
            ],
        };
        let line = serialize_record("TLM__INST__HEALTH", &record).unwrap();
        assert_eq!(
            line,
            "TLM__INST__HEALTH COUNT=42i,TEMP=21.5,STATE=\"RUNNING\",OK=t 1700000000000000000"
        );
    }

    #[test]
    fn test_floats_always_carry_a_fraction() {
        let record = CoercedRecord {
            time_nsec: 1,
            fields: vec![field("V", WireValue::Float(3.0))],
        };
        let line = serialize_record("T", &record).unwrap();
        assert_eq!(line, "T V=3.0 1");
    }

    #[test]
    fn test_string_escaping() {
        let record = CoercedRecord {
            time_nsec: 1,
            fields: vec![field("MSG", WireValue::Text("say \"hi\"\\now".to_string()))],
        };
        let line = serialize_record("T", &record).unwrap();
        assert_eq!(line, "T MSG=\"say \\\"hi\\\"\\\\now\" 1");
    }

    #[test]
    fn test_name_escaping() {
        let record = CoercedRecord {
            time_nsec: 1,
            fields: vec![field("A B,C=D", WireValue::Integer(1))],
        };
        let line = serialize_record("MY TABLE", &record).unwrap();
        assert_eq!(line, "MY\\ TABLE A\\ B\\,C\\=D=1i 1");
    }

    #[test]
    fn test_absent_fields_are_omitted() {
        let record = CoercedRecord {
            time_nsec: 1,
            fields: vec![
                field("GONE", WireValue::Absent),
                field("KEPT", WireValue::Integer(1)),
            ],
        };
        let line = serialize_record("T", &record).unwrap();
        assert_eq!(line, "T KEPT=1i 1");

        let empty = CoercedRecord {
            time_nsec: 1,
            fields: vec![field("GONE", WireValue::Absent)],
        };
        assert!(serialize_record("T", &empty).is_none());
    }

    #[test]
    fn test_decimal_text_is_quoted() {
        let record = CoercedRecord {
            time_nsec: 1,
            fields: vec![field("BIG", WireValue::Text("18446744073709551615".to_string()))],
        };
        let line = serialize_record("T", &record).unwrap();
        assert_eq!(line, "T BIG=\"18446744073709551615\" 1");
    }

    mod http {
        use super::*;
        use crate::batch::Batch;
        use wiremock::matchers::{body_string_contains, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        fn one_record_batch() -> Batch {
            Batch {
                table: "TLM__INST__HEALTH".to_string(),
                records: vec![CoercedRecord {
                    time_nsec: 100,
                    fields: vec![field("TEMP", WireValue::Float(1.5))],
                }],
            }
        }

        #[tokio::test]
        async fn test_posts_batch_to_write_endpoint() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/write"))
                .and(body_string_contains("TLM__INST__HEALTH TEMP=1.5 100"))
                .respond_with(ResponseTemplate::new(204))
                .expect(1)
                .mount(&server)
                .await;

            let client = IlpHttpClient::with_base_url(&server.uri());
            client.ingest(&one_record_batch()).await.unwrap();
        }

        #[tokio::test]
        async fn test_server_error_is_batch_failure() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/write"))
                .respond_with(ResponseTemplate::new(500).set_body_string("table busy"))
                .mount(&server)
                .await;

            let client = IlpHttpClient::with_base_url(&server.uri());
            let err = client.ingest(&one_record_batch()).await.unwrap_err();
            match err {
                MigrateError::Ingestion { table, reason } => {
                    assert_eq!(table, "TLM__INST__HEALTH");
                    assert!(reason.contains("500"));
                },
                other => panic!("unexpected error {:?}", other),
            }
        }
    }
}
