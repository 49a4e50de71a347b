use std::io;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{ActivityKind, ScoreRecord};

#[derive(Serialize)]
struct CsvRow<'a> {
    id: Uuid,
    kind: ActivityKind,
    value: f64,
    created_at: DateTime<Utc>,
    metadata: &'a str,
}

pub fn write_csv<W: io::Write>(writer: W, records: &[ScoreRecord]) -> anyhow::Result<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    for record in records {
        let metadata = serde_json::to_string(&record.metadata)?;
        csv_writer.serialize(CsvRow {
            id: record.id,
            kind: record.kind,
            value: record.value,
            created_at: record.created_at,
            metadata: &metadata,
        })?;
    }

    csv_writer.flush()?;
    Ok(records.len())
}

pub fn export_csv(path: &Path, records: &[ScoreRecord]) -> anyhow::Result<usize> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    write_csv(file, records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Metadata, UserId};
    use serde_json::json;

    #[test]
    fn writes_header_and_one_row_per_record() {
        let mut metadata = Metadata::new();
        metadata.insert("accuracy".to_string(), json!(98));
        let record = ScoreRecord {
            id: Uuid::nil(),
            user_id: UserId::new("ada"),
            kind: ActivityKind::Typing,
            value: 52.0,
            metadata,
            created_at: DateTime::from_timestamp(0, 0).unwrap(),
        };

        let mut buffer = Vec::new();
        let written = write_csv(&mut buffer, &[record]).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(written, 1);
        assert_eq!(lines[0], "id,kind,value,created_at,metadata");
        assert!(lines[1].starts_with("00000000-0000-0000-0000-000000000000,typing,52.0,"));
        assert!(lines[1].contains(r#""{""accuracy"":98}""#));
    }
}
