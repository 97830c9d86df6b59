use anyhow::Result;
use chrono::Utc;
use serde_json::{Value, json};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// One line of the relay event log.
#[derive(Debug, Clone)]
pub struct RelayEvent<'a> {
    pub event: &'a str,
    pub action: &'a str,
    pub message_id: Option<i64>,
    pub detail: Value,
}

pub fn mirror_event(path: &Path, ev: &RelayEvent<'_>) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    let line = json!({
        "ts": Utc::now().to_rfc3339(),
        "event": ev.event,
        "action": ev.action,
        "message_id": ev.message_id,
        "detail": ev.detail
    });
    writeln!(f, "{}", line)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn appends_one_line_per_event() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("logs").join("relay.ndjson");
        for id in [1, 2] {
            mirror_event(
                &path,
                &RelayEvent {
                    event: "message_ingested",
                    action: "io_file_inbound",
                    message_id: Some(id),
                    detail: json!({"base_name": format!("m{id}")}),
                },
            )
            .unwrap();
        }

        let raw = std::fs::read_to_string(&path).unwrap();
        let lines = raw.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        let second: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["event"], "message_ingested");
        assert_eq!(second["message_id"], 2);
    }
}
