use crate::dumper::model::{AttachmentDescriptor, ExportDocument, IssueKey};
use crate::error::DumperError;
use chrono::{DateTime, FixedOffset};
use quick_xml::events::{BytesStart, Event};
use std::fs;
use std::path::Path;

/// Jira writes `Wed, 31 Oct 1984 00:00:00 +0000`; some exports use RFC 3339.
pub fn parse_created(raw: &str) -> Option<DateTime<FixedOffset>> {
    let trimmed = raw.trim();
    DateTime::parse_from_rfc2822(trimmed)
        .or_else(|_| DateTime::parse_from_str(trimmed, "%a, %d %b %Y %H:%M:%S %z"))
        .or_else(|_| DateTime::parse_from_rfc3339(trimmed))
        .ok()
}

fn attachment_from_element(e: &BytesStart<'_>) -> Result<AttachmentDescriptor, String> {
    let mut id = None;
    let mut name = None;
    let mut size = 0u64;
    let mut author = String::new();
    let mut created_raw = None;

    for attr in e.attributes() {
        let attr = attr.map_err(|err| format!("bad attachment attribute: {err}"))?;
        let value = attr
            .unescape_value()
            .map_err(|err| format!("bad attachment attribute value: {err}"))?
            .into_owned();
        match attr.key.local_name().as_ref() {
            b"id" => id = Some(value),
            b"name" => name = Some(value),
            b"size" => size = value.trim().parse().unwrap_or(0),
            b"author" => author = value,
            b"created" => created_raw = Some(value),
            _ => {}
        }
    }

    let id = id
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| "attachment without id".to_string())?;
    let filename = name
        .filter(|v| !v.is_empty())
        .ok_or_else(|| format!("attachment {id} without name"))?;
    let created_raw = created_raw.ok_or_else(|| format!("attachment {id} without created"))?;
    let created = parse_created(&created_raw)
        .ok_or_else(|| format!("attachment {id} has unparseable created `{created_raw}`"))?;

    Ok(AttachmentDescriptor {
        id: id.trim().to_string(),
        filename,
        size,
        author,
        created,
    })
}

fn ends_with(stack: &[Vec<u8>], tail: &[&[u8]]) -> bool {
    stack.len() >= tail.len()
        && stack[stack.len() - tail.len()..]
            .iter()
            .zip(tail)
            .all(|(a, b)| a.as_slice() == *b)
}

/// Parse a Jira XML issue view into an [`ExportDocument`].
pub fn parse_document(xml: &[u8]) -> Result<ExportDocument, DumperError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut stack: Vec<Vec<u8>> = Vec::new();

    let mut key_text: Option<String> = None;
    let mut summary: Option<String> = None;
    let mut attachments = Vec::new();
    let mut rejected = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name().as_ref().to_vec();
                if name == b"attachment" && ends_with(&stack, &[b"item", b"attachments"]) {
                    match attachment_from_element(&e) {
                        Ok(descriptor) => attachments.push(descriptor),
                        Err(reason) => rejected.push(reason),
                    }
                }
                stack.push(name);
            }
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"attachment"
                    && ends_with(&stack, &[b"item", b"attachments"])
                {
                    match attachment_from_element(&e) {
                        Ok(descriptor) => attachments.push(descriptor),
                        Err(reason) => rejected.push(reason),
                    }
                }
            }
            Ok(Event::End(_)) => {
                stack.pop();
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|err| DumperError::InvalidDocument(err.to_string()))?;
                if key_text.is_none() && ends_with(&stack, &[b"item", b"key"]) {
                    key_text = Some(text.trim().to_string());
                } else if summary.is_none() && ends_with(&stack, &[b"item", b"summary"]) {
                    summary = Some(text.trim().to_string());
                }
            }
            Ok(Event::CData(c)) => {
                if summary.is_none() && ends_with(&stack, &[b"item", b"summary"]) {
                    summary = Some(String::from_utf8_lossy(&c.into_inner()).trim().to_string());
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => {
                return Err(DumperError::InvalidDocument(format!(
                    "xml error at byte {}: {err}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    let raw_key =
        key_text.ok_or_else(|| DumperError::InvalidDocument("no <item><key> element".to_string()))?;
    let key = IssueKey::parse(&raw_key).map_err(DumperError::InvalidDocument)?;

    Ok(ExportDocument {
        key,
        summary,
        attachments,
        rejected_attachments: rejected,
    })
}

pub fn read_document(path: &Path) -> Result<ExportDocument, DumperError> {
    let raw = fs::read(path).map_err(|err| DumperError::persistence(path, err))?;
    parse_document(&raw).map_err(|err| match err {
        DumperError::InvalidDocument(msg) => {
            DumperError::InvalidDocument(format!("{}: {msg}", path.display()))
        }
        other => other,
    })
}
