//! Streaming multipart/form-data boundary scanner.
//!
//! Byte-level and incremental: the scanner never retains more than the
//! current working window plus one boundary length, so arbitrarily large
//! file parts stream straight through to the S3 bridge.

use crate::error::AppError;
use bytes::Bytes;

/// Events produced while scanning an inbound form body.
#[derive(Debug, PartialEq)]
pub enum FormEvent {
    /// A complete non-file field.
    Field { name: String, value: String },
    /// Start of a file part.
    FileStart { field: String, filename: String },
    /// File bytes (zero or more per part).
    FileChunk(Bytes),
    /// End of the current file part.
    FileEnd,
}

#[derive(Debug, PartialEq)]
enum State {
    /// Discarding the preamble up to the first delimiter.
    Preamble,
    /// Just crossed a delimiter; deciding between next part and terminator.
    AfterDelimiter,
    /// Reading part headers up to the blank line.
    Headers,
    /// Streaming part body up to the next delimiter.
    Body,
    Done,
}

enum PartKind {
    File,
    Field { name: String, value: Vec<u8> },
}

/// Extract the boundary parameter from a `multipart/form-data` content type.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|part| {
        let (key, value) = part.trim().split_once('=')?;
        if key.eq_ignore_ascii_case("boundary") {
            Some(value.trim_matches('"').to_string())
        } else {
            None
        }
    })
}

pub struct BoundaryScanner {
    /// `\r\n--{boundary}` — every interior delimiter starts with CRLF.
    delimiter: Vec<u8>,
    buf: Vec<u8>,
    state: State,
    part: Option<PartKind>,
}

impl BoundaryScanner {
    pub fn new(boundary: &str) -> Self {
        let mut delimiter = Vec::with_capacity(boundary.len() + 4);
        delimiter.extend_from_slice(b"\r\n--");
        delimiter.extend_from_slice(boundary.as_bytes());
        Self {
            delimiter,
            // Seed with CRLF so the leading delimiter matches uniformly.
            buf: b"\r\n".to_vec(),
            state: State::Preamble,
            part: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Feed bytes; returns the events that became complete.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<FormEvent>, AppError> {
        self.buf.extend_from_slice(data);
        let mut events = Vec::new();

        loop {
            match self.state {
                State::Preamble | State::Body => {
                    match find(&self.buf, &self.delimiter) {
                        Some(pos) => {
                            let body: Vec<u8> = self.buf.drain(..pos).collect();
                            self.buf.drain(..self.delimiter.len());
                            self.consume_body(&body, true, &mut events);
                            self.state = State::AfterDelimiter;
                        }
                        None => {
                            // Keep one delimiter length back in case it spans
                            // the chunk boundary.
                            let safe = self.buf.len().saturating_sub(self.delimiter.len());
                            if safe > 0 && self.state == State::Body {
                                let body: Vec<u8> = self.buf.drain(..safe).collect();
                                self.consume_body(&body, false, &mut events);
                            } else if safe > 0 {
                                self.buf.drain(..safe);
                            }
                            break;
                        }
                    }
                }
                State::AfterDelimiter => {
                    if self.buf.len() < 2 {
                        break;
                    }
                    if &self.buf[..2] == b"--" {
                        self.state = State::Done;
                    } else if &self.buf[..2] == b"\r\n" {
                        self.buf.drain(..2);
                        self.state = State::Headers;
                    } else {
                        return Err(AppError::Validation(
                            "malformed multipart body after boundary".to_string(),
                        ));
                    }
                }
                State::Headers => match find(&self.buf, b"\r\n\r\n") {
                    Some(pos) => {
                        let headers: Vec<u8> = self.buf.drain(..pos + 4).collect();
                        self.start_part(&headers[..pos], &mut events)?;
                        self.state = State::Body;
                    }
                    None => break,
                },
                State::Done => break,
            }
        }

        Ok(events)
    }

    /// Validate that the terminator was seen.
    pub fn finish(&self) -> Result<(), AppError> {
        if self.state == State::Done {
            Ok(())
        } else {
            Err(AppError::Validation(
                "unexpected end of multipart body".to_string(),
            ))
        }
    }

    fn consume_body(&mut self, data: &[u8], at_boundary: bool, events: &mut Vec<FormEvent>) {
        match &mut self.part {
            Some(PartKind::File) => {
                if !data.is_empty() {
                    events.push(FormEvent::FileChunk(Bytes::copy_from_slice(data)));
                }
                if at_boundary {
                    events.push(FormEvent::FileEnd);
                    self.part = None;
                }
            }
            Some(PartKind::Field { name, value }) => {
                value.extend_from_slice(data);
                if at_boundary {
                    events.push(FormEvent::Field {
                        name: name.clone(),
                        value: String::from_utf8_lossy(value).into_owned(),
                    });
                    self.part = None;
                }
            }
            // Preamble bytes are discarded.
            None => {}
        }
    }

    fn start_part(&mut self, headers: &[u8], events: &mut Vec<FormEvent>) -> Result<(), AppError> {
        let text = String::from_utf8_lossy(headers);
        let disposition = text
            .lines()
            .find(|line| {
                line.to_ascii_lowercase()
                    .starts_with("content-disposition:")
            })
            .ok_or_else(|| {
                AppError::Validation("multipart part missing Content-Disposition".to_string())
            })?;

        let name = disposition_param(disposition, "name").unwrap_or_default();
        match disposition_param(disposition, "filename") {
            Some(filename) => {
                events.push(FormEvent::FileStart {
                    field: name,
                    filename,
                });
                self.part = Some(PartKind::File);
            }
            None => {
                self.part = Some(PartKind::Field {
                    name,
                    value: Vec::new(),
                });
            }
        }
        Ok(())
    }
}

fn disposition_param(header: &str, param: &str) -> Option<String> {
    header.split(';').find_map(|part| {
        let (key, value) = part.trim().split_once('=')?;
        if key.eq_ignore_ascii_case(param) {
            Some(value.trim_matches('"').to_string())
        } else {
            None
        }
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDARY: &str = "xYzBoundary";

    fn form_body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, filename, content) in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match filename {
                Some(filename) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\r\n",
                        name, filename
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                        .as_bytes(),
                ),
            }
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    #[test]
    fn test_boundary_from_content_type() {
        assert_eq!(
            boundary_from_content_type("multipart/form-data; boundary=abc123").as_deref(),
            Some("abc123")
        );
        assert_eq!(
            boundary_from_content_type("multipart/form-data; boundary=\"quoted\"").as_deref(),
            Some("quoted")
        );
        assert_eq!(boundary_from_content_type("application/json"), None);
    }

    #[test]
    fn test_single_file_part() {
        let body = form_body(&[("file", Some("data.jsonl"), b"{\"a\":1}\n{\"b\":2}\n")]);
        let mut scanner = BoundaryScanner::new(BOUNDARY);
        let events = scanner.push(&body).unwrap();

        assert_eq!(
            events[0],
            FormEvent::FileStart {
                field: "file".to_string(),
                filename: "data.jsonl".to_string()
            }
        );
        let data: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                FormEvent::FileChunk(bytes) => Some(bytes.to_vec()),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(data, b"{\"a\":1}\n{\"b\":2}\n");
        assert_eq!(*events.last().unwrap(), FormEvent::FileEnd);
        assert!(scanner.is_done());
        scanner.finish().unwrap();
    }

    #[test]
    fn test_field_and_file_parts() {
        let body = form_body(&[
            ("purpose", None, b"batch"),
            ("file", Some("rows.jsonl"), b"{}\n"),
        ]);
        let mut scanner = BoundaryScanner::new(BOUNDARY);
        let events = scanner.push(&body).unwrap();

        assert_eq!(
            events[0],
            FormEvent::Field {
                name: "purpose".to_string(),
                value: "batch".to_string()
            }
        );
        assert!(matches!(events[1], FormEvent::FileStart { .. }));
    }

    #[test]
    fn test_byte_at_a_time_delivery() {
        let body = form_body(&[("file", Some("data.jsonl"), b"hello\nworld\n")]);
        let mut scanner = BoundaryScanner::new(BOUNDARY);

        let mut data = Vec::new();
        let mut started = false;
        let mut ended = false;
        for byte in body {
            for event in scanner.push(&[byte]).unwrap() {
                match event {
                    FormEvent::FileStart { .. } => started = true,
                    FormEvent::FileChunk(bytes) => data.extend_from_slice(&bytes),
                    FormEvent::FileEnd => ended = true,
                    _ => {}
                }
            }
        }
        assert!(started && ended);
        assert_eq!(data, b"hello\nworld\n");
        scanner.finish().unwrap();
    }

    #[test]
    fn test_truncated_body_detected() {
        let mut body = form_body(&[("file", Some("data.jsonl"), b"hello")]);
        body.truncate(body.len() - 10);
        let mut scanner = BoundaryScanner::new(BOUNDARY);
        scanner.push(&body).unwrap();
        assert!(scanner.finish().is_err());
    }

    #[test]
    fn test_file_content_containing_boundary_like_bytes() {
        let content = b"normal line\r\n--not-the-boundary\r\nmore";
        let body = form_body(&[("file", Some("data.jsonl"), content)]);
        let mut scanner = BoundaryScanner::new(BOUNDARY);
        let events = scanner.push(&body).unwrap();
        let data: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                FormEvent::FileChunk(bytes) => Some(bytes.to_vec()),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(data, content);
    }
}
