use quick_xml::events::Event;
use quick_xml::Reader;

/// Extract the text content of the first occurrence of `tag` in an XML body.
///
/// The S3 and STS responses this gateway consumes are tiny and flat
/// (`UploadId`, `ETag`, `ObjectSize`, `Code`, `Message`, STS credentials), so
/// a single forward scan is all that is ever needed.
pub fn first_tag_text(body: &[u8], tag: &str) -> Option<String> {
    let mut reader = Reader::from_reader(body);
    reader.config_mut().trim_text(true);

    let mut inside = false;
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == tag.as_bytes() => {
                inside = true;
            }
            Ok(Event::Text(t)) if inside => {
                return t.unescape().ok().map(|s| s.into_owned());
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == tag.as_bytes() => {
                // Empty element
                return Some(String::new());
            }
            Ok(Event::Eof) => return None,
            Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}

/// Serialize the `CompleteMultipartUpload` request body from an ordered parts
/// list. Part numbers are emitted in the order given; callers keep them
/// strictly increasing.
pub fn complete_multipart_upload_body(parts: &[(u32, String)]) -> String {
    let mut xml = String::from("<CompleteMultipartUpload>");
    for (part_number, etag) in parts {
        xml.push_str(&format!(
            "<Part><PartNumber>{}</PartNumber><ETag>{}</ETag></Part>",
            part_number, etag
        ));
    }
    xml.push_str("</CompleteMultipartUpload>");
    xml
}
