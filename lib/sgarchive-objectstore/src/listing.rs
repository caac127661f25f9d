//! Parsing for S3 `ListObjectsV2` XML responses: object keys
//! (`<Contents><Key>`), common prefixes (`<CommonPrefixes><Prefix>`), the
//! truncation flag, and the continuation token.

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::error::{MalformedListingSnafu, ObjectStoreError};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ListPage {
    pub keys: Vec<String>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
}

/// Parse one page of a `ListObjectsV2` response.
pub fn parse_list_page(xml: &str, uri: &str) -> Result<ListPage, ObjectStoreError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut page = ListPage::default();
    // Tracks which element we're inside so a `<Key>` under `<Contents>`
    // isn't confused with one under a different parent (S3's schema never
    // nests `Key` elsewhere, but this keeps the parser honest).
    let mut stack: Vec<String> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                stack.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
            }
            Ok(Event::End(_)) => {
                stack.pop();
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| {
                        MalformedListingSnafu {
                            uri: uri.to_string(),
                            reason: e.to_string(),
                        }
                        .build()
                    })?
                    .into_owned();
                match stack.last().map(String::as_str) {
                    Some("Key") if parent_is(&stack, "Contents") => page.keys.push(text),
                    Some("Prefix") if parent_is(&stack, "CommonPrefixes") => {
                        page.common_prefixes.push(text)
                    }
                    Some("IsTruncated") => page.is_truncated = text == "true",
                    Some("NextContinuationToken") => {
                        page.next_continuation_token = Some(text);
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(MalformedListingSnafu {
                    uri: uri.to_string(),
                    reason: e.to_string(),
                }
                .build())
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(page)
}

fn parent_is(stack: &[String], parent: &str) -> bool {
    stack.len() >= 2 && stack[stack.len() - 2] == parent
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>tok-123</NextContinuationToken>
  <Contents><Key>raw/v1/2023/11/14/abc.parquet</Key></Contents>
  <Contents><Key>raw/v1/2023/11/14/def.parquet</Key></Contents>
  <CommonPrefixes><Prefix>raw/v1/2023/11/</Prefix></CommonPrefixes>
</ListBucketResult>"#;

    #[test]
    fn parses_keys_prefixes_and_token() {
        let page = parse_list_page(SAMPLE, "http://example").unwrap();
        assert_eq!(
            page.keys,
            vec![
                "raw/v1/2023/11/14/abc.parquet".to_string(),
                "raw/v1/2023/11/14/def.parquet".to_string(),
            ]
        );
        assert_eq!(page.common_prefixes, vec!["raw/v1/2023/11/".to_string()]);
        assert!(page.is_truncated);
        assert_eq!(page.next_continuation_token.as_deref(), Some("tok-123"));
    }

    #[test]
    fn empty_listing_has_no_keys() {
        let xml = r#"<ListBucketResult><IsTruncated>false</IsTruncated></ListBucketResult>"#;
        let page = parse_list_page(xml, "http://example").unwrap();
        assert!(page.keys.is_empty());
        assert!(!page.is_truncated);
        assert!(page.next_continuation_token.is_none());
    }
}
