//! Passenger `--show=xml` status documents.
//!
//! Only the fields the exporter publishes are modelled; everything else in the
//! document is ignored. Passenger declares `iso8859-1` in its XML declaration,
//! so the raw bytes are decoded with the declared charset before parsing.

use encoding_rs::{Encoding, UTF_8};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct PassengerInfo {
    #[serde(default)]
    pub supergroups: SuperGroups,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct SuperGroups {
    #[serde(default, rename = "supergroup")]
    pub items: Vec<SuperGroup>,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct SuperGroup {
    #[serde(default)]
    pub group: Option<Group>,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct Group {
    #[serde(default)]
    pub app_root: String,
    #[serde(default)]
    pub processes: Processes,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct Processes {
    #[serde(default, rename = "process")]
    pub items: Vec<PassengerProcess>,
}

/// One worker process. Memory values are in KiB, `spawn_start_time` is in
/// microseconds since the epoch.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct PassengerProcess {
    #[serde(default)]
    pub rss: u64,
    #[serde(default)]
    pub cpu: f64,
    #[serde(default)]
    pub real_memory: u64,
    #[serde(default)]
    pub processed: u64,
    #[serde(default)]
    pub spawn_start_time: i64,
}

impl PassengerInfo {
    pub fn supergroups(&self) -> &[SuperGroup] {
        &self.supergroups.items
    }
}

/// Returns the encoding label from the XML declaration, if there is one.
pub fn declared_encoding(raw: &[u8]) -> Option<String> {
    let mut reader = Reader::from_reader(raw);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Decl(decl)) => {
                let label = decl.encoding()?.ok()?;
                return Some(String::from_utf8_lossy(&label).into_owned());
            }
            Ok(Event::Text(_)) | Ok(Event::Comment(_)) => {}
            _ => return None,
        }
        buf.clear();
    }
}

/// Decodes a raw status document into text using its declared charset.
/// Unknown or missing labels fall back to UTF-8.
pub fn decode_text(raw: &[u8]) -> String {
    let encoding = declared_encoding(raw)
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .unwrap_or(UTF_8);
    let (text, _, _) = encoding.decode(raw);
    text.into_owned()
}

/// Parses a raw status document.
pub fn parse(raw: &[u8]) -> Result<PassengerInfo, quick_xml::DeError> {
    quick_xml::de::from_str(&decode_text(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"<?xml version="1.0" encoding="iso8859-1" ?>
<info version="3">
  <passenger_version>6.0.17</passenger_version>
  <process_count>2</process_count>
  <supergroups>
    <supergroup>
      <name>/var/www/ood/apps/sys/dashboard (production)</name>
      <group default="true">
        <name>/var/www/ood/apps/sys/dashboard (production)</name>
        <app_root>/var/www/ood/apps/sys/dashboard</app_root>
        <processes>
          <process>
            <pid>4120</pid>
            <rss>102400</rss>
            <cpu>12</cpu>
            <real_memory>81920</real_memory>
            <processed>57</processed>
            <spawn_start_time>1600000000000000</spawn_start_time>
          </process>
          <process>
            <pid>4121</pid>
            <rss>2048</rss>
            <cpu>0</cpu>
            <real_memory>1024</real_memory>
            <processed>1</processed>
            <spawn_start_time>1600000100000000</spawn_start_time>
          </process>
        </processes>
      </group>
    </supergroup>
  </supergroups>
</info>
"#;

    #[test]
    fn test_parse_status_document() {
        let info = parse(DOCUMENT.as_bytes()).unwrap();
        assert_eq!(info.supergroups().len(), 1);
        let group = info.supergroups()[0].group.as_ref().unwrap();
        assert_eq!(group.app_root, "/var/www/ood/apps/sys/dashboard");
        assert_eq!(group.processes.items.len(), 2);
        assert_eq!(
            group.processes.items[0],
            PassengerProcess {
                rss: 102400,
                cpu: 12.0,
                real_memory: 81920,
                processed: 57,
                spawn_start_time: 1_600_000_000_000_000,
            }
        );
    }

    #[test]
    fn test_latin1_app_root_is_decoded() {
        let mut raw = b"<?xml version=\"1.0\" encoding=\"iso8859-1\"?><info><supergroups><supergroup><group><app_root>/home/jos".to_vec();
        raw.push(0xE9);
        raw.extend_from_slice(b"/app</app_root></group></supergroup></supergroups></info>");

        let info = parse(&raw).unwrap();
        let group = info.supergroups()[0].group.as_ref().unwrap();
        assert_eq!(group.app_root, "/home/jos\u{e9}/app");
    }

    #[test]
    fn test_empty_supergroups_is_valid() {
        let info = parse(b"<?xml version=\"1.0\"?><info version=\"3\"><supergroups/></info>").unwrap();
        assert!(info.supergroups().is_empty());
        let info = parse(b"<info></info>").unwrap();
        assert!(info.supergroups().is_empty());
    }

    #[test]
    fn test_declared_encoding() {
        assert_eq!(
            declared_encoding(b"<?xml version=\"1.0\" encoding=\"UTF-8\"?><info/>").as_deref(),
            Some("UTF-8")
        );
        assert_eq!(declared_encoding(b"<info/>"), None);
    }

    #[test]
    fn test_malformed_document_is_an_error() {
        assert!(parse(b"<?xml version=\"1.0\"?><info><supergroups></info>").is_err());
    }
}
