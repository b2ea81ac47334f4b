use std::io::Write;

use schematron_proxy::{Document, XmlParser};
use tempfile::NamedTempFile;

/// Open and closed content models for `AAA`
pub const SCHEMA: &str = r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron">
  <pattern id="OpenModel">
    <title>Open Model</title>
    <rule context="AAA">
      <assert test="BBB">BBB element is not present</assert>
      <assert test="CCC">CCC element is not present</assert>
    </rule>
  </pattern>
  <pattern id="ClosedModel">
    <title>Closed model</title>
    <rule context="AAA">
      <assert test="BBB">BBB element is not present</assert>
      <assert test="CCC">CCC element is not present</assert>
      <assert test="count(BBB|CCC) = count(*)">There is an extra element</assert>
    </rule>
  </pattern>
</schema>"#;

/// Rules on prefixed names; the prefixes are bound with `ns` declarations
pub const NAMESPACED_SCHEMA: &str = r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron">
  <ns prefix="p" uri="urn:p"/>
  <ns prefix="q" uri="urn:q"/>
  <pattern id="Prefixed">
    <rule context="p:AAA">
      <assert test="q:BBB">q:BBB element is not present</assert>
    </rule>
  </pattern>
</schema>"#;

pub const VALID: &str = "<AAA><BBB/><CCC/></AAA>";

pub const INVALID: &str = "<AAA><BBB/><CCC/><DDD/></AAA>";

pub const EMPTY_SCHEMA: &str = r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron"/>"#;

pub const EMPTY_PATTERN_SCHEMA: &str = r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron">
  <pattern id="OpenModel">
    <title>Open model</title>
  </pattern>
</schema>"#;

/// Element children `e0` and `e2` separated by text and a comment
pub const MIXED: &str = "<root><e0/>text<!-- c --><e2/></root>";

pub const NAMESPACED: &str = r#"<root xmlns:p="urn:p" xmlns="urn:default" p:id="7" plain="x"><p:child p:kind="a"/><child/></root>"#;

pub fn parse(xml: &str) -> Document {
    XmlParser::default()
        .parse_str(xml)
        .expect("fixture should be well-formed")
}

pub fn write_temp(content: &str, suffix: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temporary file");
    file.write_all(content.as_bytes()).expect("write fixture");
    file
}
