//! A small quick-xml-based writer used by [`crate::local_output`] to build
//! libvirt domain XML without string concatenation.

use color_eyre::eyre::eyre;
use color_eyre::Result;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::writer::Writer;
use std::io::Cursor;

/// A builder for creating XML documents with quick-xml.
pub struct XmlWriter {
    writer: Writer<Cursor<Vec<u8>>>,
}

impl std::fmt::Debug for XmlWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmlWriter").finish_non_exhaustive()
    }
}

impl XmlWriter {
    /// Create a new, empty XML writer.
    pub fn new() -> Self {
        Self {
            writer: Writer::new(Cursor::new(Vec::new())),
        }
    }

    /// Start an XML element with attributes.
    pub fn start_element(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<()> {
        let mut elem = BytesStart::new(name);
        for (key, value) in attributes {
            elem.push_attribute((*key, *value));
        }
        self.writer
            .write_event(Event::Start(elem))
            .map_err(|e| eyre!("failed to write start element {name}: {e}"))?;
        Ok(())
    }

    /// Write a simple element with text content.
    pub fn write_text_element(&mut self, name: &str, text: &str) -> Result<()> {
        self.write_text_element_with_attrs(name, text, &[])
    }

    /// Write a simple element with text content and attributes.
    pub fn write_text_element_with_attrs(
        &mut self,
        name: &str,
        text: &str,
        attributes: &[(&str, &str)],
    ) -> Result<()> {
        self.start_element(name, attributes)?;
        if !text.is_empty() {
            self.write_text(text)?;
        }
        self.end_element(name)?;
        Ok(())
    }

    /// Write a self-closing element with attributes.
    pub fn write_empty_element(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<()> {
        let mut elem = BytesStart::new(name);
        for (key, value) in attributes {
            elem.push_attribute((*key, *value));
        }
        self.writer
            .write_event(Event::Empty(elem))
            .map_err(|e| eyre!("failed to write empty element {name}: {e}"))?;
        Ok(())
    }

    /// Write text content.
    pub fn write_text(&mut self, text: &str) -> Result<()> {
        if !text.is_empty() {
            self.writer
                .write_event(Event::Text(BytesText::new(text)))
                .map_err(|e| eyre!("failed to write text: {e}"))?;
        }
        Ok(())
    }

    /// End an XML element.
    pub fn end_element(&mut self, name: &str) -> Result<()> {
        self.writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(|e| eyre!("failed to write end element {name}: {e}"))?;
        Ok(())
    }

    /// Get the generated XML as a string.
    pub fn into_string(self) -> Result<String> {
        let bytes = self.writer.into_inner().into_inner();
        String::from_utf8(bytes).map_err(|e| eyre!("generated XML was not valid UTF-8: {e}"))
    }
}

impl Default for XmlWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_nested_elements_with_attributes() {
        let mut w = XmlWriter::new();
        w.start_element("domain", &[("type", "kvm")]).unwrap();
        w.write_text_element("name", "vm1").unwrap();
        w.write_empty_element("boot", &[("dev", "hd")]).unwrap();
        w.end_element("domain").unwrap();
        let xml = w.into_string().unwrap();
        assert!(xml.contains("<domain type=\"kvm\">"));
        assert!(xml.contains("<name>vm1</name>"));
        assert!(xml.contains("<boot dev=\"hd\"/>"));
        assert!(xml.contains("</domain>"));
    }
}
