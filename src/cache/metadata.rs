//! The metadata file stored next to each cached rewrite.
//!
//! ```xml
//! <?xml version="1.0" encoding="utf-8"?>
//! <rewrite-cache format="1">
//!   <key hash="a9993e36..." tool-version="0.3.2" platform="Linux" machine="5d41402a..."/>
//!   <assembly file="ExampleMod.dll" use-cached="true" symbols="ExampleMod.pdb"/>
//! </rewrite-cache>
//! ```

use quick_xml::{
    events::{BytesDecl, BytesEnd, BytesStart, Event},
    Reader, Writer,
};

use crate::{
    cache::{CacheKey, MachineIdentity, SemanticVersion},
    Error, Platform, Result,
};

/// Version of the metadata layout; entries written with another version are stale.
pub const METADATA_FORMAT: u32 = 1;

fn xml_error(error: impl std::fmt::Display) -> Error {
    Error::Cache(format!("metadata - {error}"))
}

/// Contents of a metadata file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheMetadata {
    /// Key the entry was written under
    pub key: CacheKey,
    /// File name of the cached assembly
    pub file_name: String,
    /// `false` if rewriting changed nothing and the original file should be loaded
    pub use_cached: bool,
    /// File name of the cached symbols, if any
    pub symbols: Option<String>,
}

impl CacheMetadata {
    /// Serialize to XML.
    ///
    /// # Errors
    /// Returns [`Error::Cache`] if the XML writer fails.
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
            .map_err(xml_error)?;

        let format = METADATA_FORMAT.to_string();
        let mut root = BytesStart::new("rewrite-cache");
        root.push_attribute(("format", format.as_str()));
        writer.write_event(Event::Start(root)).map_err(xml_error)?;

        let tool_version = self.key.tool_version.to_string();
        let mut key = BytesStart::new("key");
        key.push_attribute(("hash", self.key.hash.as_str()));
        key.push_attribute(("tool-version", tool_version.as_str()));
        key.push_attribute(("platform", self.key.platform.as_ref()));
        key.push_attribute(("machine", self.key.machine.as_str()));
        writer.write_event(Event::Empty(key)).map_err(xml_error)?;

        let mut assembly = BytesStart::new("assembly");
        assembly.push_attribute(("file", self.file_name.as_str()));
        assembly.push_attribute(("use-cached", if self.use_cached { "true" } else { "false" }));
        if let Some(symbols) = &self.symbols {
            assembly.push_attribute(("symbols", symbols.as_str()));
        }
        writer.write_event(Event::Empty(assembly)).map_err(xml_error)?;

        writer
            .write_event(Event::End(BytesEnd::new("rewrite-cache")))
            .map_err(xml_error)?;

        String::from_utf8(writer.into_inner()).map_err(xml_error)
    }

    /// Parse XML written by [`CacheMetadata::to_xml`].
    ///
    /// # Errors
    /// Returns [`Error::Cache`] for malformed XML, an unknown format version or missing
    /// attributes.
    pub fn from_xml(text: &str) -> Result<Self> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        let mut format = None;
        let mut hash = None;
        let mut tool_version = None;
        let mut platform = None;
        let mut machine = None;
        let mut file_name = None;
        let mut use_cached = None;
        let mut symbols = None;

        loop {
            match reader.read_event().map_err(xml_error)? {
                Event::Start(element) | Event::Empty(element) => {
                    let name = element.name();
                    for attribute in element.attributes() {
                        let attribute = attribute.map_err(xml_error)?;
                        let value = attribute.unescape_value().map_err(xml_error)?.into_owned();
                        match (name.as_ref(), attribute.key.as_ref()) {
                            (b"rewrite-cache", b"format") => format = Some(value),
                            (b"key", b"hash") => hash = Some(value),
                            (b"key", b"tool-version") => tool_version = Some(value),
                            (b"key", b"platform") => platform = Some(value),
                            (b"key", b"machine") => machine = Some(value),
                            (b"assembly", b"file") => file_name = Some(value),
                            (b"assembly", b"use-cached") => use_cached = Some(value),
                            (b"assembly", b"symbols") => symbols = Some(value),
                            _ => {}
                        }
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        let missing = |attribute: &str| xml_error(format!("missing {attribute}"));
        if format.as_deref() != Some(METADATA_FORMAT.to_string().as_str()) {
            return Err(xml_error(format!(
                "unsupported format {}",
                format.as_deref().unwrap_or("<none>")
            )));
        }

        let key = CacheKey {
            hash: hash.ok_or_else(|| missing("hash"))?,
            tool_version: tool_version
                .ok_or_else(|| missing("tool-version"))?
                .parse::<SemanticVersion>()?,
            platform: Platform::parse(&platform.ok_or_else(|| missing("platform"))?)?,
            machine: MachineIdentity::new(machine.ok_or_else(|| missing("machine"))?),
        };
        let use_cached = match use_cached.as_deref() {
            Some("true") => true,
            Some("false") => false,
            _ => return Err(missing("use-cached")),
        };

        Ok(CacheMetadata {
            key,
            file_name: file_name.ok_or_else(|| missing("file"))?,
            use_cached,
            symbols,
        })
    }
}
