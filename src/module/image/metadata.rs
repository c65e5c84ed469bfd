//! Metadata root, stream headers and the `#~` table stream (ECMA-335 II.24.2).

use strum::IntoEnumIterator;

use crate::{
    file::{parser::Parser, writer::Writer},
    module::image::tables::{RawTable, TableId, TableInfo, MAX_TABLES, UNSUPPORTED_TABLES},
    Error, Result,
};

/// Signature of the metadata root, `BSJB`.
pub(crate) const METADATA_SIGNATURE: u32 = 0x424A_5342;

/// Heap flag announcing an extra 4 bytes after the row counts.
const HEAP_EXTRA_DATA: u8 = 0x40;

/// The metadata root: runtime version and the named streams.
pub(crate) struct MetadataRoot<'a> {
    pub version: String,
    streams: Vec<(String, &'a [u8])>,
}

impl<'a> MetadataRoot<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let mut parser = Parser::new(data);
        if parser.read_le::<u32>()? != METADATA_SIGNATURE {
            return Err(malformed_error!("Invalid metadata signature"));
        }
        // major, minor, reserved
        parser.read_le::<u16>()?;
        parser.read_le::<u16>()?;
        parser.read_le::<u32>()?;
        let length = parser.read_le::<u32>()? as usize;
        let version_bytes = parser.read_bytes(length)?;
        let end = version_bytes
            .iter()
            .position(|byte| *byte == 0)
            .unwrap_or(version_bytes.len());
        let version = String::from_utf8(version_bytes[..end].to_vec())
            .map_err(|_| malformed_error!("Invalid metadata version string"))?;
        // flags
        parser.read_le::<u16>()?;

        let count = parser.read_le::<u16>()?;
        let mut streams = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let offset = parser.read_le::<u32>()? as usize;
            let size = parser.read_le::<u32>()? as usize;
            let name = parser.read_string_utf8()?;
            parser.align(4)?;
            let stream = offset
                .checked_add(size)
                .and_then(|end| data.get(offset..end))
                .ok_or_else(|| malformed_error!("Stream {} lies outside the metadata", name))?;
            streams.push((name, stream));
        }

        Ok(MetadataRoot { version, streams })
    }

    /// The first stream with the given name.
    pub fn stream(&self, name: &str) -> Option<&'a [u8]> {
        self.streams
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, data)| *data)
    }

    /// `true` if a stream with the given name exists.
    pub fn has_stream(&self, name: &str) -> bool {
        self.stream(name).is_some()
    }
}

/// Assemble a metadata root around the given streams, in order.
pub(crate) fn write_root(version: &str, streams: &[(&str, &[u8])]) -> Result<Vec<u8>> {
    let mut version_bytes = version.as_bytes().to_vec();
    version_bytes.push(0);
    version_bytes.resize(version_bytes.len().next_multiple_of(4), 0);

    let header_size = 20
        + version_bytes.len()
        + streams
            .iter()
            .map(|(name, _)| 8 + (name.len() + 1).next_multiple_of(4))
            .sum::<usize>();

    let mut writer = Writer::new();
    writer.write_le::<u32>(METADATA_SIGNATURE);
    writer.write_le::<u16>(1);
    writer.write_le::<u16>(1);
    writer.write_le::<u32>(0);
    writer.write_le::<u32>(version_bytes.len() as u32);
    writer.write_bytes(&version_bytes);
    writer.write_le::<u16>(0);
    writer.write_le::<u16>(streams.len() as u16);

    let mut offset = header_size;
    for (name, data) in streams {
        let size = u32::try_from(data.len())
            .map_err(|_| malformed_error!("Stream {} is too large", name))?;
        writer.write_le::<u32>(offset as u32);
        writer.write_le::<u32>(size);
        writer.write_string_utf8(name);
        writer.align(4);
        offset += data.len().next_multiple_of(4);
    }
    for (_, data) in streams {
        writer.write_bytes(data);
        writer.align(4);
    }
    Ok(writer.into_inner())
}

/// The decoded `#~` stream.
pub(crate) struct TablesStream {
    pub info: TableInfo,
    tables: Vec<RawTable>,
}

impl TablesStream {
    /// Parse the table stream. `external` holds the row counts of tables stored in another
    /// image, as announced by a symbol file's `#Pdb` stream.
    pub fn parse(data: &[u8], external: Option<&[u32; MAX_TABLES]>) -> Result<Self> {
        let mut parser = Parser::new(data);
        parser.read_le::<u32>()?;
        let major = parser.read_le::<u8>()?;
        parser.read_le::<u8>()?;
        if major != 2 {
            return Err(malformed_error!("Unsupported table stream version {}", major));
        }
        let heap_sizes = parser.read_le::<u8>()?;
        parser.read_le::<u8>()?;
        let valid = parser.read_le::<u64>()?;
        parser.read_le::<u64>()?;

        let mut rows = external.copied().unwrap_or([0; MAX_TABLES]);
        let mut present = Vec::new();
        for number in 0..MAX_TABLES {
            if valid & (1 << number) == 0 {
                continue;
            }
            let Some(table) = TableId::from_number(number) else {
                return Err(malformed_error!("Unknown metadata table 0x{:02x}", number));
            };
            rows[number] = parser.read_le::<u32>()?;
            present.push(table);
        }
        if heap_sizes & HEAP_EXTRA_DATA != 0 {
            parser.read_le::<u32>()?;
        }

        let info = TableInfo::new(rows, heap_sizes);
        let mut tables: Vec<RawTable> = TableId::iter().map(RawTable::new).collect();
        for table in present {
            let count = info.rows(table);
            if count > 0 && UNSUPPORTED_TABLES.contains(&table) {
                return Err(Error::NotSupported);
            }
            let sizes = info.column_sizes(table);
            let row_size: usize = sizes.iter().sum();
            if (count as usize).saturating_mul(row_size) > parser.remaining() {
                return Err(out_of_bounds_error!());
            }

            let raw = table_mut(&mut tables, table);
            let mut row = Vec::with_capacity(sizes.len());
            for _ in 0..count {
                row.clear();
                for size in &sizes {
                    row.push(match size {
                        2 => u32::from(parser.read_le::<u16>()?),
                        _ => parser.read_le::<u32>()?,
                    });
                }
                raw.push(&row);
            }
        }

        Ok(TablesStream { info, tables })
    }

    pub fn table(&self, id: TableId) -> &RawTable {
        &self.tables[id.position()]
    }

    /// Row by 1-based index.
    pub fn row(&self, id: TableId, row: u32) -> Result<&[u32]> {
        self.table(id).row(row)
    }

    /// Number of rows of a table of this stream.
    pub fn len(&self, id: TableId) -> u32 {
        self.table(id).len()
    }
}

fn table_mut(tables: &mut [RawTable], id: TableId) -> &mut RawTable {
    &mut tables[id.position()]
}

/// Encode a `#~` stream. Tables must be in [`TableId`] order; empty tables are omitted.
pub(crate) fn write_tables(
    tables: &[RawTable],
    heap_sizes: u8,
    external: Option<&[u32; MAX_TABLES]>,
    sorted: u64,
) -> Result<Vec<u8>> {
    let mut rows = external.copied().unwrap_or([0; MAX_TABLES]);
    let mut valid = 0_u64;
    for table in tables.iter().filter(|table| !table.is_empty()) {
        rows[table.id as usize] = table.len();
        valid |= 1 << table.id as u64;
    }
    let info = TableInfo::new(rows, heap_sizes);

    let mut writer = Writer::new();
    writer.write_le::<u32>(0);
    writer.write_le::<u8>(2);
    writer.write_le::<u8>(0);
    writer.write_le::<u8>(heap_sizes);
    writer.write_le::<u8>(1);
    writer.write_le::<u64>(valid);
    writer.write_le::<u64>(sorted & valid);
    for table in tables.iter().filter(|table| !table.is_empty()) {
        writer.write_le::<u32>(table.len());
    }

    for table in tables.iter().filter(|table| !table.is_empty()) {
        let sizes = info.column_sizes(table.id);
        for row in table.rows() {
            for (value, size) in row.iter().zip(&sizes) {
                if *size == 2 {
                    let narrow = u16::try_from(*value).map_err(|_| {
                        malformed_error!("Value {} does not fit a column of {:?}", value, table.id)
                    })?;
                    writer.write_le::<u16>(narrow);
                } else {
                    writer.write_le::<u32>(*value);
                }
            }
        }
    }
    writer.align(4);
    Ok(writer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::image::tables::SORTED_TABLES;

    #[test]
    fn root_streams() {
        let root = write_root("v4.0.30319", &[("#~", &[1, 2, 3]), ("#Strings", &[0, 0, 0, 0])])
            .unwrap();
        assert_eq!(&root[..4], b"BSJB");

        let parsed = MetadataRoot::parse(&root).unwrap();
        assert_eq!(parsed.version, "v4.0.30319");
        assert_eq!(parsed.stream("#~"), Some(&[1_u8, 2, 3][..]));
        assert!(parsed.has_stream("#Strings"));
        assert!(!parsed.has_stream("#Blob"));
        assert!(MetadataRoot::parse(&root[4..]).is_err());
    }

    #[test]
    fn table_stream() {
        let mut tables: Vec<RawTable> = TableId::iter().map(RawTable::new).collect();
        tables[TableId::TypeRef.position()].push(&[6, 10, 20]);
        tables[TableId::TypeRef.position()].push(&[6, 30, 20]);
        tables[TableId::ModuleRef.position()].push(&[40]);
        let data = write_tables(&tables, 0, None, SORTED_TABLES).unwrap();
        assert_eq!(data[4], 2);
        assert_eq!(&data[8..16], &0x0400_0002_u64.to_le_bytes());

        let stream = TablesStream::parse(&data, None).unwrap();
        assert_eq!(stream.len(TableId::TypeRef), 2);
        assert_eq!(stream.row(TableId::TypeRef, 2).unwrap(), &[6, 30, 20]);
        assert_eq!(stream.row(TableId::ModuleRef, 1).unwrap(), &[40]);
        assert_eq!(stream.len(TableId::TypeDef), 0);
    }

    #[test]
    fn pointer_tables_are_rejected() {
        let mut tables: Vec<RawTable> = TableId::iter().map(RawTable::new).collect();
        tables[TableId::MethodPtr.position()].push(&[1]);
        let data = write_tables(&tables, 0, None, 0).unwrap();
        assert!(matches!(
            TablesStream::parse(&data, None),
            Err(Error::NotSupported)
        ));

        let mut unknown = data.clone();
        unknown[8..16].copy_from_slice(&(1_u64 << 0x2E).to_le_bytes());
        assert!(matches!(
            TablesStream::parse(&unknown, None),
            Err(Error::Malformed { .. })
        ));
    }
}
