//! The package summary: the fixed-layout header at the start of every file,
//! naming where every other table lives.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};

/// The magic value every package file begins with. Whether it's stored in
/// little- or big-endian byte order tells us the endianness of everything
/// else in the file — the original format's own self-describing trick, kept
/// here rather than assuming a fixed target endianness.
const PACKAGE_MAGIC: u32 = 0x9E2A_83C1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

impl Endianness {
    pub fn read_u32(self, bytes: &[u8]) -> u32 {
        match self {
            Endianness::Little => LittleEndian::read_u32(bytes),
            Endianness::Big => BigEndian::read_u32(bytes),
        }
    }

    pub fn read_u64<R: Read>(self, r: &mut R) -> io::Result<u64> {
        match self {
            Endianness::Little => r.read_u64::<LittleEndian>(),
            Endianness::Big => r.read_u64::<BigEndian>(),
        }
    }

    pub fn read_u32_from<R: Read>(self, r: &mut R) -> io::Result<u32> {
        match self {
            Endianness::Little => r.read_u32::<LittleEndian>(),
            Endianness::Big => r.read_u32::<BigEndian>(),
        }
    }

    pub fn read_i32<R: Read>(self, r: &mut R) -> io::Result<i32> {
        match self {
            Endianness::Little => r.read_i32::<LittleEndian>(),
            Endianness::Big => r.read_i32::<BigEndian>(),
        }
    }

    pub fn write_u32<W: Write>(self, w: &mut W, v: u32) -> io::Result<()> {
        match self {
            Endianness::Little => w.write_u32::<LittleEndian>(v),
            Endianness::Big => w.write_u32::<BigEndian>(v),
        }
    }

    pub fn write_i32<W: Write>(self, w: &mut W, v: i32) -> io::Result<()> {
        match self {
            Endianness::Little => w.write_i32::<LittleEndian>(v),
            Endianness::Big => w.write_i32::<BigEndian>(v),
        }
    }

    pub fn write_u64<W: Write>(self, w: &mut W, v: u64) -> io::Result<()> {
        match self {
            Endianness::Little => w.write_u64::<LittleEndian>(v),
            Endianness::Big => w.write_u64::<BigEndian>(v),
        }
    }
}

/// The package header summary. Offsets are absolute byte offsets from the
/// start of the file; counts are the number of fixed-size records in each
/// table. `total_header_size` marks the end of the header region (and the
/// start of the body payload, which the patcher must copy verbatim).
#[derive(Debug, Clone)]
pub struct Summary {
    pub endianness: Endianness,
    pub file_version: i32,
    pub package_flags: u32,
    pub package_name: String,
    pub total_header_size: i32,

    pub name_count: i32,
    pub name_offset: i32,

    pub soft_object_path_count: i32,
    pub soft_object_path_offset: i32,

    pub gatherable_text_count: i32,
    pub gatherable_text_offset: i32,

    pub import_count: i32,
    pub import_offset: i32,

    pub export_count: i32,
    pub export_offset: i32,

    pub soft_package_reference_count: i32,
    pub soft_package_reference_offset: i32,

    pub searchable_names_offset: i32,

    pub thumbnail_table_offset: i32,

    pub asset_registry_data_offset: i32,

    /// Non-zero only in cooked (runtime-stripped) packages; the patcher
    /// rejects any file where this isn't zero, since cooked packages carry
    /// no intact header tables to rewrite (spec.md §4.D step 3).
    pub bulk_data_start_offset: i32,
}

impl Summary {
    /// Reads the summary, auto-detecting endianness from the magic value.
    pub fn read<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut magic_buf = [0u8; 4];
        r.read_exact(&mut magic_buf)?;

        let endianness = if LittleEndian::read_u32(&magic_buf) == PACKAGE_MAGIC {
            Endianness::Little
        } else if BigEndian::read_u32(&magic_buf) == PACKAGE_MAGIC {
            Endianness::Big
        } else {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "bad package magic"));
        };

        let file_version = endianness.read_i32(r)?;
        let package_flags = endianness.read_u32_from(r)?;

        let package_name = read_string(r, endianness)?;

        let total_header_size = endianness.read_i32(r)?;

        let name_count = endianness.read_i32(r)?;
        let name_offset = endianness.read_i32(r)?;

        let soft_object_path_count = endianness.read_i32(r)?;
        let soft_object_path_offset = endianness.read_i32(r)?;

        let gatherable_text_count = endianness.read_i32(r)?;
        let gatherable_text_offset = endianness.read_i32(r)?;

        let import_count = endianness.read_i32(r)?;
        let import_offset = endianness.read_i32(r)?;

        let export_count = endianness.read_i32(r)?;
        let export_offset = endianness.read_i32(r)?;

        let soft_package_reference_count = endianness.read_i32(r)?;
        let soft_package_reference_offset = endianness.read_i32(r)?;

        let searchable_names_offset = endianness.read_i32(r)?;
        let thumbnail_table_offset = endianness.read_i32(r)?;
        let asset_registry_data_offset = endianness.read_i32(r)?;
        let bulk_data_start_offset = endianness.read_i32(r)?;

        Ok(Summary {
            endianness,
            file_version,
            package_flags,
            package_name,
            total_header_size,
            name_count,
            name_offset,
            soft_object_path_count,
            soft_object_path_offset,
            gatherable_text_count,
            gatherable_text_offset,
            import_count,
            import_offset,
            export_count,
            export_offset,
            soft_package_reference_count,
            soft_package_reference_offset,
            searchable_names_offset,
            thumbnail_table_offset,
            asset_registry_data_offset,
            bulk_data_start_offset,
        })
    }

    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let mut magic_buf = [0u8; 4];
        match self.endianness {
            Endianness::Little => LittleEndian::write_u32(&mut magic_buf, PACKAGE_MAGIC),
            Endianness::Big => BigEndian::write_u32(&mut magic_buf, PACKAGE_MAGIC),
        }
        w.write_all(&magic_buf)?;

        self.endianness.write_i32(w, self.file_version)?;
        self.endianness.write_u32(w, self.package_flags)?;
        write_string(w, self.endianness, &self.package_name)?;
        self.endianness.write_i32(w, self.total_header_size)?;

        self.endianness.write_i32(w, self.name_count)?;
        self.endianness.write_i32(w, self.name_offset)?;

        self.endianness.write_i32(w, self.soft_object_path_count)?;
        self.endianness.write_i32(w, self.soft_object_path_offset)?;

        self.endianness.write_i32(w, self.gatherable_text_count)?;
        self.endianness.write_i32(w, self.gatherable_text_offset)?;

        self.endianness.write_i32(w, self.import_count)?;
        self.endianness.write_i32(w, self.import_offset)?;

        self.endianness.write_i32(w, self.export_count)?;
        self.endianness.write_i32(w, self.export_offset)?;

        self.endianness
            .write_i32(w, self.soft_package_reference_count)?;
        self.endianness
            .write_i32(w, self.soft_package_reference_offset)?;

        self.endianness.write_i32(w, self.searchable_names_offset)?;
        self.endianness.write_i32(w, self.thumbnail_table_offset)?;
        self.endianness
            .write_i32(w, self.asset_registry_data_offset)?;
        self.endianness.write_i32(w, self.bulk_data_start_offset)?;

        Ok(())
    }

    /// `true` for packages that have been cooked (runtime-stripped): their
    /// header tables are gone and a rewrite would corrupt them.
    pub fn is_cooked(&self) -> bool {
        self.bulk_data_start_offset != 0
    }
}

/// Strings are length-prefixed (`i32`, negative for UTF-16) followed by the
/// raw bytes including a trailing nul. Only the positive (ASCII/UTF-8)
/// encoding is handled, matching the subset of real-world assets this tool
/// targets; a negative length is rejected as unsupported rather than
/// silently mis-decoded.
pub fn read_string<R: Read>(r: &mut R, endianness: Endianness) -> io::Result<String> {
    let len = endianness.read_i32(r)?;
    if len < 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "UTF-16 name table entries are not supported",
        ));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    if buf.last() == Some(&0) {
        buf.pop();
    }
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

pub fn write_string<W: Write>(w: &mut W, endianness: Endianness, s: &str) -> io::Result<()> {
    let len = s.len() as i32 + 1;
    endianness.write_i32(w, len)?;
    w.write_all(s.as_bytes())?;
    w.write_all(&[0u8])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_summary() -> Summary {
        Summary {
            endianness: Endianness::Little,
            file_version: 522,
            package_flags: 0,
            package_name: "/Game/Foo".to_string(),
            total_header_size: 256,
            name_count: 3,
            name_offset: 100,
            soft_object_path_count: 0,
            soft_object_path_offset: 0,
            gatherable_text_count: 0,
            gatherable_text_offset: 0,
            import_count: 2,
            import_offset: 150,
            export_count: 1,
            export_offset: 180,
            soft_package_reference_count: 0,
            soft_package_reference_offset: 0,
            searchable_names_offset: 0,
            thumbnail_table_offset: 0,
            asset_registry_data_offset: 200,
            bulk_data_start_offset: 0,
        }
    }

    #[test]
    fn round_trips_little_endian() {
        let summary = sample_summary();
        let mut buf = Vec::new();
        summary.write(&mut buf).unwrap();

        let read_back = Summary::read(&mut Cursor::new(buf)).unwrap();
        assert_eq!(read_back.package_name, "/Game/Foo");
        assert_eq!(read_back.name_count, 3);
        assert_eq!(read_back.endianness, Endianness::Little);
    }

    #[test]
    fn round_trips_big_endian() {
        let mut summary = sample_summary();
        summary.endianness = Endianness::Big;
        let mut buf = Vec::new();
        summary.write(&mut buf).unwrap();

        let read_back = Summary::read(&mut Cursor::new(buf)).unwrap();
        assert_eq!(read_back.endianness, Endianness::Big);
        assert_eq!(read_back.import_count, 2);
    }

    #[test]
    fn rejects_bad_magic() {
        let buf = vec![0u8; 16];
        assert!(Summary::read(&mut Cursor::new(buf)).is_err());
    }

    #[test]
    fn nonzero_bulk_data_start_marks_cooked() {
        let mut summary = sample_summary();
        summary.bulk_data_start_offset = 512;
        assert!(summary.is_cooked());
        assert!(!sample_summary().is_cooked());
    }
}
