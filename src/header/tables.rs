//! The variable-length tables referenced by [`super::summary::Summary`]'s
//! offsets.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};

use crate::header::summary::{read_string, write_string, Endianness};

/// A name-table entry: a base string plus an instance number, matching the
/// original `(index, number)` pair used to deduplicate repeated strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameTableEntry {
    pub value: String,
    pub number: i32,
}

impl NameTableEntry {
    pub fn read<R: Read>(r: &mut R, endianness: Endianness) -> io::Result<Self> {
        let value = read_string(r, endianness)?;
        let number = endianness.read_i32(r)?;
        Ok(NameTableEntry { value, number })
    }

    pub fn write<W: Write>(&self, w: &mut W, endianness: Endianness) -> io::Result<()> {
        write_string(w, endianness, &self.value)?;
        endianness.write_i32(w, self.number)?;
        Ok(())
    }
}

/// An index into the name table, plus the same instance-number suffix used
/// on every other table that references a name by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameReference {
    pub index: i32,
    pub number: i32,
}

impl NameReference {
    pub fn read<R: Read>(r: &mut R, endianness: Endianness) -> io::Result<Self> {
        let index = endianness.read_i32(r)?;
        let number = endianness.read_i32(r)?;
        Ok(NameReference { index, number })
    }

    pub fn write<W: Write>(&self, w: &mut W, endianness: Endianness) -> io::Result<()> {
        endianness.write_i32(w, self.index)?;
        endianness.write_i32(w, self.number)?;
        Ok(())
    }
}

/// A soft object path: an `FTopLevelAssetPath` (package name index plus
/// asset name index) plus an in-package sub-path string, used for asset
/// references that tolerate the target not being loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftObjectPathEntry {
    pub package_name: NameReference,
    pub asset_name: NameReference,
    pub sub_path: String,
}

impl SoftObjectPathEntry {
    pub fn read<R: Read>(r: &mut R, endianness: Endianness) -> io::Result<Self> {
        let package_name = NameReference::read(r, endianness)?;
        let asset_name = NameReference::read(r, endianness)?;
        let sub_path = read_string(r, endianness)?;
        Ok(SoftObjectPathEntry {
            package_name,
            asset_name,
            sub_path,
        })
    }

    pub fn write<W: Write>(&self, w: &mut W, endianness: Endianness) -> io::Result<()> {
        self.package_name.write(w, endianness)?;
        self.asset_name.write(w, endianness)?;
        write_string(w, endianness, &self.sub_path)?;
        Ok(())
    }
}

/// One localizable text entry harvested from the asset for the gatherable
/// text data table (source file path, source text, key).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatherableTextEntry {
    pub namespace: String,
    pub source_string: String,
}

impl GatherableTextEntry {
    pub fn read<R: Read>(r: &mut R, endianness: Endianness) -> io::Result<Self> {
        let namespace = read_string(r, endianness)?;
        let source_string = read_string(r, endianness)?;
        Ok(GatherableTextEntry {
            namespace,
            source_string,
        })
    }

    pub fn write<W: Write>(&self, w: &mut W, endianness: Endianness) -> io::Result<()> {
        write_string(w, endianness, &self.namespace)?;
        write_string(w, endianness, &self.source_string)?;
        Ok(())
    }
}

/// A reference to an object defined in another package.
///
/// `package_name` is the editor-only `#if WITH_EDITORONLY_DATA` package-name
/// override carried by imports whose owning package differs from the
/// resolved outer chain (e.g. a redirected original package); `None` when
/// the import carries no such override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportEntry {
    pub class_package: NameReference,
    pub class_name: NameReference,
    pub outer_index: i32,
    pub object_name: NameReference,
    pub package_name: Option<NameReference>,
    pub used_in_game: bool,
}

impl ImportEntry {
    pub fn read<R: Read>(r: &mut R, endianness: Endianness) -> io::Result<Self> {
        let class_package = NameReference::read(r, endianness)?;
        let class_name = NameReference::read(r, endianness)?;
        let outer_index = endianness.read_i32(r)?;
        let object_name = NameReference::read(r, endianness)?;
        let has_package_name = endianness.read_i32(r)? != 0;
        let package_name = if has_package_name {
            Some(NameReference::read(r, endianness)?)
        } else {
            None
        };
        let used_in_game = endianness.read_i32(r)? != 0;
        Ok(ImportEntry {
            class_package,
            class_name,
            outer_index,
            object_name,
            package_name,
            used_in_game,
        })
    }

    pub fn write<W: Write>(&self, w: &mut W, endianness: Endianness) -> io::Result<()> {
        self.class_package.write(w, endianness)?;
        self.class_name.write(w, endianness)?;
        endianness.write_i32(w, self.outer_index)?;
        self.object_name.write(w, endianness)?;
        endianness.write_i32(w, self.package_name.is_some() as i32)?;
        if let Some(package_name) = self.package_name {
            package_name.write(w, endianness)?;
        }
        endianness.write_i32(w, self.used_in_game as i32)?;
        Ok(())
    }
}

/// A reference to an object defined within this package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportEntry {
    pub class_index: i32,
    pub outer_index: i32,
    pub object_name: NameReference,
    pub serial_size: i64,
    pub serial_offset: i64,
}

impl ExportEntry {
    pub fn read<R: Read>(r: &mut R, endianness: Endianness) -> io::Result<Self> {
        Ok(ExportEntry {
            class_index: endianness.read_i32(r)?,
            outer_index: endianness.read_i32(r)?,
            object_name: NameReference::read(r, endianness)?,
            serial_size: endianness.read_u64(r)? as i64,
            serial_offset: endianness.read_u64(r)? as i64,
        })
    }

    pub fn write<W: Write>(&self, w: &mut W, endianness: Endianness) -> io::Result<()> {
        endianness.write_i32(w, self.class_index)?;
        endianness.write_i32(w, self.outer_index)?;
        self.object_name.write(w, endianness)?;
        endianness.write_u64(w, self.serial_size as u64)?;
        endianness.write_u64(w, self.serial_offset as u64)?;
        Ok(())
    }
}

/// A soft reference from this package to another package that isn't
/// necessarily loaded at runtime, plus the `used_in_game` flag the
/// asset-registry dependency reconstruction step needs alongside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftPackageReference {
    pub package_name: String,
    pub used_in_game: bool,
}

pub fn read_soft_package_reference<R: Read>(r: &mut R, endianness: Endianness) -> io::Result<SoftPackageReference> {
    let package_name = read_string(r, endianness)?;
    let used_in_game = endianness.read_i32(r)? != 0;
    Ok(SoftPackageReference {
        package_name,
        used_in_game,
    })
}

pub fn write_soft_package_reference<W: Write>(
    w: &mut W,
    endianness: Endianness,
    value: &SoftPackageReference,
) -> io::Result<()> {
    write_string(w, endianness, &value.package_name)?;
    endianness.write_i32(w, value.used_in_game as i32)?;
    Ok(())
}

/// The searchable-names map: export index to the list of names referenced
/// from inside that export's serialized data, used by the editor's find
/// functionality without loading the object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchableNamesMap {
    pub entries: BTreeMap<i32, Vec<NameReference>>,
}

impl SearchableNamesMap {
    pub fn read<R: Read>(r: &mut R, endianness: Endianness) -> io::Result<Self> {
        let map_count = endianness.read_i32(r)?;
        let mut entries = BTreeMap::new();
        for _ in 0..map_count {
            let export_index = endianness.read_i32(r)?;
            let name_count = endianness.read_i32(r)?;
            let mut names = Vec::with_capacity(name_count as usize);
            for _ in 0..name_count {
                names.push(NameReference::read(r, endianness)?);
            }
            entries.insert(export_index, names);
        }
        Ok(SearchableNamesMap { entries })
    }

    pub fn write<W: Write>(&self, w: &mut W, endianness: Endianness) -> io::Result<()> {
        endianness.write_i32(w, self.entries.len() as i32)?;
        for (export_index, names) in &self.entries {
            endianness.write_i32(w, *export_index)?;
            endianness.write_i32(w, names.len() as i32)?;
            for name in names {
                name.write(w, endianness)?;
            }
        }
        Ok(())
    }
}

/// One entry in the editor-only thumbnail cache: the object's short class
/// name, its path without the package name, the raw image bytes, and the
/// byte offset of the bitmap payload (shifted by the header-size delta
/// during Phase 3, same as an export's `serial_offset`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailEntry {
    pub class_name: String,
    pub object_path: String,
    pub file_offset: i32,
    pub data: Vec<u8>,
}

impl ThumbnailEntry {
    pub fn read<R: Read>(r: &mut R, endianness: Endianness) -> io::Result<Self> {
        let class_name = read_string(r, endianness)?;
        let object_path = read_string(r, endianness)?;
        let file_offset = endianness.read_i32(r)?;
        let len = endianness.read_i32(r)? as usize;
        let mut data = vec![0u8; len];
        r.read_exact(&mut data)?;
        Ok(ThumbnailEntry {
            class_name,
            object_path,
            file_offset,
            data,
        })
    }

    pub fn write<W: Write>(&self, w: &mut W, endianness: Endianness) -> io::Result<()> {
        write_string(w, endianness, &self.class_name)?;
        write_string(w, endianness, &self.object_path)?;
        endianness.write_i32(w, self.file_offset)?;
        endianness.write_i32(w, self.data.len() as i32)?;
        w.write_all(&self.data)?;
        Ok(())
    }
}

/// One reconstructed entry in the asset-registry dependency data: a
/// referenced package plus whether it's needed at runtime (as opposed to
/// editor-only). The patcher rebuilds this list from the import table and
/// soft-package references rather than trusting what's already on disk
/// (spec.md §4.D "Asset-registry dependencies"), taking the bitwise union
/// of `used_in_game` on key collisions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct AssetRegistryDependency {
    pub package_name: String,
    pub used_in_game: bool,
}

/// The tagged key-value dependency metadata the asset registry caches
/// outside of the loadable object graph (e.g. `"BaseMaterial" -> "/Game/M"`),
/// scanned and rewritten as plain strings rather than parsed further, plus
/// the reconstructed package dependency list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetRegistryData {
    pub tags: BTreeMap<String, String>,
    pub dependencies: Vec<AssetRegistryDependency>,
}

impl AssetRegistryData {
    pub fn read<R: Read>(r: &mut R, endianness: Endianness) -> io::Result<Self> {
        let tag_count = endianness.read_i32(r)?;
        let mut tags = BTreeMap::new();
        for _ in 0..tag_count {
            let key = read_string(r, endianness)?;
            let value = read_string(r, endianness)?;
            tags.insert(key, value);
        }

        let dep_count = endianness.read_i32(r)?;
        let mut dependencies = Vec::with_capacity(dep_count as usize);
        for _ in 0..dep_count {
            let package_name = read_string(r, endianness)?;
            let used_in_game = endianness.read_i32(r)? != 0;
            dependencies.push(AssetRegistryDependency {
                package_name,
                used_in_game,
            });
        }

        Ok(AssetRegistryData { tags, dependencies })
    }

    pub fn write<W: Write>(&self, w: &mut W, endianness: Endianness) -> io::Result<()> {
        endianness.write_i32(w, self.tags.len() as i32)?;
        for (key, value) in &self.tags {
            write_string(w, endianness, key)?;
            write_string(w, endianness, value)?;
        }

        endianness.write_i32(w, self.dependencies.len() as i32)?;
        for dep in &self.dependencies {
            write_string(w, endianness, &dep.package_name)?;
            endianness.write_i32(w, dep.used_in_game as i32)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn name_table_entry_round_trips() {
        let entry = NameTableEntry {
            value: "Foo".to_string(),
            number: 0,
        };
        let mut buf = Vec::new();
        entry.write(&mut buf, Endianness::Little).unwrap();
        let back = NameTableEntry::read(&mut Cursor::new(buf), Endianness::Little).unwrap();
        assert_eq!(entry, back);
    }

    #[test]
    fn asset_registry_data_round_trips() {
        let mut data = AssetRegistryData::default();
        data.tags.insert("Foo".to_string(), "Bar".to_string());
        data.dependencies.push(AssetRegistryDependency {
            package_name: "/Game/Dep".to_string(),
            used_in_game: true,
        });

        let mut buf = Vec::new();
        data.write(&mut buf, Endianness::Little).unwrap();
        let back = AssetRegistryData::read(&mut Cursor::new(buf), Endianness::Little).unwrap();
        assert_eq!(data, back);
    }

    #[test]
    fn soft_object_path_entry_round_trips() {
        let entry = SoftObjectPathEntry {
            package_name: NameReference { index: 0, number: 0 },
            asset_name: NameReference { index: 1, number: 0 },
            sub_path: "SubPath".to_string(),
        };
        let mut buf = Vec::new();
        entry.write(&mut buf, Endianness::Little).unwrap();
        let back = SoftObjectPathEntry::read(&mut Cursor::new(buf), Endianness::Little).unwrap();
        assert_eq!(entry, back);
    }

    #[test]
    fn import_entry_round_trips_without_optional_package_name() {
        let entry = ImportEntry {
            class_package: NameReference { index: 0, number: 0 },
            class_name: NameReference { index: 1, number: 0 },
            outer_index: 0,
            object_name: NameReference { index: 2, number: 0 },
            package_name: None,
            used_in_game: true,
        };
        let mut buf = Vec::new();
        entry.write(&mut buf, Endianness::Little).unwrap();
        let back = ImportEntry::read(&mut Cursor::new(buf), Endianness::Little).unwrap();
        assert_eq!(entry, back);
    }

    #[test]
    fn import_entry_round_trips_with_optional_package_name() {
        let entry = ImportEntry {
            class_package: NameReference { index: 0, number: 0 },
            class_name: NameReference { index: 1, number: 0 },
            outer_index: -1,
            object_name: NameReference { index: 2, number: 0 },
            package_name: Some(NameReference { index: 3, number: 0 }),
            used_in_game: false,
        };
        let mut buf = Vec::new();
        entry.write(&mut buf, Endianness::Little).unwrap();
        let back = ImportEntry::read(&mut Cursor::new(buf), Endianness::Little).unwrap();
        assert_eq!(entry, back);
    }

    #[test]
    fn thumbnail_entry_round_trips() {
        let entry = ThumbnailEntry {
            class_name: "SkeletalMesh".to_string(),
            object_path: "Pawn".to_string(),
            file_offset: 128,
            data: vec![1, 2, 3, 4],
        };
        let mut buf = Vec::new();
        entry.write(&mut buf, Endianness::Little).unwrap();
        let back = ThumbnailEntry::read(&mut Cursor::new(buf), Endianness::Little).unwrap();
        assert_eq!(entry, back);
    }

    #[test]
    fn searchable_names_map_round_trips() {
        let mut map = SearchableNamesMap::default();
        map.entries.insert(
            0,
            vec![NameReference {
                index: 1,
                number: 0,
            }],
        );
        let mut buf = Vec::new();
        map.write(&mut buf, Endianness::Big).unwrap();
        let back = SearchableNamesMap::read(&mut Cursor::new(buf), Endianness::Big).unwrap();
        assert_eq!(map, back);
    }
}
