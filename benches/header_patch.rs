use std::io::Write as _;

use asset_header_patcher::header::summary::{Endianness, Summary};
use asset_header_patcher::header::tables::{ExportEntry, ImportEntry, NameReference, NameTableEntry};
use asset_header_patcher::{do_patch, Context, PackageMove, QualifiedName, RedirectDatabase};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use tempfile::NamedTempFile;

/// Builds a minimal but structurally valid package file with `num_imports`
/// external imports and `num_exports` exports, all under `package_name`.
fn generate_asset(package_name: &str, num_imports: usize, num_exports: usize) -> Vec<u8> {
    let endianness = Endianness::Little;

    let mut names = vec![
        NameTableEntry { value: package_name.to_string(), number: 0 },
        NameTableEntry { value: "/Script/Engine".to_string(), number: 0 },
        NameTableEntry { value: "Class".to_string(), number: 0 },
    ];
    let mut imports = Vec::new();
    for i in 0..num_imports {
        names.push(NameTableEntry { value: format!("Import{i}"), number: 0 });
        imports.push(ImportEntry {
            class_package: NameReference { index: 1, number: 0 },
            class_name: NameReference { index: 2, number: 0 },
            outer_index: 0,
            object_name: NameReference { index: (3 + i) as i32, number: 0 },
            package_name: None,
            used_in_game: false,
        });
    }

    let mut exports = Vec::new();
    for i in 0..num_exports {
        names.push(NameTableEntry { value: format!("Export{i}"), number: 0 });
        exports.push(ExportEntry {
            class_index: 0,
            outer_index: 0,
            object_name: NameReference { index: (3 + num_imports + i) as i32, number: 0 },
            serial_size: 4,
            serial_offset: 0,
        });
    }

    let mut summary = Summary {
        endianness,
        file_version: 522,
        package_flags: 0,
        package_name: package_name.to_string(),
        total_header_size: 0,
        name_count: names.len() as i32,
        name_offset: 0,
        soft_object_path_count: 0,
        soft_object_path_offset: 0,
        gatherable_text_count: 0,
        gatherable_text_offset: 0,
        import_count: imports.len() as i32,
        import_offset: 0,
        export_count: exports.len() as i32,
        export_offset: 0,
        soft_package_reference_count: 0,
        soft_package_reference_offset: 0,
        searchable_names_offset: 0,
        thumbnail_table_offset: 0,
        asset_registry_data_offset: 0,
        bulk_data_start_offset: 0,
    };

    let mut name_bytes = Vec::new();
    for n in &names {
        n.write(&mut name_bytes, endianness).unwrap();
    }
    let mut import_bytes = Vec::new();
    for i in &imports {
        i.write(&mut import_bytes, endianness).unwrap();
    }
    let mut export_bytes = Vec::new();
    for e in &exports {
        e.write(&mut export_bytes, endianness).unwrap();
    }

    let mut probe = Vec::new();
    summary.write(&mut probe).unwrap();
    let summary_len = probe.len() as i32;

    summary.name_offset = summary_len;
    summary.import_offset = summary.name_offset + name_bytes.len() as i32;
    summary.export_offset = summary.import_offset + import_bytes.len() as i32;
    summary.total_header_size = summary.export_offset + export_bytes.len() as i32;

    let mut out = Vec::new();
    summary.write(&mut out).unwrap();
    out.extend_from_slice(&name_bytes);
    out.extend_from_slice(&import_bytes);
    out.extend_from_slice(&export_bytes);
    out.extend_from_slice(&[0xAAu8; 64]);
    out
}

fn write_temp_asset(bytes: &[u8]) -> NamedTempFile {
    let mut f = NamedTempFile::new().unwrap();
    f.write_all(bytes).unwrap();
    f
}

fn bench_patch_package_rename(c: &mut Criterion) {
    let mut group = c.benchmark_group("do_patch (package rename)");

    for &(imports, exports) in &[(4usize, 4usize), (64, 64), (512, 512)] {
        let label = format!("{imports} imports / {exports} exports");
        group.bench_function(label, |b| {
            b.iter_batched(
                || {
                    let bytes = generate_asset("/Game/Old", imports, exports);
                    let src = write_temp_asset(&bytes);
                    let dst = NamedTempFile::new().unwrap();

                    let ctx = Context::from_moves(&[PackageMove {
                        old_package: QualifiedName::parse("/Game/Old").unwrap(),
                        new_package: QualifiedName::parse("/Game/New").unwrap(),
                        old_file: src.path().to_path_buf(),
                        new_file: dst.path().to_path_buf(),
                    }]);
                    let db = RedirectDatabase::new();
                    ctx.apply_to(&db);

                    (src, dst, ctx, db)
                },
                |(src, dst, ctx, db)| do_patch(src.path(), dst.path(), &ctx, &db).unwrap(),
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(20);
    targets = bench_patch_package_rename
}

criterion_main!(benches);
