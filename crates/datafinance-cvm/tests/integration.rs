//! Atomic extraction tests over synthetic CVM document archives.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use arrow::array::{Date32Array, Float64Array, Int64Array, StringArray};
use arrow::datatypes::DataType;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tempfile::TempDir;
use zip::write::{SimpleFileOptions, ZipWriter};

use datafinance_cvm::extract;
use datafinance_core::error::ExtractError;

fn build_zip(dir: &Path, name: &str, entries: &[(&str, &[u8])]) -> PathBuf {
    let path = dir.join(name);
    let file = File::create(&path).unwrap();
    let mut writer = ZipWriter::new(file);
    for (entry_name, content) in entries {
        writer
            .start_file(*entry_name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap();
    path
}

fn read_batches(path: &Path) -> Vec<arrow::array::RecordBatch> {
    let file = File::open(path).unwrap();
    ParquetRecordBatchReaderBuilder::try_new(file)
        .unwrap()
        .build()
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

const BALANCE_CSV: &[u8] = b"CNPJ_CIA;DT_REFER;VL_CONTA;DS_CONTA\n\
11222333000181;2023-12-31;1500.50;Receita\n\
11222333000181;2023-12-31;-320.25;Despesa\n\
99888777000155;2023-12-31;42;Caixa\n";

#[test]
fn converts_every_csv_to_parquet() {
    let dir = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let zip = build_zip(
        dir.path(),
        "dfp_cia_aberta_2023.zip",
        &[
            ("dfp_cia_aberta_BPA_2023.csv", BALANCE_CSV),
            ("dfp_cia_aberta_BPP_2023.csv", BALANCE_CSV),
        ],
    );

    let created = extract(&zip, out.path()).unwrap();
    assert_eq!(created.len(), 2);
    for path in &created {
        assert!(path.exists());
        assert!(datafinance_core::is_valid_parquet(path));
    }
    assert!(out.path().join("dfp_cia_aberta_BPA_2023.parquet").exists());
}

#[test]
fn inferred_schema_types_and_values() {
    let dir = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let zip = build_zip(
        dir.path(),
        "dfp.zip",
        &[("contas.csv", BALANCE_CSV)],
    );

    let created = extract(&zip, out.path()).unwrap();
    let batches = read_batches(&created[0]);
    let batch = &batches[0];
    assert_eq!(batch.num_rows(), 3);

    let schema = batch.schema();
    assert_eq!(
        *schema.field_with_name("CNPJ_CIA").unwrap().data_type(),
        DataType::Int64
    );
    assert_eq!(
        *schema.field_with_name("DT_REFER").unwrap().data_type(),
        DataType::Date32
    );
    assert_eq!(
        *schema.field_with_name("VL_CONTA").unwrap().data_type(),
        DataType::Float64
    );
    assert_eq!(
        *schema.field_with_name("DS_CONTA").unwrap().data_type(),
        DataType::Utf8
    );

    let values = batch
        .column_by_name("VL_CONTA")
        .unwrap()
        .as_any()
        .downcast_ref::<Float64Array>()
        .unwrap();
    assert_eq!(values.value(0), 1500.50);
    assert_eq!(values.value(1), -320.25);

    let accounts = batch
        .column_by_name("DS_CONTA")
        .unwrap()
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap();
    assert_eq!(accounts.value(0), "Receita");

    let dates = batch
        .column_by_name("DT_REFER")
        .unwrap()
        .as_any()
        .downcast_ref::<Date32Array>()
        .unwrap();
    // 2023-12-31 = 19722 days since epoch
    assert_eq!(dates.value(0), 19722);

    let cnpj = batch
        .column_by_name("CNPJ_CIA")
        .unwrap()
        .as_any()
        .downcast_ref::<Int64Array>()
        .unwrap();
    assert_eq!(cnpj.value(0), 11222333000181);
}

#[test]
fn source_column_order_preserved() {
    let dir = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let zip = build_zip(
        dir.path(),
        "dfp.zip",
        &[("contas.csv", b"ZULU;ALFA;MIKE\n1;2;3\n")],
    );

    let created = extract(&zip, out.path()).unwrap();
    let batches = read_batches(&created[0]);
    let schema = batches[0].schema();
    let names: Vec<&str> = schema
        .fields()
        .iter()
        .map(|f| f.name().as_str())
        .collect();
    assert_eq!(names, vec!["ZULU", "ALFA", "MIKE"]);
}

#[test]
fn latin1_values_survive() {
    let dir = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    // "SÃO PAULO" and "AÇÕES" in Latin-1
    let mut csv = Vec::new();
    csv.extend_from_slice(b"CIDADE;TIPO\n");
    csv.extend_from_slice(&[b'S', 0xC3, b'O', b' ', b'P', b'A', b'U', b'L', b'O', b';']);
    csv.extend_from_slice(&[b'A', 0xC7, 0xD5, b'E', b'S', b'\n']);
    let zip = build_zip(dir.path(), "fca.zip", &[("cadastro.csv", &csv)]);

    let created = extract(&zip, out.path()).unwrap();
    let batches = read_batches(&created[0]);
    let cities = batches[0]
        .column_by_name("CIDADE")
        .unwrap()
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap();
    assert_eq!(cities.value(0), "SÃO PAULO");
    let kinds = batches[0]
        .column_by_name("TIPO")
        .unwrap()
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap();
    assert_eq!(kinds.value(0), "AÇÕES");
}

#[test]
fn archive_without_csv_entries_yields_empty_list() {
    let dir = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let zip = build_zip(dir.path(), "readme.zip", &[("readme.txt", b"hello")]);

    let created = extract(&zip, out.path()).unwrap();
    assert!(created.is_empty());
}

#[test]
fn corrupt_archive_raises_corrupted_zip() {
    let dir = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let path = dir.path().join("bad.zip");
    std::fs::write(&path, b"this is not a zip file").unwrap();

    let err = extract(&path, out.path()).unwrap_err();
    assert!(matches!(err, ExtractError::CorruptedZip { .. }));
    // Nothing was written
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
}

#[test]
fn rollback_removes_all_outputs_when_one_entry_fails() {
    let dir = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    // c.csv: every data row has the wrong field count, so zero rows convert
    let zip = build_zip(
        dir.path(),
        "dfp.zip",
        &[
            ("a.csv", BALANCE_CSV),
            ("b.csv", BALANCE_CSV),
            ("c.csv", b"X;Y\n1;2;3;4\n5;6;7;8\n"),
        ],
    );

    let err = extract(&zip, out.path()).unwrap_err();
    match err {
        ExtractError::Extraction { message, .. } => {
            assert!(message.contains("c.csv"), "message: {message}");
            assert!(message.contains("rolled back"), "message: {message}");
        }
        other => panic!("unexpected error: {other}"),
    }

    // No parquet survives the rollback
    let parquets: Vec<_> = std::fs::read_dir(out.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|x| x == "parquet"))
        .collect();
    assert!(parquets.is_empty(), "leftovers: {parquets:?}");
}

#[test]
fn bad_rows_are_skipped_file_still_converts() {
    let dir = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    // Second row has a bad field count; the file still converts with 2 rows
    let csv = b"A;B\n1;x\n1;2;3\n3;y\n";
    let zip = build_zip(dir.path(), "itr.zip", &[("notas.csv", csv)]);

    let created = extract(&zip, out.path()).unwrap();
    let rows: usize = read_batches(&created[0]).iter().map(|b| b.num_rows()).sum();
    assert_eq!(rows, 2);
}

#[test]
fn headers_only_csv_converts_to_empty_parquet() {
    let dir = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let zip = build_zip(dir.path(), "fre.zip", &[("vazio.csv", b"A;B;C\n")]);

    let created = extract(&zip, out.path()).unwrap();
    assert_eq!(created.len(), 1);
    let file = File::open(&created[0]).unwrap();
    let builder = ParquetRecordBatchReaderBuilder::try_new(file).unwrap();
    assert_eq!(builder.metadata().file_metadata().num_rows(), 0);
    assert_eq!(builder.schema().fields().len(), 3);
}

#[test]
fn no_tmp_files_left_after_success_or_failure() {
    let dir = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();

    let good = build_zip(dir.path(), "good.zip", &[("a.csv", BALANCE_CSV)]);
    extract(&good, out.path()).unwrap();

    let bad = build_zip(
        dir.path(),
        "bad.zip",
        &[("z.csv", b"X;Y\n1;2;3\n" as &[u8])],
    );
    let _ = extract(&bad, out.path());

    let tmp_files: Vec<_> = std::fs::read_dir(out.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|x| x == "tmp"))
        .collect();
    assert!(tmp_files.is_empty(), "leftovers: {tmp_files:?}");
}
