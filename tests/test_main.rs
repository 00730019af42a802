use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom};

use marmot::kv::{ParsedInternalKey, ValueType};
use marmot::memtable::MemTable;
use marmot::options::{CompressionType, Options};
use marmot::table::write::TableBuilder;
use marmot::table::TABLE_MAGIC_NUMBER;
use marmot::write::WriteBatch;

#[test]
fn test_build_table_on_disk() -> anyhow::Result<()> {
    let tmp_dir = tempfile::tempdir()?;
    let path = tmp_dir.path().join("000001.sst");
    let mut file = OpenOptions::new()
        .create_new(true)
        .read(true)
        .write(true)
        .open(&path)?;

    let options = Options::default();
    let mut builder = TableBuilder::new(options, &mut file, 0);
    for i in 0..1000u32 {
        let key = format!("key{:08}", i);
        let value = format!("value{}", i);
        builder.add(key.as_bytes(), value.as_bytes())?;
    }
    builder.finish()?;
    let file_size = builder.file_size();
    drop(builder);

    assert_eq!(file.metadata()?.len(), file_size);
    file.seek(SeekFrom::End(-8))?;
    let mut magic = [0u8; 8];
    file.read_exact(&mut magic)?;
    assert_eq!(u64::from_le_bytes(magic), TABLE_MAGIC_NUMBER);
    Ok(())
}

#[test]
fn test_batch_to_memtable_to_table() -> anyhow::Result<()> {
    let mut batch = WriteBatch::new();
    batch.put(b"apple", b"red");
    batch.put(b"banana", b"yellow");
    batch.delete(b"apple");
    batch.merge(b"cherry", b"dark");
    batch.set_sequence(42);

    let mut mem = MemTable::new();
    batch.insert_into(&mut mem)?;
    assert_eq!(mem.len(), 4);

    // newest version of "apple" first: the tombstone at sequence 44
    let (first_key, _) = mem.iter().next().unwrap();
    let encoded = first_key.encode();
    let parsed = ParsedInternalKey::parse(&encoded).unwrap();
    assert_eq!(parsed.user_key, b"apple");
    assert_eq!(parsed.sequence, 44);
    assert_eq!(parsed.value_type, ValueType::Deletion);

    // flush the memtable the way the store would
    let options = Options {
        compression: CompressionType::None,
        ..Default::default()
    };
    let mut sink: Vec<u8> = Vec::new();
    let file_size = TableBuilder::build_from_memtable(&mem, options, &mut sink, 0)?;
    assert_eq!(file_size, sink.len() as u64);
    assert_eq!(
        u64::from_le_bytes(sink[sink.len() - 8..].try_into().unwrap()),
        TABLE_MAGIC_NUMBER
    );
    Ok(())
}
