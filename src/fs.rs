use std::fs::File;
use std::io::Write;

/// Append-only byte sink the table builder writes through. The builder
/// borrows the sink for its whole lifetime and observes writes as an
/// in-order byte stream; buffering and durability are the sink's business.
pub trait WritableFile {
    fn append(&mut self, data: &[u8]) -> anyhow::Result<()>;
    fn flush(&mut self) -> anyhow::Result<()>;
}

impl WritableFile for File {
    fn append(&mut self, data: &[u8]) -> anyhow::Result<()> {
        self.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        Write::flush(self)?;
        Ok(())
    }
}

/// In-memory sink, mostly for tests and format checks.
impl WritableFile for Vec<u8> {
    fn append(&mut self, data: &[u8]) -> anyhow::Result<()> {
        self.extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_sink() {
        let mut sink: Vec<u8> = Vec::new();
        WritableFile::append(&mut sink, b"abc").unwrap();
        WritableFile::append(&mut sink, b"def").unwrap();
        WritableFile::flush(&mut sink).unwrap();
        assert_eq!(sink, b"abcdef");
    }
}
