//! Plaintext datasets: one value per line

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use rand::Rng;

/// Non-empty trimmed lines of a file, in order
pub fn read_dataset(path: &Path) -> io::Result<Vec<String>> {
    let reader = BufReader::new(File::open(path)?);
    let mut values = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let value = line.trim();
        if !value.is_empty() {
            values.push(value.to_string());
        }
    }
    Ok(values)
}

/// Random decimal strings of a fixed length
pub fn random_values<R: Rng + ?Sized>(rng: &mut R, count: usize, length: usize) -> Vec<String> {
    (0..count)
        .map(|_| {
            (0..length)
                .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
                .collect()
        })
        .collect()
}

pub fn write_dataset(path: &Path, count: usize, length: usize) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for value in random_values(&mut rand::thread_rng(), count, length) {
        writeln!(out, "{value}")?;
    }
    out.flush()?;
    tracing::info!(path = %path.display(), count, length, "Wrote dataset");
    Ok(())
}
