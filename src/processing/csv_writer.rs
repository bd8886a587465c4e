use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// A named column of values.
pub type Column<'a> = (&'a str, &'a [f64]);

/// Write `columns` side by side under a header row.
///
/// Shorter columns are padded with empty cells, as are non-finite values.
pub fn write_columns<P: AsRef<Path>>(path: P, columns: &[Column<'_>]) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    let header: Vec<&str> = columns.iter().map(|(name, _)| *name).collect();
    writeln!(out, "{}", header.join(","))?;

    let rows = columns.iter().map(|(_, v)| v.len()).max().unwrap_or(0);
    let mut line = String::new();
    for i in 0..rows {
        line.clear();
        for (j, (_, values)) in columns.iter().enumerate() {
            if j > 0 {
                line.push(',');
            }
            if let Some(v) = values.get(i).filter(|v| v.is_finite()) {
                line.push_str(&format!("{v:.15e}"));
            }
        }
        writeln!(out, "{line}")?;
    }
    out.flush()
}

/// Write columns whose lengths must all agree.
pub fn write_table<P: AsRef<Path>>(path: P, columns: &[Column<'_>]) -> io::Result<()> {
    if let Some((first, rest)) = columns.split_first() {
        if let Some((name, values)) = rest.iter().find(|(_, v)| v.len() != first.1.len()) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "column `{name}` has {} rows, `{}` has {}",
                    values.len(),
                    first.0,
                    first.1.len()
                ),
            ));
        }
    }
    write_columns(path, columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn short_columns_and_nan_become_empty_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.csv");
        let depth = [-0.5e-3, 0.0, 0.5e-3];
        let oxy = [0.25, f64::NAN];

        write_columns(&path, &[("depth", &depth[..]), ("env.oxy", &oxy[..])]).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "depth,env.oxy");
        assert_eq!(lines.len(), 4);
        assert!(lines[2].ends_with(','));
        assert!(lines[3].ends_with(','));
    }

    #[test]
    fn ragged_tables_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let time = [1.0];
        let columns = [("time", &time[..]), ("dt", &[][..])];
        let err = write_table(dir.path().join("steps.csv"), &columns).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
