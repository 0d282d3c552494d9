//! MatrixMarket coordinate and array readers, restricted to a row range.
//!
//! Coordinate entries are streamed once; only the triples whose row falls in
//! the requested range are kept, so the memory cost is proportional to the
//! chunk, not the file. `symmetric` inputs are expanded to full storage at
//! read time so downstream code sees a single CRS shape.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Symmetry {
    General,
    Symmetric,
}

/// Header of a MatrixMarket coordinate file; opening parses the banner and
/// size line only.
pub struct MmReader {
    path: String,
    rows: usize,
    cols: usize,
    nnz: usize,
    symmetry: Symmetry,
}

impl MmReader {
    pub fn open(path: &Path) -> Result<Self> {
        let name = path.display().to_string();
        let mut lines = BufReader::new(File::open(path)?).lines();

        let banner = lines
            .next()
            .ok_or_else(|| Error::parse(&name, "empty file"))??;
        let tokens: Vec<&str> = banner.split_whitespace().collect();
        if tokens.len() < 5 || !tokens[0].eq_ignore_ascii_case("%%MatrixMarket") {
            return Err(Error::parse(&name, "missing MatrixMarket banner"));
        }
        if !tokens[2].eq_ignore_ascii_case("coordinate") {
            return Err(Error::parse(&name, "expected a coordinate (sparse) matrix"));
        }
        if !tokens[3].eq_ignore_ascii_case("real") {
            return Err(Error::parse(&name, format!("unsupported field type `{}`", tokens[3])));
        }
        let symmetry = if tokens[4].eq_ignore_ascii_case("general") {
            Symmetry::General
        } else if tokens[4].eq_ignore_ascii_case("symmetric") {
            Symmetry::Symmetric
        } else {
            return Err(Error::parse(&name, format!("unsupported symmetry `{}`", tokens[4])));
        };

        let size = first_data_line(&mut lines, &name)?;
        let dims: Vec<usize> = parse_fields(&size, &name)?;
        if dims.len() != 3 {
            return Err(Error::parse(&name, "size line must be `rows cols nnz`"));
        }

        Ok(MmReader { path: name, rows: dims[0], cols: dims[1], nnz: dims[2], symmetry })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Read the CRS arrays for rows `[row_beg, row_end)`, columns kept global.
    pub fn read(&self, row_beg: usize, row_end: usize) -> Result<(Vec<usize>, Vec<usize>, Vec<f64>)> {
        let n = row_end - row_beg;
        let in_range = |r: usize| row_beg <= r && r < row_end;

        let mut triples: Vec<(usize, usize, f64)> = Vec::new();
        let mut seen = 0usize;
        let mut size_line_skipped = false;
        for line in BufReader::new(File::open(&self.path)?).lines() {
            let line = line?;
            let text = line.trim();
            if text.is_empty() || text.starts_with('%') {
                continue;
            }
            if !size_line_skipped {
                size_line_skipped = true;
                continue;
            }
            seen += 1;
            let mut it = text.split_whitespace();
            let (i, j, v) = match (it.next(), it.next(), it.next()) {
                (Some(i), Some(j), Some(v)) => {
                    let i: usize = i
                        .parse()
                        .map_err(|_| Error::parse(&self.path, format!("bad row index `{i}`")))?;
                    let j: usize = j
                        .parse()
                        .map_err(|_| Error::parse(&self.path, format!("bad column index `{j}`")))?;
                    let v: f64 = v
                        .parse()
                        .map_err(|_| Error::parse(&self.path, format!("bad value `{v}`")))?;
                    (i, j, v)
                }
                _ => return Err(Error::parse(&self.path, "entry line must be `i j value`")),
            };
            if i == 0 || j == 0 || i > self.rows || j > self.cols {
                return Err(Error::parse(
                    &self.path,
                    format!("entry ({i}, {j}) out of bounds for {}x{}", self.rows, self.cols),
                ));
            }
            let (i, j) = (i - 1, j - 1);
            if in_range(i) {
                triples.push((i, j, v));
            }
            if self.symmetry == Symmetry::Symmetric && i != j && in_range(j) {
                triples.push((j, i, v));
            }
        }
        if seen != self.nnz {
            return Err(Error::parse(
                &self.path,
                format!("header promises {} entries, file holds {seen}", self.nnz),
            ));
        }

        triples.sort_by_key(|&(i, j, _)| (i, j));

        let mut ptr = Vec::with_capacity(n + 1);
        let mut col = Vec::with_capacity(triples.len());
        let mut val = Vec::with_capacity(triples.len());
        ptr.push(0);
        let mut row = 0;
        for (i, j, v) in triples {
            while row < i - row_beg {
                ptr.push(col.len());
                row += 1;
            }
            col.push(j);
            val.push(v);
        }
        while row < n {
            ptr.push(col.len());
            row += 1;
        }
        Ok((ptr, col, val))
    }
}

/// Read the segment `[row_beg, row_end)` of a dense MatrixMarket array file
/// holding a single column (a right-hand side).
pub fn read_vector(path: &Path, row_beg: usize, row_end: usize) -> Result<Vec<f64>> {
    let name = path.display().to_string();
    let mut lines = BufReader::new(File::open(path)?).lines();

    let banner = lines.next().ok_or_else(|| Error::parse(&name, "empty file"))??;
    let tokens: Vec<&str> = banner.split_whitespace().collect();
    if tokens.len() < 5 || !tokens[0].eq_ignore_ascii_case("%%MatrixMarket") {
        return Err(Error::parse(&name, "missing MatrixMarket banner"));
    }
    if !tokens[2].eq_ignore_ascii_case("array") || !tokens[3].eq_ignore_ascii_case("real") {
        return Err(Error::parse(&name, "expected a dense real array"));
    }

    let size = first_data_line(&mut lines, &name)?;
    let dims: Vec<usize> = parse_fields(&size, &name)?;
    if dims.len() != 2 || dims[1] != 1 {
        return Err(Error::parse(&name, "right-hand side must be a single column"));
    }
    if row_end > dims[0] {
        return Err(Error::parse(
            &name,
            format!("requested rows [{row_beg}, {row_end}) exceed vector length {}", dims[0]),
        ));
    }

    let mut out = Vec::with_capacity(row_end - row_beg);
    let mut idx = 0usize;
    for line in lines {
        let line = line?;
        let text = line.trim();
        if text.is_empty() || text.starts_with('%') {
            continue;
        }
        if row_beg <= idx && idx < row_end {
            out.push(
                text.parse()
                    .map_err(|_| Error::parse(&name, format!("bad value `{text}`")))?,
            );
        }
        idx += 1;
        if idx >= row_end {
            break;
        }
    }
    if out.len() != row_end - row_beg {
        return Err(Error::parse(&name, "file ended before the requested range"));
    }
    Ok(out)
}

/// Write a full matrix chunk as a general coordinate file; used by tests and
/// the conversion path.
pub fn write_matrix(path: &Path, cols: usize, ptr: &[usize], col: &[usize], val: &[f64]) -> Result<()> {
    use std::io::Write;
    let rows = ptr.len() - 1;
    let mut out = std::io::BufWriter::new(File::create(path)?);
    writeln!(out, "%%MatrixMarket matrix coordinate real general")?;
    writeln!(out, "{} {} {}", rows, cols, col.len())?;
    for i in 0..rows {
        for k in ptr[i]..ptr[i + 1] {
            writeln!(out, "{} {} {:.17e}", i + 1, col[k] + 1, val[k])?;
        }
    }
    Ok(())
}

fn first_data_line(
    lines: &mut std::io::Lines<BufReader<File>>,
    name: &str,
) -> Result<String> {
    for line in lines {
        let line = line?;
        let text = line.trim();
        if text.is_empty() || text.starts_with('%') {
            continue;
        }
        return Ok(text.to_string());
    }
    Err(Error::parse(name, "missing size line"))
}

fn parse_fields(line: &str, name: &str) -> Result<Vec<usize>> {
    line.split_whitespace()
        .map(|t| t.parse().map_err(|_| Error::parse(name, format!("bad size field `{t}`"))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("parmg-mm-{}-{name}", std::process::id()))
    }

    #[test]
    fn reads_general_coordinate_restricted() {
        // [[4, -1, 0], [-1, 4, -1], [0, -1, 4]]
        let path = tmp("general.mtx");
        write_matrix(
            &path,
            3,
            &[0, 2, 5, 7],
            &[0, 1, 0, 1, 2, 1, 2],
            &[4.0, -1.0, -1.0, 4.0, -1.0, -1.0, 4.0],
        )
        .unwrap();

        let rd = MmReader::open(&path).unwrap();
        assert_eq!((rd.rows(), rd.cols()), (3, 3));

        let (ptr, col, val) = rd.read(1, 3).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(ptr, vec![0, 3, 5]);
        assert_eq!(col, vec![0, 1, 2, 1, 2]);
        assert_eq!(val, vec![-1.0, 4.0, -1.0, -1.0, 4.0]);
    }

    #[test]
    fn symmetric_inputs_are_expanded() {
        let path = tmp("sym.mtx");
        std::fs::write(
            &path,
            "%%MatrixMarket matrix coordinate real symmetric\n\
             2 2 3\n\
             1 1 2.0\n\
             2 1 -1.0\n\
             2 2 2.0\n",
        )
        .unwrap();
        let rd = MmReader::open(&path).unwrap();
        let (ptr, col, val) = rd.read(0, 2).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(ptr, vec![0, 2, 4]);
        assert_eq!(col, vec![0, 1, 0, 1]);
        assert_eq!(val, vec![2.0, -1.0, -1.0, 2.0]);
    }

    #[test]
    fn vector_reads_restricted_segment() {
        let path = tmp("rhs.mtx");
        std::fs::write(
            &path,
            "%%MatrixMarket matrix array real general\n4 1\n1.0\n2.0\n3.0\n4.0\n",
        )
        .unwrap();
        let seg = read_vector(&path, 1, 3).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(seg, vec![2.0, 3.0]);
    }

    #[test]
    fn out_of_bounds_entry_is_a_parse_error() {
        let path = tmp("bad.mtx");
        std::fs::write(
            &path,
            "%%MatrixMarket matrix coordinate real general\n2 2 1\n3 1 1.0\n",
        )
        .unwrap();
        let rd = MmReader::open(&path).unwrap();
        let err = rd.read(0, 2).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, Error::Parse { .. }));
    }
}
