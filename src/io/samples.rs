//! Sample rows and dataset manifests.
//!
//! A sample file holds one point per line, coordinates separated by runs of
//! whitespace, no header. Blank lines and lines starting with `#` are
//! ignored. Rows with the wrong number of values or a non-numeric value are
//! skipped and reported in [`SampleFile::rejected`]; they never abort the read.
//!
//! Numeric tokens are deliberately narrow: an optional sign, digits and at
//! most one decimal point. Exponent notation (`1e-3`), `inf` and `nan` are
//! rejected so that files stay readable by tools that share this format.
//!
//! A manifest lists the sample file of every class:
//!
//! ```text
//! 2                 # number of classes
//! 2                 # dimension
//! grass.txt Grass   # <path relative to the manifest> [title]
//! water.txt Water
//! ```

use super::{read_text, write_atomic};
use crate::error::{Error, Result};
use crate::point::{Point, SampleCollection};
use std::fmt::Write as _;
use std::path::Path;

/// Drop empty and whitespace-only tokens, trimming the rest.
///
/// Splitting on single separator characters leaves empty tokens between runs
/// of separators; this removes them. Applying it twice gives the same result.
pub fn trim_invalid_tokens<'a, I>(tokens: I) -> Vec<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    tokens
        .into_iter()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect()
}

/// True for `[+-]?digits` with at most one `.` and at least one digit.
pub fn is_numeric_token(token: &str) -> bool {
    let body = token
        .strip_prefix('+')
        .or_else(|| token.strip_prefix('-'))
        .unwrap_or(token);
    let mut digits = 0usize;
    let mut dots = 0usize;
    for ch in body.chars() {
        match ch {
            '0'..='9' => digits += 1,
            '.' => dots += 1,
            _ => return false,
        }
    }
    digits > 0 && dots <= 1
}

/// Parse a validated numeric token; `line` is used for error reporting.
pub fn parse_number(token: &str, line: usize) -> Result<f64> {
    if !is_numeric_token(token) {
        return Err(Error::format(line, format!("'{token}' is not a number")));
    }
    token
        .parse::<f64>()
        .map_err(|e| Error::format(line, format!("'{token}': {e}")))
}

/// Parse one sample row of exactly `dimension` values.
pub fn parse_row(line: &str, line_no: usize, dimension: usize) -> Result<Point> {
    let tokens = trim_invalid_tokens(line.split(|c: char| c == ' ' || c == '\t'));
    if tokens.len() != dimension {
        return Err(Error::format(
            line_no,
            format!("expected {dimension} values, found {}", tokens.len()),
        ));
    }
    let coords = tokens
        .iter()
        .map(|t| parse_number(t, line_no))
        .collect::<Result<Vec<f64>>>()?;
    Ok(Point::new(coords))
}

/// A row that was skipped while reading a sample file.
#[derive(Debug)]
pub struct RejectedRow {
    /// 1-based line number.
    pub line: usize,
    /// Why it was rejected.
    pub error: Error,
}

/// Points read from one sample file.
#[derive(Debug)]
pub struct SampleFile {
    /// Point dimension (given or inferred from the first valid row).
    pub dimension: usize,
    /// Valid points in file order.
    pub points: Vec<Point>,
    /// Rows skipped as malformed.
    pub rejected: Vec<RejectedRow>,
}

impl SampleFile {
    /// One-class collection holding the points.
    pub fn into_collection(self, title: impl Into<String>) -> Result<SampleCollection> {
        let mut out = SampleCollection::new(self.dimension);
        out.push_class(title, self.points)?;
        Ok(out)
    }
}

fn is_skippable(line: &str) -> bool {
    let t = line.trim();
    t.is_empty() || t.starts_with('#')
}

/// Parse sample rows from text.
///
/// With `dimension == None` the first valid row fixes the dimension; if no
/// row is valid the result is [`Error::EmptyInput`].
pub fn parse_samples(text: &str, dimension: Option<usize>) -> Result<SampleFile> {
    let mut dimension = dimension;
    let mut points = Vec::new();
    let mut rejected = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        if is_skippable(line) {
            continue;
        }
        let dim = match dimension {
            Some(d) => d,
            None => {
                let tokens = trim_invalid_tokens(line.split(|c: char| c == ' ' || c == '\t'));
                if tokens.iter().all(|t| is_numeric_token(t)) {
                    dimension = Some(tokens.len());
                    tokens.len()
                } else {
                    rejected.push(RejectedRow {
                        line: line_no,
                        error: Error::format(line_no, "non-numeric token"),
                    });
                    continue;
                }
            }
        };
        match parse_row(line, line_no, dim) {
            Ok(p) => points.push(p),
            Err(error) => {
                tracing::warn!(line = line_no, %error, "skipping malformed sample row");
                rejected.push(RejectedRow {
                    line: line_no,
                    error,
                });
            }
        }
    }

    let dimension = dimension.ok_or(Error::EmptyInput)?;
    Ok(SampleFile {
        dimension,
        points,
        rejected,
    })
}

/// Read a sample file.
pub fn read_samples(path: impl AsRef<Path>, dimension: Option<usize>) -> Result<SampleFile> {
    let path = path.as_ref();
    let text = read_text(path)?;
    let file = parse_samples(&text, dimension)?;
    tracing::debug!(
        path = %path.display(),
        points = file.points.len(),
        rejected = file.rejected.len(),
        "read samples"
    );
    Ok(file)
}

/// Write points one per line.
pub fn write_samples(path: impl AsRef<Path>, points: &[Point]) -> Result<()> {
    let mut out = String::new();
    for p in points {
        if p.as_slice().iter().any(|v| !v.is_finite()) {
            return Err(Error::format(0, "non-finite coordinate cannot be written"));
        }
        let row: Vec<String> = p.as_slice().iter().map(|v| v.to_string()).collect();
        let _ = writeln!(out, "{}", row.join(" "));
    }
    write_atomic(path.as_ref(), &out)
}

/// Read a dataset manifest and every class sample file it lists.
pub fn read_manifest(path: impl AsRef<Path>) -> Result<SampleCollection> {
    let path = path.as_ref();
    let text = read_text(path)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));

    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, strip_comment(l)))
        .filter(|(_, l)| !l.is_empty());

    let n_classes = header_count(lines.next(), "number of classes")?;
    let dimension = header_count(lines.next(), "dimension")?;
    if dimension == 0 {
        return Err(Error::format(2, "dimension must be > 0"));
    }

    let mut collection = SampleCollection::new(dimension);
    for (line_no, line) in lines.by_ref().take(n_classes) {
        let mut parts = line.splitn(2, char::is_whitespace);
        let file = parts.next().unwrap_or_default();
        let title = parts.next().map(str::trim).unwrap_or_default();
        let samples = read_samples(base.join(file), Some(dimension))?;
        if samples.points.is_empty() {
            tracing::warn!(line = line_no, file, "class sample file has no valid rows");
        }
        let title = if title.is_empty() { file } else { title };
        collection.push_class(title, samples.points)?;
    }
    if collection.n_classes() != n_classes {
        return Err(Error::format(
            0,
            format!(
                "manifest declares {n_classes} classes, lists {}",
                collection.n_classes()
            ),
        ));
    }
    Ok(collection)
}

fn strip_comment(line: &str) -> &str {
    line.split('#').next().unwrap_or_default().trim()
}

fn header_count(entry: Option<(usize, &str)>, what: &str) -> Result<usize> {
    let (line_no, line) = entry.ok_or_else(|| Error::format(0, format!("missing {what}")))?;
    line.parse::<usize>()
        .map_err(|_| Error::format(line_no, format!("invalid {what} '{line}'")))
}
