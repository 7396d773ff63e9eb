//! Parameter files: text serialisation of a [`SignatureSet`].
//!
//! ```text
//! title: <free text>
//! dimension: <d>
//! class:
//!  classnum: <index>
//!  title: <free text>
//!  npoints: <integer>
//!  structure: full|diagonal|spherical
//!  subclass:
//!   pi: <weight>
//!   npoints: <expected count>
//!   means: <d values>
//!   covar:
//!    <d rows of d values | one row of d values | one value>
//!  endsubclass:
//! endclass:
//! ```
//!
//! Indentation is cosmetic. Values are written with `f64`'s shortest
//! round-trip `Display`, which never uses exponent notation, so reading a
//! written file gives back bit-identical numbers.

use super::samples::{parse_number, trim_invalid_tokens};
use super::{read_text, write_atomic};
use crate::error::{Error, Result};
use crate::signature::{
    Covariance, CovarianceStructure, GaussianComponent, Signature, SignatureSet,
};
use ndarray::{Array1, Array2};
use std::fmt::Write as _;
use std::path::Path;

/// Render `set` in parameter-file format.
///
/// The set must pass [`SignatureSet::validate`], so anything written here
/// reads back.
pub fn format_signature_set(set: &SignatureSet) -> Result<String> {
    let mut out = String::new();
    let _ = writeln!(out, "title: {}", one_line(&set.title));
    let _ = writeln!(out, "dimension: {}", set.dimension());
    for (k, sig) in set.classes().iter().enumerate() {
        let _ = writeln!(out, "class:");
        let _ = writeln!(out, " classnum: {k}");
        let _ = writeln!(out, " title: {}", one_line(&sig.title));
        let _ = writeln!(out, " npoints: {}", sig.count);
        let _ = writeln!(out, " structure: {}", sig.structure);
        for c in &sig.components {
            if c.covariance.structure() != sig.structure {
                return Err(Error::InvalidParameter {
                    name: "structure",
                    message: format!(
                        "class {k}: component stored as {} in a {} signature",
                        c.covariance.structure(),
                        sig.structure
                    ),
                });
            }
            let _ = writeln!(out, " subclass:");
            let _ = writeln!(out, "  pi: {}", number(c.weight)?);
            let _ = writeln!(out, "  npoints: {}", number(c.count)?);
            let _ = writeln!(out, "  means: {}", row(c.mean.iter())?);
            let _ = writeln!(out, "  covar:");
            match &c.covariance {
                Covariance::Full(m) => {
                    for r in m.rows() {
                        let _ = writeln!(out, "   {}", row(r.iter())?);
                    }
                }
                Covariance::Diagonal(v) => {
                    let _ = writeln!(out, "   {}", row(v.iter())?);
                }
                Covariance::Spherical(s) => {
                    let _ = writeln!(out, "   {}", number(*s)?);
                }
            }
            let _ = writeln!(out, " endsubclass:");
        }
        let _ = writeln!(out, "endclass:");
    }
    set.validate()?;
    Ok(out)
}

/// Write `set` to `path`; the file is replaced only once fully written.
pub fn write_signature_set(path: impl AsRef<Path>, set: &SignatureSet) -> Result<()> {
    let text = format_signature_set(set)?;
    write_atomic(path.as_ref(), &text)?;
    tracing::debug!(path = %path.as_ref().display(), classes = set.len(), "wrote signature set");
    Ok(())
}

/// Read a parameter file.
pub fn read_signature_set(path: impl AsRef<Path>) -> Result<SignatureSet> {
    let text = read_text(path.as_ref())?;
    parse_signature_set(&text)
}

/// Parse parameter-file text.
pub fn parse_signature_set(text: &str) -> Result<SignatureSet> {
    let mut cur = Cursor::new(text);
    let (_, title) = cur.text_field("title")?;
    let (line, dim) = cur.field("dimension")?;
    let dimension = parse_count(dim, line)?;
    if dimension == 0 {
        return Err(Error::format(line, "dimension must be > 0"));
    }

    let mut set = SignatureSet::new(title, dimension);
    while !cur.at_end() {
        let (line, _) = cur.field("class")?;
        let sig = parse_class(&mut cur, dimension, set.len(), line)?;
        set.push(sig)?;
    }
    set.validate()?;
    Ok(set)
}

fn parse_class(cur: &mut Cursor<'_>, d: usize, expected: usize, start: usize) -> Result<Signature> {
    let (line, num) = cur.field("classnum")?;
    let classnum = parse_count(num, line)?;
    if classnum != expected {
        return Err(Error::format(
            line,
            format!("classnum {classnum} out of order, expected {expected}"),
        ));
    }
    let (_, title) = cur.text_field("title")?;
    let (line, npoints) = cur.field("npoints")?;
    let count = parse_count(npoints, line)?;
    let (line, structure) = cur.field("structure")?;
    let structure: CovarianceStructure = structure
        .parse()
        .map_err(|_| Error::format(line, format!("unknown structure '{structure}'")))?;

    let mut sig = Signature::new(title, structure);
    sig.count = count;
    loop {
        match cur.peek_key() {
            Some("subclass") => {
                cur.field("subclass")?;
                sig.components.push(parse_subclass(cur, d, structure)?);
            }
            Some("endclass") => {
                cur.field("endclass")?;
                break;
            }
            Some(other) => {
                return Err(Error::format(
                    cur.line(),
                    format!("expected 'subclass:' or 'endclass:', found '{other}'"),
                ))
            }
            None => return Err(Error::format(start, "class block is not terminated")),
        }
    }
    Ok(sig)
}

fn parse_subclass(
    cur: &mut Cursor<'_>,
    d: usize,
    structure: CovarianceStructure,
) -> Result<GaussianComponent> {
    let (line, pi) = cur.field("pi")?;
    let weight = parse_number(pi, line)?;
    let (line, npoints) = cur.field("npoints")?;
    let count = parse_number(npoints, line)?;
    let (line, means) = cur.field("means")?;
    let mean = Array1::from(parse_values(means, line, d)?);
    cur.field("covar")?;
    let covariance = match structure {
        CovarianceStructure::Full => {
            let mut m = Array2::zeros((d, d));
            for i in 0..d {
                let (line, text) = cur.values_line()?;
                for (j, v) in parse_values(text, line, d)?.into_iter().enumerate() {
                    m[[i, j]] = v;
                }
            }
            Covariance::Full(m)
        }
        CovarianceStructure::Diagonal => {
            let (line, text) = cur.values_line()?;
            Covariance::Diagonal(Array1::from(parse_values(text, line, d)?))
        }
        CovarianceStructure::Spherical => {
            let (line, text) = cur.values_line()?;
            Covariance::Spherical(parse_values(text, line, 1)?[0])
        }
    };
    cur.field("endsubclass")?;
    Ok(GaussianComponent::new(weight, count, mean, covariance))
}

fn parse_values(text: &str, line: usize, n: usize) -> Result<Vec<f64>> {
    let tokens = trim_invalid_tokens(text.split(|c: char| c == ' ' || c == '\t'));
    if tokens.len() != n {
        return Err(Error::format(
            line,
            format!("expected {n} values, found {}", tokens.len()),
        ));
    }
    tokens.iter().map(|t| parse_number(t, line)).collect()
}

fn parse_count(text: &str, line: usize) -> Result<usize> {
    text.parse::<usize>()
        .map_err(|_| Error::format(line, format!("'{text}' is not a non-negative integer")))
}

fn number(v: f64) -> Result<String> {
    if v.is_finite() {
        Ok(v.to_string())
    } else {
        Err(Error::format(0, format!("non-finite value {v} cannot be written")))
    }
}

fn row<'a>(values: impl Iterator<Item = &'a f64>) -> Result<String> {
    let parts = values.map(|v| number(*v)).collect::<Result<Vec<_>>>()?;
    Ok(parts.join(" "))
}

fn one_line(s: &str) -> String {
    s.replace(['\n', '\r'], " ")
}

/// Non-blank lines with their 1-based numbers.
struct Cursor<'a> {
    lines: Vec<(usize, &'a str)>,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        let lines = text
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.trim_start()))
            .filter(|(_, l)| !l.trim_end().is_empty())
            .collect();
        Self { lines, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.lines.len()
    }

    fn line(&self) -> usize {
        self.lines
            .get(self.pos)
            .or(self.lines.last())
            .map(|(n, _)| *n)
            .unwrap_or(0)
    }

    fn peek_key(&self) -> Option<&'a str> {
        self.lines
            .get(self.pos)
            .map(|(_, l)| l.split_once(':').map(|(k, _)| k.trim()).unwrap_or(l))
    }

    /// Consume `key: value`, returning the line number and trimmed value.
    fn field(&mut self, key: &str) -> Result<(usize, &'a str)> {
        self.raw_field(key).map(|(line, v)| (line, v.trim()))
    }

    /// Like [`Cursor::field`] but keeps the value verbatim after the single
    /// space that follows the colon.
    fn text_field(&mut self, key: &str) -> Result<(usize, &'a str)> {
        self.raw_field(key)
            .map(|(line, v)| (line, v.strip_prefix(' ').unwrap_or(v)))
    }

    fn raw_field(&mut self, key: &str) -> Result<(usize, &'a str)> {
        let Some(&(line, text)) = self.lines.get(self.pos) else {
            return Err(Error::format(
                self.line(),
                format!("unexpected end of file, expected '{key}:'"),
            ));
        };
        match text.split_once(':') {
            Some((k, v)) if k.trim() == key => {
                self.pos += 1;
                Ok((line, v))
            }
            _ => Err(Error::format(
                line,
                format!("expected '{key}:', found '{}'", text.trim_end()),
            )),
        }
    }

    /// Consume a bare line of values.
    fn values_line(&mut self) -> Result<(usize, &'a str)> {
        let Some(&(line, text)) = self.lines.get(self.pos) else {
            return Err(Error::format(self.line(), "unexpected end of file in covar"));
        };
        if text.contains(':') {
            return Err(Error::format(line, format!("expected values, found '{text}'")));
        }
        self.pos += 1;
        Ok((line, text.trim_end()))
    }
}
