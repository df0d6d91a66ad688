//! Parsers for the per-bin output files appended by the engine.
//!
//! The engine writes with Fortran list-directed output: complex numbers as
//! `(re,im)`, reals with `E` or `D` exponents, and `k*value` for repeated
//! values. Every record here is read back exactly; anything that does not
//! fit the layout is reported as malformed instead of being zero-filled.

use std::path::Path;

use nalgebra::Complex;

use crate::error::{Error, Result};
use crate::params::value::parse_real;

/// Largest count field or repeat prefix accepted in a bin file.
const MAX_COUNT: usize = 1 << 24;

/// One record of a `<name>_scal` file.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarBin {
    pub values: Vec<Complex<f64>>,
    pub sign: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatticeShape {
    pub n_orb: usize,
    pub n_cells: usize,
    pub n_tau: usize,
}

impl LatticeShape {
    /// Number of correlation values per bin, saturating on overflow.
    pub fn len(&self) -> usize {
        self.checked_len().unwrap_or(usize::MAX)
    }

    pub fn checked_len(&self) -> Option<usize> {
        self.n_cells
            .checked_mul(self.n_tau)?
            .checked_mul(self.n_orb)?
            .checked_mul(self.n_orb)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index of element `(cell, tau, orb1, orb2)` in the flat value array.
    pub fn index(&self, cell: usize, tau: usize, orb1: usize, orb2: usize) -> usize {
        ((cell * self.n_tau + tau) * self.n_orb + orb1) * self.n_orb + orb2
    }
}

/// One record of a `<name>_eq` or `<name>_tau` file.
#[derive(Debug, Clone, PartialEq)]
pub struct LatticeBin {
    pub sign: f64,
    pub shape: LatticeShape,
    pub dtau: f64,
    pub background: Vec<Complex<f64>>,
    pub coords: Vec<[f64; 2]>,
    /// Values ordered by cell, tau, orb1, orb2.
    pub values: Vec<Complex<f64>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Real(f64),
    Complex(Complex<f64>),
}

/// Flat token sequence with the source line of each token.
struct TokenStream<'a> {
    path: &'a Path,
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl<'a> TokenStream<'a> {
    fn new(text: &str, path: &'a Path) -> Result<Self> {
        let mut tokens = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            for token in tokenize(line).map_err(|m| Error::malformed(path, format!("line {}: {}", line_no + 1, m)))? {
                tokens.push((line_no + 1, token));
            }
        }
        Ok(Self { path, tokens, pos: 0 })
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn remaining(&self) -> usize {
        self.tokens.len().saturating_sub(self.pos)
    }

    fn next(&mut self, bin: usize, what: &str) -> Result<(usize, Token)> {
        let token = self.tokens.get(self.pos).copied().ok_or_else(|| {
            Error::malformed(self.path, format!("bin {}: truncated record, expected {}", bin, what))
        })?;
        self.pos += 1;
        Ok(token)
    }

    fn real(&mut self, bin: usize, what: &str) -> Result<f64> {
        match self.next(bin, what)? {
            (_, Token::Real(x)) => Ok(x),
            (line, Token::Complex(_)) => Err(Error::malformed(
                self.path,
                format!("bin {}, line {}: expected real {}, found complex", bin, line, what),
            )),
        }
    }

    fn count(&mut self, bin: usize, what: &str) -> Result<usize> {
        let x = self.real(bin, what)?;
        as_count(x).ok_or_else(|| {
            Error::malformed(self.path, format!("bin {}: {} must be a non-negative integer, found {}", bin, what, x))
        })
    }

    fn complex(&mut self, bin: usize, what: &str) -> Result<Complex<f64>> {
        Ok(match self.next(bin, what)?.1 {
            Token::Real(x) => Complex::new(x, 0.0),
            Token::Complex(z) => z,
        })
    }
}

fn as_count(x: f64) -> Option<usize> {
    (x >= 0.0 && x.fract() == 0.0 && x <= MAX_COUNT as f64).then_some(x as usize)
}

fn tokenize(line: &str) -> std::result::Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() || c == ',' {
            i += 1;
            continue;
        }

        let mut repeat = 1;
        let start = i;
        while i < chars.len() && !chars[i].is_whitespace() && chars[i] != ',' && chars[i] != '(' {
            i += 1;
        }
        let mut word: String = chars[start..i].iter().collect();

        if let Some((count, rest)) = word.split_once('*') {
            repeat = count
                .parse::<usize>()
                .ok()
                .filter(|&n| n <= MAX_COUNT)
                .ok_or_else(|| format!("invalid repeat count in {:?}", word))?;
            word = rest.to_string();
        }

        let token = if word.is_empty() && i < chars.len() && chars[i] == '(' {
            let close = chars[i..]
                .iter()
                .position(|&c| c == ')')
                .map(|p| i + p)
                .ok_or_else(|| "unterminated complex number".to_string())?;
            let inner: String = chars[i + 1..close].iter().collect();
            i = close + 1;
            let (re, im) = inner
                .split_once(',')
                .ok_or_else(|| format!("complex number ({}) needs two parts", inner))?;
            let re = parse_real(re.trim()).ok_or_else(|| format!("invalid real part {:?}", re.trim()))?;
            let im = parse_real(im.trim()).ok_or_else(|| format!("invalid imaginary part {:?}", im.trim()))?;
            Token::Complex(Complex::new(re, im))
        } else if word.is_empty() {
            return Err(format!("unexpected character {:?}", chars[i]));
        } else {
            Token::Real(parse_real(&word).ok_or_else(|| format!("invalid number {:?}", word))?)
        };

        tokens.extend(std::iter::repeat(token).take(repeat));
    }

    Ok(tokens)
}

/// Parse a scalar bin file: per line the count `n` (values + 1), `n - 1`
/// values and the average sign.
pub fn parse_scalar_bins(text: &str, path: &Path) -> Result<Vec<ScalarBin>> {
    let mut bins: Vec<ScalarBin> = Vec::new();

    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let bin = bins.len() + 1;
        let malformed = |m: String| Error::malformed(path, format!("bin {} (line {}): {}", bin, line_no + 1, m));

        let tokens = tokenize(line).map_err(malformed)?;
        let n = match tokens.first() {
            Some(Token::Real(x)) => as_count(*x).filter(|&n| n >= 1),
            _ => None,
        }
        .ok_or_else(|| malformed("record must start with a positive count".to_string()))?;

        if n.checked_add(1) != Some(tokens.len()) {
            return Err(malformed(format!("count {} announces {} tokens, found {}", n, n, tokens.len() - 1)));
        }

        let sign = match tokens[n] {
            Token::Real(x) => x,
            Token::Complex(_) => return Err(malformed("sign must be real".to_string())),
        };
        let values: Vec<Complex<f64>> = tokens[1..n]
            .iter()
            .map(|t| match *t {
                Token::Real(x) => Complex::new(x, 0.0),
                Token::Complex(z) => z,
            })
            .collect();

        if let Some(first) = bins.first() {
            if first.values.len() != values.len() {
                return Err(malformed(format!("{} values, previous bins have {}", values.len(), first.values.len())));
            }
        }
        bins.push(ScalarBin { values, sign });
    }

    Ok(bins)
}

/// Parse an equal-time or time-displaced correlation file.
pub fn parse_lattice_bins(text: &str, path: &Path) -> Result<Vec<LatticeBin>> {
    let mut stream = TokenStream::new(text, path)?;
    let mut bins: Vec<LatticeBin> = Vec::new();

    while !stream.is_empty() {
        let bin = bins.len() + 1;
        let sign = stream.real(bin, "sign")?;
        let shape = LatticeShape {
            n_orb: stream.count(bin, "orbital count")?,
            n_cells: stream.count(bin, "unit cell count")?,
            n_tau: stream.count(bin, "time slice count")?,
        };
        let dtau = stream.real(bin, "dtau")?;

        let n_values = shape
            .checked_len()
            .filter(|&n| n > 0)
            .ok_or_else(|| Error::malformed(path, format!("bin {}: invalid shape {:?}", bin, shape)))?;
        let needed = shape
            .n_cells
            .checked_mul(2)
            .and_then(|n| n.checked_add(n_values))
            .and_then(|n| n.checked_add(shape.n_orb));
        if needed.map_or(true, |n| n > stream.remaining()) {
            return Err(Error::malformed(
                path,
                format!(
                    "bin {}: truncated record, shape {:?} needs more than the {} values left",
                    bin,
                    shape,
                    stream.remaining()
                ),
            ));
        }
        if let Some(first) = bins.first() {
            if first.shape != shape {
                return Err(Error::malformed(
                    path,
                    format!("bin {}: shape {:?} differs from first bin {:?}", bin, shape, first.shape),
                ));
            }
        }

        let background = (0..shape.n_orb)
            .map(|_| stream.complex(bin, "background value"))
            .collect::<Result<Vec<_>>>()?;

        let per_cell = shape.n_tau * shape.n_orb * shape.n_orb;
        let mut coords = Vec::with_capacity(shape.n_cells);
        let mut values = Vec::with_capacity(n_values);
        for _ in 0..shape.n_cells {
            coords.push([stream.real(bin, "coordinate")?, stream.real(bin, "coordinate")?]);
            for _ in 0..per_cell {
                values.push(stream.complex(bin, "correlation value")?);
            }
        }

        bins.push(LatticeBin {
            sign,
            shape,
            dtau,
            background,
            coords,
            values,
        });
    }

    Ok(bins)
}

/// Number of records in a scalar bin file without parsing the values.
pub fn count_scalar_bins(text: &str) -> usize {
    text.lines().filter(|l| !l.trim().is_empty()).count()
}
