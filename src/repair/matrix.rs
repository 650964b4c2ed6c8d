//! Reed–Solomon matrix construction and inversion over GF(2^16).
//!
//! Inputs are the full run of source blocks (present or missing)
//! followed by the recovery blocks being consumed; outputs are the
//! missing source blocks. Building the matrix mirrors the PAR2
//! Vandermonde scheme: input `i` has base `alog(l_i)` where the
//! `l_i` are the ascending logarithms coprime with 65535, and the
//! recovery row at exponent `e` holds `base_i^e`. Gauss–Jordan
//! elimination against the missing-column submatrix turns the rows
//! into direct reconstruction coefficients.

use crate::error::RepairError;
use crate::galois::{gcd, process_slice, Galois16};

#[derive(Debug, Clone, Copy)]
struct OutputRow {
    present: bool,
    exponent: u16,
}

pub struct ReedSolomon {
    input_count: usize,
    data_present: usize,
    data_missing: usize,
    present_index: Vec<usize>,
    missing_index: Vec<usize>,
    /// Vandermonde base value per input block.
    bases: Vec<u16>,

    output_rows: Vec<OutputRow>,
    parity_present: usize,
    parity_missing: usize,

    /// Row-major `out_count × in_count` coefficient matrix.
    matrix: Vec<Galois16>,
}

impl Default for ReedSolomon {
    fn default() -> Self {
        Self::new()
    }
}

impl ReedSolomon {
    pub fn new() -> Self {
        ReedSolomon {
            input_count: 0,
            data_present: 0,
            data_missing: 0,
            present_index: Vec::new(),
            missing_index: Vec::new(),
            bases: Vec::new(),
            output_rows: Vec::new(),
            parity_present: 0,
            parity_missing: 0,
            matrix: Vec::new(),
        }
    }

    /// Record which source blocks are present, assigning each input
    /// its Vandermonde base. The base logarithm must be coprime with
    /// 65535 for the matrix to be invertible.
    pub fn set_input(&mut self, present: &[bool]) -> Result<(), RepairError> {
        self.input_count = present.len();
        self.present_index.clear();
        self.missing_index.clear();
        self.bases.clear();
        self.data_present = 0;
        self.data_missing = 0;

        let mut log_base = 0u32;
        for (index, &is_present) in present.iter().enumerate() {
            if is_present {
                self.present_index.push(index);
                self.data_present += 1;
            } else {
                self.missing_index.push(index);
                self.data_missing += 1;
            }

            while gcd(65535, log_base) != 1 {
                log_base += 1;
            }
            if log_base >= 65535 {
                return Err(RepairError::Logic(
                    "too many input blocks for GF(2^16)".into(),
                ));
            }
            self.bases.push(Galois16::new(log_base as u16).alog());
            log_base += 1;
        }
        Ok(())
    }

    /// Record one output row: a recovery block consumed as input
    /// (`present = true`, at its packet exponent) or a recovery block
    /// that would need recomputation.
    pub fn set_output(&mut self, present: bool, exponent: u16) {
        self.output_rows.push(OutputRow { present, exponent });
        if present {
            self.parity_present += 1;
        } else {
            self.parity_missing += 1;
        }
    }

    pub fn missing_count(&self) -> usize {
        self.data_missing
    }

    /// Build and solve the matrix. Fails when there are fewer
    /// recovery rows than missing blocks, or (with inconsistent
    /// inputs) when elimination hits a zero pivot.
    pub fn compute(&mut self) -> Result<(), RepairError> {
        let out_count = self.data_missing + self.parity_missing;
        let in_count = self.input_count;

        if self.data_missing > self.parity_present {
            return Err(RepairError::Logic(
                "not enough recovery blocks for the missing data".into(),
            ));
        }
        if out_count == 0 {
            return Err(RepairError::Logic("no output blocks to compute".into()));
        }

        self.matrix = vec![Galois16::new(0); out_count * in_count];
        let mut right = vec![Galois16::new(0); out_count * out_count];

        self.fill_rows(out_count, in_count, &mut right);
        if self.data_missing > 0 {
            self.eliminate(out_count, in_count, &mut right)?;
        }
        Ok(())
    }

    /// Coefficient for (output row, input index) after elimination.
    pub fn factor(&self, output_index: usize, input_index: usize) -> Galois16 {
        self.matrix[output_index * self.input_count + input_index]
    }

    /// Multiply one input chunk into one output chunk.
    pub fn process(
        &self,
        input_index: usize,
        input: &[u8],
        output_index: usize,
        output: &mut [u8],
    ) {
        process_slice(self.factor(output_index, input_index), input, output);
    }

    fn fill_rows(&mut self, out_count: usize, in_count: usize, right: &mut [Galois16]) {
        // Rows for missing data blocks, fed by present recovery blocks.
        let mut present_rows = self
            .output_rows
            .iter()
            .filter(|row| row.present)
            .map(|row| row.exponent);
        for row in 0..self.data_missing {
            let exponent = present_rows.next().expect("checked in compute");
            for (column, &input) in self.present_index.iter().enumerate() {
                self.matrix[row * in_count + column] =
                    Galois16::new(self.bases[input]).pow(exponent);
            }
            for column in 0..self.data_missing {
                self.matrix[row * in_count + self.data_present + column] =
                    Galois16::new(u16::from(row == column));
            }
            for (column, &input) in self.missing_index.iter().enumerate() {
                right[row * out_count + column] = Galois16::new(self.bases[input]).pow(exponent);
            }
        }

        // Rows for missing recovery blocks (pure re-encode; unused by
        // repair, which never recomputes parity).
        let mut missing_rows = self
            .output_rows
            .iter()
            .filter(|row| !row.present)
            .map(|row| row.exponent);
        for parity_row in 0..self.parity_missing {
            let row = self.data_missing + parity_row;
            let exponent = missing_rows.next().expect("counted in set_output");
            for (column, &input) in self.present_index.iter().enumerate() {
                self.matrix[row * in_count + column] =
                    Galois16::new(self.bases[input]).pow(exponent);
            }
            for (column, &input) in self.missing_index.iter().enumerate() {
                right[row * out_count + column] = Galois16::new(self.bases[input]).pow(exponent);
            }
            right[row * out_count + self.data_missing + parity_row] = Galois16::new(1);
        }
    }

    /// Gauss–Jordan elimination of the missing-column submatrix,
    /// applied simultaneously to the coefficient rows.
    fn eliminate(
        &mut self,
        out_count: usize,
        in_count: usize,
        right: &mut [Galois16],
    ) -> Result<(), RepairError> {
        for row in 0..self.data_missing {
            let pivot = right[row * out_count + row];
            if pivot.value() == 0 {
                return Err(RepairError::SingularMatrix);
            }

            if pivot.value() != 1 {
                for column in 0..in_count {
                    let index = row * in_count + column;
                    self.matrix[index] = self.matrix[index] / pivot;
                }
                right[row * out_count + row] = Galois16::new(1);
                for column in (row + 1)..out_count {
                    let index = row * out_count + column;
                    right[index] = right[index] / pivot;
                }
            }

            for other in 0..out_count {
                if other == row {
                    continue;
                }
                let factor = right[other * out_count + row];
                if factor.value() == 0 {
                    continue;
                }
                for column in 0..in_count {
                    let scaled = self.matrix[row * in_count + column] * factor;
                    self.matrix[other * in_count + column] -= scaled;
                }
                right[other * out_count + row] = Galois16::new(0);
                for column in (row + 1)..out_count {
                    let scaled = right[row * out_count + column] * factor;
                    right[other * out_count + column] -= scaled;
                }
            }
        }
        Ok(())
    }
}

/// The Vandermonde base sequence shared by encoder and decoder: the
/// `count` base values whose logarithms are the ascending integers
/// coprime with 65535.
pub fn vandermonde_bases(count: usize) -> Vec<Galois16> {
    let mut bases = Vec::with_capacity(count);
    let mut log_base = 0u32;
    for _ in 0..count {
        while gcd(65535, log_base) != 1 {
            log_base += 1;
        }
        bases.push(Galois16::new(Galois16::new(log_base as u16).alog()));
        log_base += 1;
    }
    bases
}
