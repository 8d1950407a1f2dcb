// matrix.rs — column-major strided matrices and the opcode interpreter.
//
// Geometric estimators run on the CPU over small dense matrices. The
// interpreter is stateless: every call is an operation code plus an output
// and zero, one, or two inputs. Matrices address element (i, j) at data
// index `j * stride + i`; rows between `rows` and `stride` in each column
// are padding that no operation reads or writes.
//
// The layout mirrors the strided image container used elsewhere in the
// corpus: runtime dimensions, heap storage, explicit stride so a matrix
// can alias a column block of a larger allocation.

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Scalar trait
// ---------------------------------------------------------------------------

/// Element types a matrix can hold: f32, f64, i32, u8.
///
/// Integer arithmetic wraps on overflow; the geometric nodes only use the
/// float instantiations, the integer ones exist for mask/index matrices.
pub trait Scalar: Copy + Default + PartialEq + std::fmt::Debug + Send + Sync + 'static {
    fn from_f64(v: f64) -> Self;
    fn add(self, rhs: Self) -> Self;
    fn sub(self, rhs: Self) -> Self;
    fn mul(self, rhs: Self) -> Self;
}

impl Scalar for f32 {
    #[inline]
    fn from_f64(v: f64) -> Self {
        v as f32
    }
    #[inline]
    fn add(self, rhs: Self) -> Self {
        self + rhs
    }
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self - rhs
    }
    #[inline]
    fn mul(self, rhs: Self) -> Self {
        self * rhs
    }
}

impl Scalar for f64 {
    #[inline]
    fn from_f64(v: f64) -> Self {
        v
    }
    #[inline]
    fn add(self, rhs: Self) -> Self {
        self + rhs
    }
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self - rhs
    }
    #[inline]
    fn mul(self, rhs: Self) -> Self {
        self * rhs
    }
}

impl Scalar for i32 {
    #[inline]
    fn from_f64(v: f64) -> Self {
        v as i32
    }
    #[inline]
    fn add(self, rhs: Self) -> Self {
        self.wrapping_add(rhs)
    }
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self.wrapping_sub(rhs)
    }
    #[inline]
    fn mul(self, rhs: Self) -> Self {
        self.wrapping_mul(rhs)
    }
}

impl Scalar for u8 {
    #[inline]
    fn from_f64(v: f64) -> Self {
        v.clamp(0.0, 255.0) as u8
    }
    #[inline]
    fn add(self, rhs: Self) -> Self {
        self.wrapping_add(rhs)
    }
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self.wrapping_sub(rhs)
    }
    #[inline]
    fn mul(self, rhs: Self) -> Self {
        self.wrapping_mul(rhs)
    }
}

// ---------------------------------------------------------------------------
// Matrix
// ---------------------------------------------------------------------------

/// A column-major matrix with runtime dimensions and explicit stride.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix<T: Scalar> {
    rows: usize,
    cols: usize,
    /// Elements between consecutive column starts. `stride >= rows`;
    /// the excess is padding.
    stride: usize,
    /// Backing storage, length `cols * stride`.
    data: Vec<T>,
}

impl<T: Scalar> Matrix<T> {
    /// Zero matrix with packed storage (`stride == rows`).
    pub fn new(rows: usize, cols: usize) -> Self {
        Self::new_with_stride(rows, cols, rows)
    }

    /// Zero matrix with explicit stride.
    ///
    /// # Panics
    /// Panics if `stride < rows`.
    pub fn new_with_stride(rows: usize, cols: usize, stride: usize) -> Self {
        assert!(stride >= rows, "stride ({stride}) must be >= rows ({rows})");
        Matrix {
            rows,
            cols,
            stride,
            data: vec![T::default(); cols * stride],
        }
    }

    /// Build from packed column-major data.
    ///
    /// # Panics
    /// Panics if `data.len() != rows * cols`.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<T>) -> Self {
        assert_eq!(
            data.len(),
            rows * cols,
            "data length ({}) must equal rows * cols ({})",
            data.len(),
            rows * cols
        );
        Matrix {
            rows,
            cols,
            stride: rows,
            data,
        }
    }

    /// Build from strided column-major data.
    ///
    /// # Panics
    /// Panics if `stride < rows` or `data.len() != cols * stride`.
    pub fn from_vec_with_stride(rows: usize, cols: usize, stride: usize, data: Vec<T>) -> Self {
        assert!(stride >= rows, "stride ({stride}) must be >= rows ({rows})");
        assert_eq!(
            data.len(),
            cols * stride,
            "data length ({}) must equal cols * stride ({})",
            data.len(),
            cols * stride
        );
        Matrix {
            rows,
            cols,
            stride,
            data,
        }
    }

    /// The n × n identity.
    pub fn identity(n: usize) -> Self {
        let mut m = Self::new(n, n);
        for i in 0..n {
            m.set(i, i, T::from_f64(1.0));
        }
        m
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    #[inline]
    pub fn is_packed(&self) -> bool {
        self.stride == self.rows
    }

    /// Element (i, j): row i, column j.
    ///
    /// # Panics
    /// Panics if out of bounds.
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> T {
        assert!(i < self.rows && j < self.cols, "({i}, {j}) out of bounds");
        self.data[j * self.stride + i]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, v: T) {
        assert!(i < self.rows && j < self.cols, "({i}, {j}) out of bounds");
        self.data[j * self.stride + i] = v;
    }

    /// Raw backing storage, padding included.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// True when both matrices have identical logical contents, ignoring
    /// stride and padding.
    pub fn same_entries(&self, other: &Matrix<T>) -> bool {
        self.rows == other.rows
            && self.cols == other.cols
            && (0..self.cols)
                .all(|j| (0..self.rows).all(|i| self.get(i, j) == other.get(i, j)))
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// One matrix operation, dispatched by [`execute`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operation<T: Scalar> {
    /// No effect.
    Nop,
    /// output[i, j] = v
    Fill(T),
    /// output = input
    Copy,
    /// output[i, j] = input[j, i]
    Transpose,
    /// Componentwise sum.
    Add,
    /// Componentwise difference.
    Sub,
    /// Standard matrix product.
    Mul,
    /// output = aᵀ · b
    MulLt,
    /// output = a · bᵀ
    MulRt,
    /// output = s · input
    Scale(T),
    /// Hadamard (componentwise) product.
    CompMult,
}

impl<T: Scalar> Operation<T> {
    /// Number of input operands the operation consumes.
    pub fn arity(&self) -> usize {
        match self {
            Operation::Nop | Operation::Fill(_) => 0,
            Operation::Copy | Operation::Transpose | Operation::Scale(_) => 1,
            Operation::Add
            | Operation::Sub
            | Operation::Mul
            | Operation::MulLt
            | Operation::MulRt
            | Operation::CompMult => 2,
        }
    }
}

/// Execute one operation into `output`.
///
/// The interpreter writes only the logical `rows × cols` region of the
/// output; padding rows are never touched, whatever the stride. When the
/// output is packed, `Fill` and `Copy` fall through to a single contiguous
/// write.
///
/// # Errors
/// [`Error::IllegalOperation`] on arity or shape mismatch.
pub fn execute<T: Scalar>(
    op: &Operation<T>,
    output: &mut Matrix<T>,
    inputs: &[&Matrix<T>],
) -> Result<()> {
    if inputs.len() != op.arity() {
        return Err(Error::IllegalOperation(format!(
            "{op:?} takes {} input(s), got {}",
            op.arity(),
            inputs.len()
        )));
    }

    match op {
        Operation::Nop => Ok(()),
        Operation::Fill(v) => {
            if output.is_packed() {
                output.data.fill(*v);
            } else {
                for j in 0..output.cols {
                    let start = j * output.stride;
                    output.data[start..start + output.rows].fill(*v);
                }
            }
            Ok(())
        }
        Operation::Copy => {
            let a = inputs[0];
            require_shape(output, a.rows, a.cols, "COPY")?;
            if output.is_packed() && a.is_packed() {
                output.data.copy_from_slice(&a.data);
            } else {
                for j in 0..a.cols {
                    let src = j * a.stride;
                    let dst = j * output.stride;
                    output.data[dst..dst + a.rows]
                        .copy_from_slice(&a.data[src..src + a.rows]);
                }
            }
            Ok(())
        }
        Operation::Transpose => {
            let a = inputs[0];
            require_shape(output, a.cols, a.rows, "TRANSPOSE")?;
            for j in 0..a.cols {
                for i in 0..a.rows {
                    output.set(j, i, a.get(i, j));
                }
            }
            Ok(())
        }
        Operation::Add | Operation::Sub | Operation::CompMult => {
            let (a, b) = (inputs[0], inputs[1]);
            if a.rows != b.rows || a.cols != b.cols {
                return Err(shape_err("componentwise op", a, b));
            }
            require_shape(output, a.rows, a.cols, "componentwise op")?;
            for j in 0..a.cols {
                for i in 0..a.rows {
                    let v = match op {
                        Operation::Add => a.get(i, j).add(b.get(i, j)),
                        Operation::Sub => a.get(i, j).sub(b.get(i, j)),
                        _ => a.get(i, j).mul(b.get(i, j)),
                    };
                    output.set(i, j, v);
                }
            }
            Ok(())
        }
        Operation::Scale(s) => {
            let a = inputs[0];
            require_shape(output, a.rows, a.cols, "SCALE")?;
            for j in 0..a.cols {
                for i in 0..a.rows {
                    output.set(i, j, s.mul(a.get(i, j)));
                }
            }
            Ok(())
        }
        Operation::Mul => {
            // output (m × n) = a (m × k) · b (k × n).
            let (a, b) = (inputs[0], inputs[1]);
            if a.cols != b.rows {
                return Err(shape_err("MUL", a, b));
            }
            require_shape(output, a.rows, b.cols, "MUL")?;
            clear(output);
            // Column-major accumulation: the innermost loop walks one
            // column of `a` and one column of `output` contiguously.
            for j in 0..b.cols {
                for l in 0..a.cols {
                    let b_lj = b.get(l, j);
                    let out_col = j * output.stride;
                    let a_col = l * a.stride;
                    for i in 0..a.rows {
                        let acc = output.data[out_col + i].add(a.data[a_col + i].mul(b_lj));
                        output.data[out_col + i] = acc;
                    }
                }
            }
            Ok(())
        }
        Operation::MulLt => {
            // output (m × n) = aᵀ · b, with a (k × m), b (k × n).
            // Each output element is one dot product of two columns, so
            // every element is written exactly once: no clear needed.
            let (a, b) = (inputs[0], inputs[1]);
            if a.rows != b.rows {
                return Err(shape_err("MULLT", a, b));
            }
            require_shape(output, a.cols, b.cols, "MULLT")?;
            for j in 0..b.cols {
                for i in 0..a.cols {
                    let a_col = i * a.stride;
                    let b_col = j * b.stride;
                    let mut acc = T::default();
                    for l in 0..a.rows {
                        acc = acc.add(a.data[a_col + l].mul(b.data[b_col + l]));
                    }
                    output.set(i, j, acc);
                }
            }
            Ok(())
        }
        Operation::MulRt => {
            // output (m × n) = a · bᵀ, with a (m × k), b (n × k).
            let (a, b) = (inputs[0], inputs[1]);
            if a.cols != b.cols {
                return Err(shape_err("MULRT", a, b));
            }
            require_shape(output, a.rows, b.rows, "MULRT")?;
            clear(output);
            for l in 0..a.cols {
                for j in 0..b.rows {
                    let b_jl = b.get(j, l);
                    let out_col = j * output.stride;
                    let a_col = l * a.stride;
                    for i in 0..a.rows {
                        let acc = output.data[out_col + i].add(a.data[a_col + i].mul(b_jl));
                        output.data[out_col + i] = acc;
                    }
                }
            }
            Ok(())
        }
    }
}

/// Zero the logical region of a matrix before accumulation.
fn clear<T: Scalar>(m: &mut Matrix<T>) {
    for j in 0..m.cols {
        let start = j * m.stride;
        m.data[start..start + m.rows].fill(T::default());
    }
}

fn require_shape<T: Scalar>(out: &Matrix<T>, rows: usize, cols: usize, op: &str) -> Result<()> {
    if out.rows != rows || out.cols != cols {
        return Err(Error::IllegalOperation(format!(
            "{op}: output is {}x{}, expected {rows}x{cols}",
            out.rows, out.cols
        )));
    }
    Ok(())
}

fn shape_err<T: Scalar>(op: &str, a: &Matrix<T>, b: &Matrix<T>) -> Error {
    Error::IllegalOperation(format!(
        "{op}: incompatible shapes {}x{} and {}x{}",
        a.rows, a.cols, b.rows, b.cols
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
