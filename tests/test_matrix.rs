// tests/test_matrix.rs — algebraic laws of the opcode interpreter.
//
// The unit tests in src/matrix.rs pin down each operation; this suite
// checks the cross-operation laws the interpreter must satisfy, on
// larger random matrices and under varying strides.

use visionflow::matrix::{execute, Matrix, Operation};

struct Lcg(u32);

impl Lcg {
    fn next_f32(&mut self) -> f32 {
        self.0 = self.0.wrapping_mul(1664525).wrapping_add(1013904223);
        // Small magnitudes keep float accumulation error well below the
        // comparison tolerance.
        ((self.0 >> 16) as f32 / 65536.0) * 4.0 - 2.0
    }
}

fn random_matrix(seed: u32, rows: usize, cols: usize, stride: usize) -> Matrix<f32> {
    let mut rng = Lcg(seed);
    let mut m = Matrix::new_with_stride(rows, cols, stride);
    for j in 0..cols {
        for i in 0..rows {
            m.set(i, j, rng.next_f32());
        }
    }
    m
}

fn assert_close(a: &Matrix<f32>, b: &Matrix<f32>, tol: f32) {
    assert_eq!((a.rows(), a.cols()), (b.rows(), b.cols()));
    for j in 0..a.cols() {
        for i in 0..a.rows() {
            let (x, y) = (a.get(i, j), b.get(i, j));
            assert!(
                (x - y).abs() <= tol,
                "element ({i}, {j}): {x} vs {y}"
            );
        }
    }
}

#[test]
fn transpose_is_an_involution() {
    let a = random_matrix(1, 5, 8, 9);
    let mut at = Matrix::new(8, 5);
    let mut back = Matrix::new_with_stride(5, 8, 11);
    execute(&Operation::Transpose, &mut at, &[&a]).unwrap();
    execute(&Operation::Transpose, &mut back, &[&at]).unwrap();
    assert_close(&a, &back, 0.0);
}

#[test]
fn identity_is_neutral_for_mul() {
    let a = random_matrix(2, 6, 6, 6);
    let i = Matrix::identity(6);
    let mut left = Matrix::new(6, 6);
    let mut right = Matrix::new(6, 6);
    execute(&Operation::Mul, &mut left, &[&i, &a]).unwrap();
    execute(&Operation::Mul, &mut right, &[&a, &i]).unwrap();
    assert_close(&a, &left, 1e-5);
    assert_close(&a, &right, 1e-5);
}

#[test]
fn mullt_factors_through_transpose() {
    let a = random_matrix(3, 7, 4, 10);
    let b = random_matrix(4, 7, 5, 7);
    let mut direct = Matrix::new(4, 5);
    execute(&Operation::MulLt, &mut direct, &[&a, &b]).unwrap();

    let mut at = Matrix::new(4, 7);
    execute(&Operation::Transpose, &mut at, &[&a]).unwrap();
    let mut composed = Matrix::new(4, 5);
    execute(&Operation::Mul, &mut composed, &[&at, &b]).unwrap();

    assert_close(&direct, &composed, 1e-4);
}

#[test]
fn mulrt_factors_through_transpose() {
    let a = random_matrix(5, 4, 6, 4);
    let b = random_matrix(6, 3, 6, 8);
    let mut direct = Matrix::new(4, 3);
    execute(&Operation::MulRt, &mut direct, &[&a, &b]).unwrap();

    let mut bt = Matrix::new(6, 3);
    execute(&Operation::Transpose, &mut bt, &[&b]).unwrap();
    let mut composed = Matrix::new(4, 3);
    execute(&Operation::Mul, &mut composed, &[&a, &bt]).unwrap();

    assert_close(&direct, &composed, 1e-4);
}

#[test]
fn results_are_stride_invariant() {
    // The same logical operands with different physical strides must give
    // identical results.
    let a_packed = random_matrix(7, 5, 6, 5);
    let b_packed = random_matrix(8, 6, 6, 6);

    let restride = |m: &Matrix<f32>, stride: usize| {
        let mut out = Matrix::new_with_stride(m.rows(), m.cols(), stride);
        execute(&Operation::Copy, &mut out, &[m]).unwrap();
        out
    };
    let a_wide = restride(&a_packed, 13);
    let b_wide = restride(&b_packed, 9);

    let mut packed = Matrix::new(5, 6);
    let mut wide = Matrix::new_with_stride(5, 6, 12);
    execute(&Operation::Mul, &mut packed, &[&a_packed, &b_packed]).unwrap();
    execute(&Operation::Mul, &mut wide, &[&a_wide, &b_wide]).unwrap();
    assert_close(&packed, &wide, 0.0);
}

#[test]
fn known_product_with_padded_storage() {
    // A = [[1, 2], [3, 4]], B = [[5, 6], [7, 8]], both stride 4.
    let a = Matrix::from_vec_with_stride(
        2,
        2,
        4,
        vec![1.0f32, 3.0, 0.0, 0.0, 2.0, 4.0, 0.0, 0.0],
    );
    let b = Matrix::from_vec_with_stride(
        2,
        2,
        4,
        vec![5.0f32, 7.0, 0.0, 0.0, 6.0, 8.0, 0.0, 0.0],
    );
    let mut out = Matrix::from_vec_with_stride(2, 2, 4, vec![9.0f32; 8]);
    execute(&Operation::Mul, &mut out, &[&a, &b]).unwrap();

    assert_eq!(
        [out.get(0, 0), out.get(0, 1), out.get(1, 0), out.get(1, 1)],
        [19.0, 22.0, 43.0, 50.0]
    );
    // Padding rows of the output remain exactly as initialized.
    for j in 0..2 {
        assert_eq!(out.as_slice()[j * 4 + 2], 9.0);
        assert_eq!(out.as_slice()[j * 4 + 3], 9.0);
    }
}

#[test]
fn fill_then_scale_composes() {
    let mut ones = Matrix::<f64>::new_with_stride(3, 3, 5);
    execute(&Operation::Fill(1.0), &mut ones, &[]).unwrap();
    let mut scaled = Matrix::new(3, 3);
    execute(&Operation::Scale(2.5), &mut scaled, &[&ones]).unwrap();
    let mut hadamard = Matrix::new(3, 3);
    execute(&Operation::CompMult, &mut hadamard, &[&scaled, &scaled]).unwrap();
    for j in 0..3 {
        for i in 0..3 {
            assert_eq!(hadamard.get(i, j), 6.25);
        }
    }
}
