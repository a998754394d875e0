use derive_builder::Builder;
use num_traits::Zero;

/// Dense row-major matrix. Sensitivity matrices are stored this way since
/// they are generally full even when the network is sparse.
#[derive(Debug, Clone, Default, PartialEq, Builder)]
#[builder(default, build_fn(name = "pre_build", validate = "Self::validate"))]
pub struct Mat<T: Default + Clone> {
    #[builder(setter(custom))]
    rows: usize,
    #[builder(setter(custom))]
    cols: usize,

    values: Vec<T>,
}

impl<T> MatBuilder<T>
where
    T: Default + Clone,
{
    pub fn build(&self) -> Result<Mat<T>, MatBuilderError>
    where
        T: Zero,
    {
        let mut mat = self.pre_build()?;
        if self.values.is_none() {
            mat.values = vec![T::zero(); mat.rows * mat.cols];
        }
        Ok(mat)
    }

    fn validate(&self) -> Result<(), String> {
        if let Some(values) = &self.values {
            let rows = self.rows.unwrap_or_default();
            let cols = self.cols.unwrap_or_default();
            if values.len() != rows * cols {
                return Err(format!(
                    "values length ({}) must be rows * cols ({} * {} = {})",
                    values.len(),
                    rows,
                    cols,
                    rows * cols
                ));
            }
        }
        Ok(())
    }
}

impl<T> Mat<T>
where
    T: Default + Copy,
{
    pub fn new(rows: usize, cols: usize) -> MatBuilder<T> {
        MatBuilder {
            rows: Some(rows),
            cols: Some(cols),
            ..Default::default()
        }
    }

    pub fn zeros(rows: usize, cols: usize) -> Self
    where
        T: Zero,
    {
        Self {
            rows,
            cols,
            values: vec![T::zero(); rows * cols],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }
    pub fn cols(&self) -> usize {
        self.cols
    }
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    #[inline]
    fn ix(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> T {
        assert!(row < self.rows && col < self.cols);
        self.values[self.ix(row, col)]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, v: T) {
        assert!(row < self.rows && col < self.cols);
        let i = self.ix(row, col);
        self.values[i] = v
    }

    pub fn row(&self, row: usize) -> &[T] {
        assert!(row < self.rows);
        &self.values[self.ix(row, 0)..self.ix(row, 0) + self.cols]
    }

    /// Overwrites column `col` with `v`.
    pub fn set_col(&mut self, col: usize, v: &[T]) {
        assert_eq!(v.len(), self.rows);
        for (row, &x) in v.iter().enumerate() {
            self.set(row, col, x);
        }
    }

    pub fn to_rows(&self) -> Vec<Vec<T>> {
        (0..self.rows).map(|r| self.row(r).to_vec()).collect()
    }

    pub fn map<U, F>(&self, f: F) -> Mat<U>
    where
        U: Default + Copy,
        F: Fn(T) -> U,
    {
        Mat {
            rows: self.rows,
            cols: self.cols,
            values: self.values.iter().map(|&v| f(v)).collect(),
        }
    }
}
