//! Helpers over burn's [`TensorData`], the host buffer used as the local component of
//! global tensors.

use core::ops::Range;

use burn_tensor::{Element, TensorData};
use half::{bf16, f16};

use crate::sharding::view_shape;
use crate::{GlobalError, Result};

/// Element types a local component can hold.
pub trait LocalElement: Element + Copy {
    /// The additive identity.
    fn zero() -> Self;
    /// Converts from a double, truncating toward zero for integers.
    fn from_f64(value: f64) -> Self;
    /// Largest index stored exactly, and every smaller one with it.
    const MAX_INDEX: usize;
    /// Converts an index, wrapping for narrow integers.
    ///
    /// Indices above [`MAX_INDEX`](LocalElement::MAX_INDEX) are not preserved.
    fn from_index(index: usize) -> Self;
    /// Adds two partial values.
    fn accumulate(self, other: Self) -> Self;
}

macro_rules! impl_local_element_float {
    ($($ty:ty),*) => {$(
        impl LocalElement for $ty {
            const MAX_INDEX: usize = if <$ty>::MANTISSA_DIGITS < usize::BITS {
                1 << <$ty>::MANTISSA_DIGITS
            } else {
                usize::MAX
            };
            fn zero() -> Self {
                0.0
            }
            fn from_f64(value: f64) -> Self {
                value as $ty
            }
            fn from_index(index: usize) -> Self {
                index as $ty
            }
            fn accumulate(self, other: Self) -> Self {
                self + other
            }
        }
    )*};
}

macro_rules! impl_local_element_int {
    ($($ty:ty),*) => {$(
        impl LocalElement for $ty {
            const MAX_INDEX: usize = if (<$ty>::MAX as u128) > (usize::MAX as u128) {
                usize::MAX
            } else {
                <$ty>::MAX as usize
            };
            fn zero() -> Self {
                0
            }
            fn from_f64(value: f64) -> Self {
                value as $ty
            }
            fn from_index(index: usize) -> Self {
                index as $ty
            }
            fn accumulate(self, other: Self) -> Self {
                self.wrapping_add(other)
            }
        }
    )*};
}

macro_rules! impl_local_element_half {
    ($($ty:ty),*) => {$(
        impl LocalElement for $ty {
            const MAX_INDEX: usize = if <$ty>::MANTISSA_DIGITS < usize::BITS {
                1 << <$ty>::MANTISSA_DIGITS
            } else {
                usize::MAX
            };
            fn zero() -> Self {
                <$ty>::ZERO
            }
            fn from_f64(value: f64) -> Self {
                <$ty>::from_f64(value)
            }
            fn from_index(index: usize) -> Self {
                <$ty>::from_f64(index as f64)
            }
            fn accumulate(self, other: Self) -> Self {
                self + other
            }
        }
    )*};
}

impl_local_element_float!(f64, f32);
impl_local_element_int!(i64, i32, i16, i8, u64, u32, u16, u8);
impl_local_element_half!(f16, bf16);

impl LocalElement for bool {
    const MAX_INDEX: usize = 1;
    fn zero() -> Self {
        false
    }
    fn from_f64(value: f64) -> Self {
        value != 0.0
    }
    fn from_index(index: usize) -> Self {
        index != 0
    }
    fn accumulate(self, other: Self) -> Self {
        self | other
    }
}

/// Runs `$body` with `$E` bound to the [`LocalElement`] matching `$dtype`.
///
/// Evaluates to `Err(GlobalError::UnsupportedDType)` for any other dtype.
macro_rules! dispatch_dtype {
    ($dtype:expr, |$E:ident| $body:expr) => {
        match $dtype {
            burn_tensor::DType::F64 => {
                type $E = f64;
                $body
            }
            burn_tensor::DType::F32 => {
                type $E = f32;
                $body
            }
            burn_tensor::DType::F16 => {
                type $E = half::f16;
                $body
            }
            burn_tensor::DType::BF16 => {
                type $E = half::bf16;
                $body
            }
            burn_tensor::DType::I64 => {
                type $E = i64;
                $body
            }
            burn_tensor::DType::I32 => {
                type $E = i32;
                $body
            }
            burn_tensor::DType::I16 => {
                type $E = i16;
                $body
            }
            burn_tensor::DType::I8 => {
                type $E = i8;
                $body
            }
            burn_tensor::DType::U64 => {
                type $E = u64;
                $body
            }
            burn_tensor::DType::U32 => {
                type $E = u32;
                $body
            }
            burn_tensor::DType::U16 => {
                type $E = u16;
                $body
            }
            burn_tensor::DType::U8 => {
                type $E = u8;
                $body
            }
            burn_tensor::DType::Bool => {
                type $E = bool;
                $body
            }
            other => Err($crate::GlobalError::UnsupportedDType(other)),
        }
    };
}

pub(crate) use dispatch_dtype;

/// Fails with [`GlobalError::UnsupportedDType`] unless `dtype` has a [`LocalElement`].
pub fn check_dtype(dtype: burn_tensor::DType) -> Result<()> {
    dispatch_dtype!(dtype, |E| {
        let _ = E::zero();
        Ok(())
    })
}

/// Size in bytes of one element of `dtype`.
pub fn element_size(dtype: burn_tensor::DType) -> Result<usize> {
    dispatch_dtype!(dtype, |E| Ok(core::mem::size_of::<E>()))
}

/// Reads the elements of `data` as `E`.
pub fn read<E: LocalElement>(data: &TensorData) -> Result<&[E]> {
    data.as_slice::<E>()
        .map_err(|err| GlobalError::Data(format!("{err:?}")))
}

/// A tensor of `shape` holding no element. At least one dimension must be zero.
pub fn empty(dtype: burn_tensor::DType, shape: Vec<usize>) -> Result<TensorData> {
    dispatch_dtype!(dtype, |E| Ok(TensorData::new(Vec::<E>::new(), shape)))
}

/// A tensor of `shape` filled with zeros.
pub fn zeros(dtype: burn_tensor::DType, shape: Vec<usize>) -> Result<TensorData> {
    let len = shape.iter().product();
    dispatch_dtype!(dtype, |E| Ok(TensorData::new(vec![E::zero(); len], shape)))
}

/// A one-dimensional tensor whose `i`-th element is `value(i)`.
pub fn from_fn(
    dtype: burn_tensor::DType,
    len: usize,
    value: impl Fn(usize) -> f64,
) -> Result<TensorData> {
    dispatch_dtype!(dtype, |E| {
        let values: Vec<E> = (0..len).map(|i| E::from_f64(value(i))).collect();
        Ok(TensorData::new(values, [len]))
    })
}

/// Fails with [`GlobalError::InvalidArgument`] unless every index of `0..n` is stored
/// exactly, and distinctly, as `dtype`. `Bool` never holds indices.
pub fn check_index_range(dtype: burn_tensor::DType, n: usize) -> Result<()> {
    if dtype == burn_tensor::DType::Bool {
        return Err(GlobalError::InvalidArgument(
            "Indices cannot be stored as Bool".into(),
        ));
    }

    let max = dispatch_dtype!(dtype, |E| Ok(E::MAX_INDEX))?;
    if n > 0 && n - 1 > max {
        return Err(GlobalError::InvalidArgument(format!(
            "Index {} cannot be stored exactly as {dtype:?}, whose largest exact index is {max}",
            n - 1
        )));
    }

    Ok(())
}

/// A one-dimensional tensor holding `indices`.
pub fn from_indices(dtype: burn_tensor::DType, indices: &[usize]) -> Result<TensorData> {
    dispatch_dtype!(dtype, |E| {
        let values: Vec<E> = indices.iter().map(|&i| E::from_index(i)).collect();
        Ok(TensorData::new(values, [indices.len()]))
    })
}

/// Copies `region` (relative to the origin of `data`) into a new contiguous tensor.
pub fn slice(data: &TensorData, region: &[Range<usize>]) -> Result<TensorData> {
    check_region(&data.shape, region)?;
    dispatch_dtype!(data.dtype, |E| {
        let source = read::<E>(data)?;
        let mut values: Vec<E> = Vec::with_capacity(view_shape(region).iter().product());
        for_each_row(&data.shape, region, |offset, len| {
            values.extend_from_slice(&source[offset..offset + len]);
        });
        Ok(TensorData::new(values, view_shape(region)))
    })
}

/// How a piece is combined with the buffer it is written into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    /// Overwrite.
    Assign,
    /// Add to the current values.
    Accumulate,
}

/// Builds a tensor of `shape` from zeros and the given pieces, each written at its
/// region (relative to the origin of the new tensor).
pub fn assemble(
    dtype: burn_tensor::DType,
    shape: Vec<usize>,
    pieces: &[(Vec<Range<usize>>, TensorData)],
    mode: WriteMode,
) -> Result<TensorData> {
    for (region, piece) in pieces {
        check_region(&shape, region)?;
        if piece.shape != view_shape(region) {
            return Err(GlobalError::ShapeMismatch {
                expected: view_shape(region),
                actual: piece.shape.clone(),
            });
        }
    }

    dispatch_dtype!(dtype, |E| {
        let mut buffer = vec![E::zero(); shape.iter().product()];
        for (region, piece) in pieces {
            let source = read::<E>(piece)?;
            let mut cursor = 0;
            for_each_row(&shape, region, |offset, len| {
                let row = &source[cursor..cursor + len];
                let target = &mut buffer[offset..offset + len];
                match mode {
                    WriteMode::Assign => target.copy_from_slice(row),
                    WriteMode::Accumulate => {
                        for (value, addend) in target.iter_mut().zip(row) {
                            *value = value.accumulate(*addend);
                        }
                    }
                }
                cursor += len;
            });
        }
        Ok(TensorData::new(buffer, shape))
    })
}

fn check_region(shape: &[usize], region: &[Range<usize>]) -> Result<()> {
    let fits = shape.len() == region.len()
        && shape
            .iter()
            .zip(region)
            .all(|(dim, range)| range.start <= range.end && range.end <= *dim);

    if fits {
        Ok(())
    } else {
        Err(GlobalError::InvalidArgument(format!(
            "Region {region:?} is out of bounds for shape {shape:?}"
        )))
    }
}

/// Calls `f(offset, len)` for every contiguous row of `region` inside a row-major
/// buffer of `shape`, in row-major order.
fn for_each_row(shape: &[usize], region: &[Range<usize>], mut f: impl FnMut(usize, usize)) {
    if region.iter().any(|range| range.is_empty()) {
        return;
    }
    let ndim = shape.len();
    if ndim == 0 {
        f(0, 1);
        return;
    }

    let mut strides = vec![1; ndim];
    for dim in (0..ndim - 1).rev() {
        strides[dim] = strides[dim + 1] * shape[dim + 1];
    }

    let last = ndim - 1;
    let len = region[last].len();
    let mut index: Vec<usize> = region[..last].iter().map(|range| range.start).collect();

    loop {
        let offset = index
            .iter()
            .zip(&strides)
            .map(|(i, stride)| i * stride)
            .sum::<usize>()
            + region[last].start;
        f(offset, len);

        let mut dim = last;
        loop {
            if dim == 0 {
                return;
            }
            dim -= 1;
            index[dim] += 1;
            if index[dim] < region[dim].end {
                break;
            }
            index[dim] = region[dim].start;
        }
    }
}
