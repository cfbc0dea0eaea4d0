use crate::nan_preserving_float::{F32, F64};
use crate::types::ValueType;
use core::fmt;
use num_traits::float::FloatCore;

/// The reason an instruction trapped.
///
/// Trap codes are produced by the numeric machinery and the execution loop.
/// The public execution result does not carry them (a trap is a trap), but
/// they keep the failure modes distinct internally and in messages.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TrapCode {
    /// Wasm code executed the `unreachable` instruction.
    Unreachable,
    /// A load or store touched an address outside the current memory size.
    MemoryAccessOutOfBounds,
    /// `call_indirect` with an index outside the table bounds.
    TableAccessOutOfBounds,
    /// `call_indirect` hit a table slot that holds no function.
    ElemUninitialized,
    /// Integer division or remainder with a zero divisor.
    DivisionByZero,
    /// Signed division overflow (`INT_MIN / -1`) or a float truncation whose
    /// result is out of range for the destination integer.
    IntegerOverflow,
    /// Attempt to truncate a NaN to an integer.
    InvalidConversionToInt,
    /// The call depth limit was reached.
    StackOverflow,
    /// `call_indirect` found a function of a different type than expected.
    UnexpectedSignature,
    /// The instruction meter ran out of ticks.
    MeterExhausted,
}

impl TrapCode {
    /// Returns the conventional trap message for this code.
    pub fn trap_message(&self) -> &'static str {
        match self {
            TrapCode::Unreachable => "unreachable",
            TrapCode::MemoryAccessOutOfBounds => "out of bounds memory access",
            TrapCode::TableAccessOutOfBounds => "undefined element",
            TrapCode::ElemUninitialized => "uninitialized element",
            TrapCode::DivisionByZero => "integer divide by zero",
            TrapCode::IntegerOverflow => "integer overflow",
            TrapCode::InvalidConversionToInt => "invalid conversion to integer",
            TrapCode::StackOverflow => "call stack exhausted",
            TrapCode::UnexpectedSignature => "indirect call type mismatch",
            TrapCode::MeterExhausted => "instruction budget exhausted",
        }
    }
}

impl fmt::Display for TrapCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.trap_message())
    }
}

/// Runtime representation of a value crossing the engine boundary.
///
/// Inside the execution loop values are raw 64-bit patterns; a `Value` pairs
/// the pattern with its type for arguments, results, globals and host calls.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Value {
    /// Value of 32-bit signed or unsigned integer.
    I32(i32),
    /// Value of 64-bit signed or unsigned integer.
    I64(i64),
    /// Value of 32-bit IEEE 754-2008 floating point number.
    F32(F32),
    /// Value of 64-bit IEEE 754-2008 floating point number.
    F64(F64),
}

impl Value {
    /// Creates the zero value of the given type.
    pub fn default(value_type: ValueType) -> Value {
        match value_type {
            ValueType::I32 => Value::I32(0),
            ValueType::I64 => Value::I64(0),
            ValueType::F32 => Value::F32(0f32.into()),
            ValueType::F64 => Value::F64(0f64.into()),
        }
    }

    /// Creates an `f32` value from its raw bit pattern.
    pub fn decode_f32(bits: u32) -> Value {
        Value::F32(F32::from_bits(bits))
    }

    /// Creates an `f64` value from its raw bit pattern.
    pub fn decode_f64(bits: u64) -> Value {
        Value::F64(F64::from_bits(bits))
    }

    /// Returns the type of this value.
    pub fn value_type(&self) -> ValueType {
        match *self {
            Value::I32(_) => ValueType::I32,
            Value::I64(_) => ValueType::I64,
            Value::F32(_) => ValueType::F32,
            Value::F64(_) => ValueType::F64,
        }
    }
}

impl From<i32> for Value {
    fn from(val: i32) -> Self {
        Value::I32(val)
    }
}

impl From<u32> for Value {
    fn from(val: u32) -> Self {
        Value::I32(val as i32)
    }
}

impl From<i64> for Value {
    fn from(val: i64) -> Self {
        Value::I64(val)
    }
}

impl From<u64> for Value {
    fn from(val: u64) -> Self {
        Value::I64(val as i64)
    }
}

impl From<F32> for Value {
    fn from(val: F32) -> Self {
        Value::F32(val)
    }
}

impl From<F64> for Value {
    fn from(val: F64) -> Self {
        Value::F64(val)
    }
}

impl From<f32> for Value {
    fn from(val: f32) -> Self {
        Value::F32(val.into())
    }
}

impl From<f64> for Value {
    fn from(val: f64) -> Self {
        Value::F64(val.into())
    }
}

/// Convert one type to another by wrapping (dropping high bits or demoting).
pub trait WrapInto<T> {
    /// Convert one type to another by wrapping.
    fn wrap_into(self) -> T;
}

/// Convert one type to another by extending (sign, zero or float widening).
pub trait ExtendInto<T> {
    /// Convert one type to another by extending.
    fn extend_into(self) -> T;
}

/// Convert a float to an integer by rounding towards zero, trapping when the
/// value has no representation in the destination type.
pub trait TryTruncateInto<T, E> {
    /// Convert a float to an integer by rounding towards zero.
    fn try_truncate_into(self) -> Result<T, E>;
}

/// Convert a value to and from its little-endian memory representation.
pub trait LittleEndianConvert: Sized {
    /// The fixed-size byte array this value occupies in linear memory.
    type Bytes: Default + AsRef<[u8]> + AsMut<[u8]>;

    /// Encodes the value into its little-endian byte representation.
    fn into_le_bytes(self) -> Self::Bytes;

    /// Decodes a value from its little-endian byte representation.
    fn from_le_bytes(bytes: Self::Bytes) -> Self;
}

/// Arithmetic operations shared by the integer and float types.
pub trait ArithmeticOps<T>: Sized {
    /// Add two values.
    fn add(self, other: T) -> T;
    /// Subtract two values.
    fn sub(self, other: T) -> T;
    /// Multiply two values.
    fn mul(self, other: T) -> T;
    /// Divide two values.
    fn div(self, other: T) -> Result<T, TrapCode>;
}

/// Integer-only operations.
pub trait Integer<T>: ArithmeticOps<T> {
    /// Counts leading zeros in the bitwise representation of the value.
    fn leading_zeros(self) -> T;
    /// Counts trailing zeros in the bitwise representation of the value.
    fn trailing_zeros(self) -> T;
    /// Counts 1-bits in the bitwise representation of the value.
    fn count_ones(self) -> T;
    /// Left bit rotation.
    fn rotl(self, other: T) -> T;
    /// Right bit rotation.
    fn rotr(self, other: T) -> T;
    /// Division remainder.
    fn rem(self, other: T) -> Result<T, TrapCode>;
}

/// Float-only operations.
pub trait Float<T>: ArithmeticOps<T> {
    /// Absolute value.
    fn abs(self) -> T;
    /// Largest integer less than or equal to the value.
    fn floor(self) -> T;
    /// Smallest integer greater than or equal to the value.
    fn ceil(self) -> T;
    /// Integer part of the value.
    fn trunc(self) -> T;
    /// Nearest integer, with ties rounded away from zero.
    fn round(self) -> T;
    /// Nearest integer, with ties rounded to even.
    fn nearest(self) -> T;
    /// Square root.
    fn sqrt(self) -> T;
    /// Whether the sign bit is clear.
    fn is_sign_positive(self) -> bool;
    /// Whether the sign bit is set.
    fn is_sign_negative(self) -> bool;
    /// Minimum of two values, propagating NaN and treating -0.0 < 0.0.
    fn min(self, other: T) -> T;
    /// Maximum of two values, propagating NaN and treating -0.0 < 0.0.
    fn max(self, other: T) -> T;
    /// The value with the sign replaced by the sign of `other`.
    fn copysign(self, other: T) -> T;
}

macro_rules! impl_wrap_into {
    ($from:ident, $into:ident) => {
        impl WrapInto<$into> for $from {
            #[inline]
            fn wrap_into(self) -> $into {
                self as $into
            }
        }
    };
    ($from:ident, $intermediate:ident, $into:ident) => {
        impl WrapInto<$into> for $from {
            #[inline]
            fn wrap_into(self) -> $into {
                $into::from(self as $intermediate)
            }
        }
    };
}

impl_wrap_into!(i64, i32);
impl_wrap_into!(i64, f32, F32);
impl_wrap_into!(u64, f32, F32);

impl WrapInto<F32> for F64 {
    #[inline]
    fn wrap_into(self) -> F32 {
        (f64::from(self) as f32).into()
    }
}

macro_rules! impl_extend_into {
    ($from:ident, $into:ident) => {
        impl ExtendInto<$into> for $from {
            #[inline]
            fn extend_into(self) -> $into {
                self as $into
            }
        }
    };
    ($from:ident, $intermediate:ident, $into:ident) => {
        impl ExtendInto<$into> for $from {
            #[inline]
            fn extend_into(self) -> $into {
                $into::from(self as $intermediate)
            }
        }
    };
}

impl_extend_into!(i32, i64);
impl_extend_into!(u32, i64);
impl_extend_into!(i32, f32, F32);
impl_extend_into!(u32, f32, F32);
impl_extend_into!(i32, f64, F64);
impl_extend_into!(u32, f64, F64);
impl_extend_into!(i64, f64, F64);
impl_extend_into!(u64, f64, F64);

impl ExtendInto<F64> for F32 {
    #[inline]
    fn extend_into(self) -> F64 {
        (f32::from(self) as f64).into()
    }
}

// Boundaries of the domain on which a float → integer truncation is defined,
// as *exclusive* bounds: the operation is valid strictly between them.
// The theoretical bounds are (INTEGER_MIN - 1, INTEGER_MAX + 1), but not every
// theoretical bound is representable in the source float type, so the nearest
// representable value on the outside is used instead.
macro_rules! impl_try_truncate_into {
    ($from:ident, $into:ident, $lower:expr, $upper:expr) => {
        impl TryTruncateInto<$into, TrapCode> for $from {
            #[inline]
            fn try_truncate_into(self) -> Result<$into, TrapCode> {
                if self.is_nan() {
                    return Err(TrapCode::InvalidConversionToInt);
                }
                if !(self > $lower && self < $upper) {
                    return Err(TrapCode::IntegerOverflow);
                }
                Ok(self as $into)
            }
        }
    };
    (@wrapped $from:ident, $intermediate:ident, $into:ident) => {
        impl TryTruncateInto<$into, TrapCode> for $from {
            #[inline]
            fn try_truncate_into(self) -> Result<$into, TrapCode> {
                $intermediate::from(self).try_truncate_into()
            }
        }
    };
}

impl_try_truncate_into!(f32, i32, -2_147_483_904.0, 2_147_483_648.0);
impl_try_truncate_into!(f32, u32, -1.0, 4_294_967_296.0);
impl_try_truncate_into!(f64, i32, -2_147_483_649.0, 2_147_483_648.0);
impl_try_truncate_into!(f64, u32, -1.0, 4_294_967_296.0);
impl_try_truncate_into!(
    f32,
    i64,
    -9_223_373_136_366_403_584.0,
    9_223_372_036_854_775_808.0
);
impl_try_truncate_into!(f32, u64, -1.0, 18_446_744_073_709_551_616.0);
impl_try_truncate_into!(
    f64,
    i64,
    -9_223_372_036_854_777_856.0,
    9_223_372_036_854_775_808.0
);
impl_try_truncate_into!(f64, u64, -1.0, 18_446_744_073_709_551_616.0);
impl_try_truncate_into!(@wrapped F32, f32, i32);
impl_try_truncate_into!(@wrapped F32, f32, u32);
impl_try_truncate_into!(@wrapped F32, f32, i64);
impl_try_truncate_into!(@wrapped F32, f32, u64);
impl_try_truncate_into!(@wrapped F64, f64, i32);
impl_try_truncate_into!(@wrapped F64, f64, u32);
impl_try_truncate_into!(@wrapped F64, f64, i64);
impl_try_truncate_into!(@wrapped F64, f64, u64);

macro_rules! impl_little_endian_convert {
    ($($primitive:ty),* $(,)?) => {
        $(
            impl LittleEndianConvert for $primitive {
                type Bytes = [u8; ::core::mem::size_of::<$primitive>()];

                #[inline]
                fn into_le_bytes(self) -> Self::Bytes {
                    self.to_le_bytes()
                }

                #[inline]
                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    Self::from_le_bytes(bytes)
                }
            }
        )*
    };
}

impl_little_endian_convert!(i8, u8, i16, u16, i32, u32, i64, u64);

impl LittleEndianConvert for F32 {
    type Bytes = [u8; 4];

    #[inline]
    fn into_le_bytes(self) -> Self::Bytes {
        self.to_bits().to_le_bytes()
    }

    #[inline]
    fn from_le_bytes(bytes: Self::Bytes) -> Self {
        Self::from_bits(u32::from_le_bytes(bytes))
    }
}

impl LittleEndianConvert for F64 {
    type Bytes = [u8; 8];

    #[inline]
    fn into_le_bytes(self) -> Self::Bytes {
        self.to_bits().to_le_bytes()
    }

    #[inline]
    fn from_le_bytes(bytes: Self::Bytes) -> Self {
        Self::from_bits(u64::from_le_bytes(bytes))
    }
}

macro_rules! impl_integer_arithmetic_ops {
    ($type:ident) => {
        impl ArithmeticOps<$type> for $type {
            #[inline]
            fn add(self, other: $type) -> $type {
                self.wrapping_add(other)
            }
            #[inline]
            fn sub(self, other: $type) -> $type {
                self.wrapping_sub(other)
            }
            #[inline]
            fn mul(self, other: $type) -> $type {
                self.wrapping_mul(other)
            }
            #[inline]
            fn div(self, other: $type) -> Result<$type, TrapCode> {
                if other == 0 {
                    return Err(TrapCode::DivisionByZero);
                }
                let (result, overflow) = self.overflowing_div(other);
                if overflow {
                    Err(TrapCode::IntegerOverflow)
                } else {
                    Ok(result)
                }
            }
        }
    };
}

impl_integer_arithmetic_ops!(i32);
impl_integer_arithmetic_ops!(u32);
impl_integer_arithmetic_ops!(i64);
impl_integer_arithmetic_ops!(u64);

macro_rules! impl_integer {
    ($type:ident) => {
        impl Integer<$type> for $type {
            #[inline]
            fn leading_zeros(self) -> $type {
                self.leading_zeros() as $type
            }
            #[inline]
            fn trailing_zeros(self) -> $type {
                self.trailing_zeros() as $type
            }
            #[inline]
            fn count_ones(self) -> $type {
                self.count_ones() as $type
            }
            #[inline]
            fn rotl(self, other: $type) -> $type {
                self.rotate_left(other as u32)
            }
            #[inline]
            fn rotr(self, other: $type) -> $type {
                self.rotate_right(other as u32)
            }
            #[inline]
            fn rem(self, other: $type) -> Result<$type, TrapCode> {
                if other == 0 {
                    return Err(TrapCode::DivisionByZero);
                }
                // `INT_MIN % -1` is 0 by the wrapping rule, not a trap.
                Ok(self.wrapping_rem(other))
            }
        }
    };
}

impl_integer!(i32);
impl_integer!(u32);
impl_integer!(i64);
impl_integer!(u64);

macro_rules! impl_float_arithmetic_ops {
    ($type:ident) => {
        impl ArithmeticOps<$type> for $type {
            #[inline]
            fn add(self, other: $type) -> $type {
                self + other
            }
            #[inline]
            fn sub(self, other: $type) -> $type {
                self - other
            }
            #[inline]
            fn mul(self, other: $type) -> $type {
                self * other
            }
            #[inline]
            fn div(self, other: $type) -> Result<$type, TrapCode> {
                Ok(self / other)
            }
        }
    };
}

impl_float_arithmetic_ops!(F32);
impl_float_arithmetic_ops!(F64);

macro_rules! impl_float {
    ($type:ident, $float:ident, $bits:ident) => {
        impl Float<$type> for $type {
            #[inline]
            fn abs(self) -> $type {
                $type::abs(self)
            }
            #[inline]
            fn floor(self) -> $type {
                $float::from(self).floor().into()
            }
            #[inline]
            fn ceil(self) -> $type {
                $float::from(self).ceil().into()
            }
            #[inline]
            fn trunc(self) -> $type {
                $float::from(self).trunc().into()
            }
            #[inline]
            fn round(self) -> $type {
                $float::from(self).round().into()
            }
            #[inline]
            fn nearest(self) -> $type {
                let value = $float::from(self);
                let round = value.round();
                if FloatCore::fract(value).abs() != 0.5 {
                    return round.into();
                }
                // Ties round to the even neighbour.
                let rem = round % 2.0;
                if rem == 1.0 {
                    value.floor().into()
                } else if rem == -1.0 {
                    value.ceil().into()
                } else {
                    round.into()
                }
            }
            #[inline]
            fn sqrt(self) -> $type {
                $float::from(self).sqrt().into()
            }
            #[inline]
            fn is_sign_positive(self) -> bool {
                $float::from(self).is_sign_positive()
            }
            #[inline]
            fn is_sign_negative(self) -> bool {
                $float::from(self).is_sign_negative()
            }
            #[inline]
            fn min(self, other: $type) -> $type {
                // Wasm semantics: NaN wins, and -0.0 is less than 0.0.
                match (self.is_nan(), other.is_nan()) {
                    (true, _) => self,
                    (_, true) => other,
                    _ => {
                        if $float::from(self) == 0.0 && $float::from(other) == 0.0 {
                            return if self.is_sign_negative() { self } else { other };
                        }
                        $type::min(self, other)
                    }
                }
            }
            #[inline]
            fn max(self, other: $type) -> $type {
                match (self.is_nan(), other.is_nan()) {
                    (true, _) => self,
                    (_, true) => other,
                    _ => {
                        if $float::from(self) == 0.0 && $float::from(other) == 0.0 {
                            return if self.is_sign_positive() { self } else { other };
                        }
                        $type::max(self, other)
                    }
                }
            }
            #[inline]
            fn copysign(self, other: $type) -> $type {
                let sign_bit: $bits = 1 << (::core::mem::size_of::<$bits>() * 8 - 1);
                $type::from_bits((self.to_bits() & !sign_bit) | (other.to_bits() & sign_bit))
            }
        }
    };
}

impl_float!(F32, f32, u32);
impl_float!(F64, f64, u64);
