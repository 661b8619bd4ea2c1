use mpi::ffi;

/// Element datatype of a shared abstraction.
///
/// The numeric codes are part of the binary call surface; the rewriter
/// marshals them as plain integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElemType {
    U8,
    I32,
    I64,
    F32,
    F64,
}

impl ElemType {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::U8),
            1 => Some(Self::I32),
            2 => Some(Self::I64),
            3 => Some(Self::F32),
            4 => Some(Self::F64),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn size_in_bytes(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::I32 | Self::F32 => 4,
            Self::I64 | Self::F64 => 8,
        }
    }

    #[inline]
    pub fn as_mpi(self) -> ffi::MPI_Datatype {
        unsafe {
            match self {
                Self::U8 => ffi::RSMPI_UINT8_T,
                Self::I32 => ffi::RSMPI_INT32_T,
                Self::I64 => ffi::RSMPI_INT64_T,
                Self::F32 => ffi::RSMPI_FLOAT,
                Self::F64 => ffi::RSMPI_DOUBLE,
            }
        }
    }
}

/// Reduction operator for `reduce_local`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Max,
    Min,
}

impl ReduceOp {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Sum),
            1 => Some(Self::Max),
            2 => Some(Self::Min),
            _ => None,
        }
    }

    #[inline]
    pub fn as_mpi(self) -> ffi::MPI_Op {
        unsafe {
            match self {
                Self::Sum => ffi::RSMPI_SUM,
                Self::Max => ffi::RSMPI_MAX,
                Self::Min => ffi::RSMPI_MIN,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elem_type_codes_round_trip() {
        for code in 0..5 {
            let ty = ElemType::from_code(code).unwrap();
            assert!(ty.size_in_bytes() > 0);
        }
        assert_eq!(ElemType::from_code(5), None);
        assert_eq!(ElemType::from_code(-1), None);
    }

    #[test]
    fn elem_type_sizes() {
        assert_eq!(ElemType::U8.size_in_bytes(), 1);
        assert_eq!(ElemType::I32.size_in_bytes(), 4);
        assert_eq!(ElemType::F32.size_in_bytes(), 4);
        assert_eq!(ElemType::I64.size_in_bytes(), 8);
        assert_eq!(ElemType::F64.size_in_bytes(), 8);
    }

    #[test]
    fn reduce_op_codes() {
        assert_eq!(ReduceOp::from_code(0), Some(ReduceOp::Sum));
        assert_eq!(ReduceOp::from_code(1), Some(ReduceOp::Max));
        assert_eq!(ReduceOp::from_code(2), Some(ReduceOp::Min));
        assert_eq!(ReduceOp::from_code(3), None);
    }
}
